mod config;
use config::TalkingHeadConfig;
use puppet_core::MotorController;
use std::io::{IsTerminal, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};

const PROMPT: &str = "Enter text for the robot to speak (or 'quit'): ";

fn write_prompt(out: &mut impl Write) -> std::io::Result<()> {
    out.write_all(PROMPT.as_bytes())?;
    out.flush()
}

fn prompt() {
    let mut out = std::io::stdout();
    if !out.is_terminal() {
        return;
    }
    if let Err(e) = write_prompt(&mut out) {
        warn!(target: "talking_head", error = %e, "Failed to write prompt");
    }
}

/// Read lines from stdin and "speak" each one while the mouth moves
async fn conversation(controller: Arc<MotorController>, cfg: &TalkingHeadConfig) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(target: "talking_head", error = %e, "Failed to read stdin");
                break;
            }
        };
        let text = line.trim().to_string();
        if text.is_empty() || text.eq_ignore_ascii_case("quit") {
            break;
        }

        let duration = cfg.speech_duration(&text);
        info!(target: "talking_head", text = %text, duration_ms = duration.as_millis() as u64, "Speaking");

        let ctl = Arc::clone(&controller);
        let spoken = tokio::task::spawn_blocking(move || {
            ctl.speak_with(|| std::thread::sleep(duration));
        })
        .await;
        if let Err(e) = spoken {
            error!(target: "talking_head", error = %e, "Speech task failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging / tracing
    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info,puppet_core=info,talking_head=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    // Load configuration (defaults + env + optional TOML overlay)
    let cfg = TalkingHeadConfig::load();
    info!(
        target: "talking_head",
        hardware = cfg.motors.any_enabled(),
        head = cfg.motors.head.is_some(),
        talking = ?cfg.motors.talking,
        "Starting Talking Head demo"
    );

    let controller = Arc::new(MotorController::from_config(cfg.motors.clone())?);

    // Greeting
    if cfg.greeting_nods > 0 {
        let ctl = Arc::clone(&controller);
        let times = cfg.greeting_nods;
        match tokio::task::spawn_blocking(move || ctl.nod_head(times)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target: "talking_head", error = %e, "Greeting nod failed"),
            Err(e) => error!(target: "talking_head", error = %e, "Greeting task failed"),
        }
    }

    // Ctrl+C handler to shutdown gracefully
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(target: "talking_head", error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = shutdown => {
            info!(target: "talking_head", "Shutting down...");
        }
        _ = conversation(Arc::clone(&controller), &cfg) => {
            info!(target: "talking_head", "Conversation ended");
        }
    }

    let ctl = Arc::clone(&controller);
    if let Err(e) = tokio::task::spawn_blocking(move || ctl.cleanup()).await {
        error!(target: "talking_head", error = %e, "Cleanup task failed");
    }
    info!(target: "talking_head", "Motors released");
    Ok(())
}
