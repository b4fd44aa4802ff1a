use std::fs;
use std::path::Path;
use std::time::Duration;

use puppet_core::{ActuatorConfig, MotorControllerConfig, TalkingStyle};

/// High-level configuration for the Talking Head demo
#[derive(Clone, Debug)]
pub struct TalkingHeadConfig {
    pub motors: MotorControllerConfig,
    /// Nods performed once at startup
    pub greeting_nods: u32,
    /// Rough speaking pace used to decide how long the mouth moves per line
    pub speech_ms_per_word: u64,
    pub min_speech_ms: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| parse_flag(&v))
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse "17,27,22,23" into pin numbers; None on any malformed entry
pub fn parse_pins(s: &str) -> Option<Vec<u32>> {
    s.split(',')
        .map(|p| p.trim().parse::<u32>().ok())
        .collect::<Option<Vec<u32>>>()
        .filter(|pins| !pins.is_empty())
}

pub fn parse_talking_style(style: &str, swing_degrees: f64) -> Option<TalkingStyle> {
    match style.trim().to_ascii_lowercase().as_str() {
        "spin" | "continuous" => Some(TalkingStyle::Spin),
        "oscillate" | "swing" => Some(TalkingStyle::Oscillate { swing_degrees }),
        _ => None,
    }
}

impl Default for TalkingHeadConfig {
    fn default() -> Self {
        let mut motors = MotorControllerConfig::default();

        if let Some(enabled) = env_flag("MOTORS_ENABLED") {
            motors = motors.with_enabled(enabled);
        }
        if let Some(pins) = std::env::var("MOUTH_PINS").ok().and_then(|v| parse_pins(&v)) {
            motors.mouth.coil_pins = pins;
        }
        if let Some(ms) = env_parse::<u64>("MOUTH_STEP_DELAY_MS") {
            motors.mouth.step_delay = Duration::from_millis(ms);
        }
        match std::env::var("HEAD_PINS") {
            Ok(v) if v.trim().eq_ignore_ascii_case("none") => motors.head = None,
            Ok(v) => {
                if let (Some(head), Some(pins)) = (motors.head.as_mut(), parse_pins(&v)) {
                    head.coil_pins = pins;
                }
            }
            Err(_) => {}
        }
        if let (Some(head), Some(ms)) = (motors.head.as_mut(), env_parse::<u64>("HEAD_STEP_DELAY_MS")) {
            head.step_delay = Duration::from_millis(ms);
        }
        if let Some(steps) = env_parse::<u32>("NOD_STEPS") {
            motors.nod_steps = steps;
        }
        let swing_degrees = env_parse::<f64>("SWING_DEGREES").unwrap_or(30.0);
        if let Some(style) = std::env::var("TALKING_STYLE")
            .ok()
            .and_then(|s| parse_talking_style(&s, swing_degrees))
        {
            motors.talking = style;
        }

        Self {
            motors,
            greeting_nods: env_parse::<u32>("GREETING_NODS").unwrap_or(1),
            speech_ms_per_word: env_parse::<u64>("SPEECH_MS_PER_WORD").unwrap_or(350),
            min_speech_ms: env_parse::<u64>("MIN_SPEECH_MS").unwrap_or(500),
        }
    }
}

impl TalkingHeadConfig {
    /// Load configuration from a TOML file (path via TALKING_HEAD_CONFIG or ./talking_head.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path =
            std::env::var("TALKING_HEAD_CONFIG").unwrap_or_else(|_| "talking_head.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "talking_head", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::from_toml_str(&s, default.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target: "talking_head", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "talking_head", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn from_toml_str(s: &str, base: Self) -> Result<Self, toml::de::Error> {
        let t = toml::from_str::<TalkingHeadToml>(s)?;
        Ok(t.overlay(base))
    }

    /// How long the mouth should move for one line of speech
    pub fn speech_duration(&self, text: &str) -> Duration {
        let words = text.split_whitespace().count() as u64;
        Duration::from_millis(
            words
                .saturating_mul(self.speech_ms_per_word)
                .max(self.min_speech_ms),
        )
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TalkingHeadToml {
    pub enabled: Option<bool>,
    pub greeting_nods: Option<u32>,
    pub speech_ms_per_word: Option<u64>,
    pub min_speech_ms: Option<u64>,
    pub nod_steps: Option<u32>,
    pub talking: Option<TalkingToml>,
    pub mouth: Option<MotorToml>,
    pub head: Option<MotorToml>,
}

impl TalkingHeadToml {
    fn overlay(self, mut base: TalkingHeadConfig) -> TalkingHeadConfig {
        if let Some(x) = self.enabled {
            base.motors = base.motors.with_enabled(x);
        }
        if let Some(x) = self.greeting_nods {
            base.greeting_nods = x;
        }
        if let Some(x) = self.speech_ms_per_word {
            base.speech_ms_per_word = x;
        }
        if let Some(x) = self.min_speech_ms {
            base.min_speech_ms = x;
        }
        if let Some(x) = self.nod_steps {
            base.motors.nod_steps = x;
        }
        if let Some(t) = self.talking {
            t.apply(&mut base.motors.talking);
        }
        if let Some(m) = self.mouth {
            m.apply(&mut base.motors.mouth);
        }
        if let Some(h) = self.head {
            if h.absent == Some(true) {
                base.motors.head = None;
            } else {
                let head = base.motors.head.get_or_insert_with(|| ActuatorConfig {
                    name: "head".into(),
                    enabled: base.motors.mouth.enabled,
                    ..Default::default()
                });
                h.apply(head);
            }
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct TalkingToml {
    pub style: Option<String>,
    pub swing_degrees: Option<f64>,
}
impl TalkingToml {
    fn apply(self, t: &mut TalkingStyle) {
        let current_swing = match *t {
            TalkingStyle::Oscillate { swing_degrees } => swing_degrees,
            TalkingStyle::Spin => 30.0,
        };
        let swing = self.swing_degrees.unwrap_or(current_swing);
        match self.style {
            Some(style) => {
                if let Some(parsed) = parse_talking_style(&style, swing) {
                    *t = parsed;
                } else {
                    tracing::warn!(target: "talking_head", style = %style, "Unknown talking style; keeping current");
                }
            }
            None => {
                if let TalkingStyle::Oscillate { swing_degrees } = t {
                    *swing_degrees = swing;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct MotorToml {
    pub name: Option<String>,
    pub pins: Option<Vec<u32>>,
    pub step_delay_ms: Option<u64>,
    pub stop_timeout_ms: Option<u64>,
    pub enabled: Option<bool>,
    /// `absent = true` removes the motor (head only)
    pub absent: Option<bool>,
}
impl MotorToml {
    fn apply(self, m: &mut ActuatorConfig) {
        if let Some(x) = self.name {
            m.name = x;
        }
        if let Some(x) = self.pins {
            m.coil_pins = x;
        }
        if let Some(x) = self.step_delay_ms {
            m.step_delay = Duration::from_millis(x);
        }
        if let Some(x) = self.stop_timeout_ms {
            m.stop_timeout = Duration::from_millis(x);
        }
        if let Some(x) = self.enabled {
            m.enabled = x;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TalkingHeadConfig {
        TalkingHeadConfig {
            motors: MotorControllerConfig::default(),
            greeting_nods: 1,
            speech_ms_per_word: 350,
            min_speech_ms: 500,
        }
    }

    #[test]
    fn test_parse_pins() {
        assert_eq!(parse_pins("17, 27,22 ,23"), Some(vec![17, 27, 22, 23]));
        assert_eq!(parse_pins("17,x,22"), None);
        assert_eq!(parse_pins(""), None);
    }

    #[test]
    fn test_parse_flag_and_style() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
        assert_eq!(parse_talking_style("Spin", 10.0), Some(TalkingStyle::Spin));
        assert_eq!(
            parse_talking_style("oscillate", 12.5),
            Some(TalkingStyle::Oscillate { swing_degrees: 12.5 })
        );
        assert_eq!(parse_talking_style("wiggle", 1.0), None);
    }

    #[test]
    fn test_toml_overlay() {
        let toml = r#"
            enabled = true
            greeting_nods = 0
            nod_steps = 80

            [talking]
            style = "oscillate"
            swing_degrees = 20.0

            [mouth]
            pins = [18, 23, 24, 25]
            step_delay_ms = 5

            [head]
            absent = true
        "#;
        let cfg = TalkingHeadConfig::from_toml_str(toml, base()).unwrap();
        assert!(cfg.motors.mouth.enabled);
        assert_eq!(cfg.motors.mouth.coil_pins, vec![18, 23, 24, 25]);
        assert_eq!(cfg.motors.mouth.step_delay, Duration::from_millis(5));
        assert!(cfg.motors.head.is_none());
        assert_eq!(cfg.greeting_nods, 0);
        assert_eq!(cfg.motors.nod_steps, 80);
        assert_eq!(
            cfg.motors.talking,
            TalkingStyle::Oscillate { swing_degrees: 20.0 }
        );
    }

    #[test]
    fn test_toml_head_section_recreates_head() {
        let mut b = base();
        b.motors.head = None;
        let cfg = TalkingHeadConfig::from_toml_str("[head]\npins = [5, 6, 13, 19]\n", b).unwrap();
        let head = cfg.motors.head.unwrap();
        assert_eq!(head.name, "head");
        assert_eq!(head.coil_pins, vec![5, 6, 13, 19]);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(TalkingHeadConfig::from_toml_str("greeting_nods = \"lots\"", base()).is_err());
    }

    #[test]
    fn test_speech_duration_has_floor() {
        let cfg = base();
        assert_eq!(cfg.speech_duration("hi"), Duration::from_millis(500));
        assert_eq!(
            cfg.speech_duration("hello there how are you today"),
            Duration::from_millis(6 * 350)
        );
    }

    #[test]
    fn test_speech_duration_saturates() {
        let mut cfg = base();
        cfg.speech_ms_per_word = u64::MAX;
        assert_eq!(
            cfg.speech_duration("far too many words"),
            Duration::from_millis(u64::MAX)
        );
    }
}
