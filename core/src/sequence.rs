//! Half-step coil table for 28BYJ-48 class steppers driven through a ULN2003.

/// Half-step excitation pattern, one row per micro-step, columns IN1..IN4.
pub const HALF_STEP: [[bool; 4]; 8] = [
    [true, false, false, false],
    [true, true, false, false],
    [false, true, false, false],
    [false, true, true, false],
    [false, false, true, false],
    [false, false, true, true],
    [false, false, false, true],
    [true, false, false, true],
];

/// Row for an arbitrary (possibly negative) position; wraps modulo the table length.
#[inline]
pub fn row(index: i64) -> &'static [bool; 4] {
    &HALF_STEP[index.rem_euclid(HALF_STEP.len() as i64) as usize]
}

/// Rotational sense of travel through the phase table
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    /// Non-negative values map to `Forward`, negative values to `Reverse`.
    pub fn from_sign(value: i64) -> Self {
        if value >= 0 {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }

    pub fn sign(self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
        }
    }

    pub fn inverted(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}
