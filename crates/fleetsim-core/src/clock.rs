//! Virtual clock for the discrete-event simulation.
//!
//! The [`SimClock`] tracks simulation time independently of wall-clock time,
//! advancing only when events are processed. This keeps runs deterministic
//! regardless of host machine speed.

use serde::{Deserialize, Serialize};

/// Virtual simulation clock.
///
/// Time is tracked in fractional milliseconds, matching the scale of the
/// prefill/decode duration formulas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimClock {
    current_ms: f64,
}

impl SimClock {
    /// Create a new clock starting at time zero.
    pub fn new() -> Self {
        Self { current_ms: 0.0 }
    }

    /// Current time in milliseconds.
    pub fn now_ms(&self) -> f64 {
        self.current_ms
    }

    /// Advance the clock to a specific time in milliseconds.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if `ms` is in the past.
    pub fn advance_to_ms(&mut self, ms: f64) {
        debug_assert!(
            ms >= self.current_ms,
            "Cannot move clock backwards: current={}ms, target={}ms",
            self.current_ms,
            ms,
        );
        self.current_ms = ms;
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clock_starts_at_zero() {
        let clock = SimClock::new();
        assert_eq!(clock.now_ms(), 0.0);
    }

    #[test]
    fn test_advance_to_ms() {
        let mut clock = SimClock::new();
        clock.advance_to_ms(500.5);
        assert_eq!(clock.now_ms(), 500.5);
    }

    #[test]
    fn test_advance_to_same_time_is_allowed() {
        let mut clock = SimClock::new();
        clock.advance_to_ms(100.0);
        clock.advance_to_ms(100.0);
        assert_eq!(clock.now_ms(), 100.0);
    }

    #[test]
    #[should_panic(expected = "Cannot move clock backwards")]
    fn test_cannot_go_backwards() {
        let mut clock = SimClock::new();
        clock.advance_to_ms(100.0);
        clock.advance_to_ms(50.0);
    }
}
