//! Urgency classification for the current lot.
//!
//! A derived, non-authoritative signal: how close and how contested the
//! lot's closing is. Recomputed on every timer tick and every bid event —
//! never persisted, always a pure function of its inputs.

use serde::{Deserialize, Serialize};

/// How many trailing seconds of bid arrivals count as "recent" when
/// measuring bid velocity.
pub const VELOCITY_WINDOW_SECS: u64 = 30;

/// Discrete urgency classification of the current lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// Classify the lot's urgency from time remaining and bidding pressure.
///
/// * `seconds_remaining` — current countdown value.
/// * `recent_bids` — bids observed within the trailing
///   [`VELOCITY_WINDOW_SECS`] window.
/// * `bid_count` — total bids on the lot so far.
///
/// Deterministic: the time band picks a base level, heavy bidding bumps it
/// one step.
pub fn classify(seconds_remaining: u32, recent_bids: u32, bid_count: u32) -> UrgencyLevel {
    match seconds_remaining {
        0..=10 => UrgencyLevel::Critical,
        11..=30 => {
            if recent_bids >= 3 {
                UrgencyLevel::Critical
            } else {
                UrgencyLevel::High
            }
        }
        31..=60 => {
            if recent_bids >= 3 {
                UrgencyLevel::High
            } else {
                UrgencyLevel::Medium
            }
        }
        _ => {
            // A heavily contested lot is never fully calm, even with time left.
            if recent_bids >= 5 || bid_count >= 25 {
                UrgencyLevel::Medium
            } else {
                UrgencyLevel::Low
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn final_seconds_are_always_critical() {
        assert_eq!(classify(0, 0, 0), UrgencyLevel::Critical);
        assert_eq!(classify(10, 0, 0), UrgencyLevel::Critical);
        // Velocity cannot lower it.
        assert_eq!(classify(5, 0, 0), UrgencyLevel::Critical);
    }

    #[test]
    fn under_thirty_high_or_critical() {
        assert_eq!(classify(30, 0, 3), UrgencyLevel::High);
        assert_eq!(classify(30, 3, 3), UrgencyLevel::Critical);
        assert_eq!(classify(11, 2, 10), UrgencyLevel::High);
    }

    #[test]
    fn under_sixty_medium_or_high() {
        assert_eq!(classify(60, 0, 0), UrgencyLevel::Medium);
        assert_eq!(classify(45, 3, 5), UrgencyLevel::High);
    }

    #[test]
    fn quiet_lot_with_time_left_is_low() {
        assert_eq!(classify(300, 0, 0), UrgencyLevel::Low);
        assert_eq!(classify(61, 2, 10), UrgencyLevel::Low);
    }

    #[test]
    fn contested_lot_never_fully_calm() {
        assert_eq!(classify(300, 5, 5), UrgencyLevel::Medium);
        assert_eq!(classify(300, 0, 25), UrgencyLevel::Medium);
    }

    #[test]
    fn levels_are_ordered() {
        assert!(UrgencyLevel::Low < UrgencyLevel::Medium);
        assert!(UrgencyLevel::Medium < UrgencyLevel::High);
        assert!(UrgencyLevel::High < UrgencyLevel::Critical);
    }
}
