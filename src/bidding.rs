//! Minimum-bid calculation.
//!
//! Pure functions turning a current price and a minimum-pre-bid floor into
//! the next legal bid amount. The increment tiers are an explicit ordered
//! table (price band → increment) so the schedule is auditable and the
//! functions stay independently unit-testable: no state, no I/O.

/// Increment tiers: `(exclusive_upper_bound, increment)`, ascending.
///
/// Prices at or above the last bound use a percentage increment instead
/// (see [`increment_for`]).
const INCREMENT_TIERS: &[(u64, u64)] = &[
    (1_000, 25),
    (5_000, 50),
    (10_000, 100),
    (25_000, 250),
    (50_000, 500),
    (100_000, 1_000),
];

/// Percentage increment applied at or above the top tier, in basis points.
const TOP_TIER_INCREMENT_BPS: u64 = 200; // 2%

/// Percentage increments are rounded up to a multiple of this.
const TOP_TIER_ROUNDING: u64 = 500;

/// The bid increment for a given current price.
///
/// Flat currency steps below 100 000, percentage-based (2%, rounded up to a
/// multiple of 500) above it.
pub fn increment_for(current_price: u64) -> u64 {
    for &(bound, step) in INCREMENT_TIERS {
        if current_price < bound {
            return step;
        }
    }
    let pct = current_price.saturating_mul(TOP_TIER_INCREMENT_BPS) / 10_000;
    // Round up to the tier granularity; never below it.
    pct.div_ceil(TOP_TIER_ROUNDING).max(1) * TOP_TIER_ROUNDING
}

/// The next legal bid amount for a lot.
///
/// Returns `max(current_price + increment, min_pre_bid_floor)`. The result is
/// always strictly greater than `current_price` and never below the floor.
pub fn next_minimum(current_price: u64, min_pre_bid_floor: u64) -> u64 {
    let stepped = current_price.saturating_add(increment_for(current_price));
    stepped.max(min_pre_bid_floor)
}

/// Whether `amount` is an acceptable bid against the given price and floor.
///
/// Used by the session controller to reject under-minimum bids locally
/// before they ever reach the wire.
pub fn is_acceptable(amount: u64, current_price: u64, min_pre_bid_floor: u64) -> bool {
    amount >= next_minimum(current_price, min_pre_bid_floor)
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
    fn tier_table_is_ascending() {
        for pair in INCREMENT_TIERS.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }

    #[test]
    fn flat_tiers() {
        assert_eq!(increment_for(0), 25);
        assert_eq!(increment_for(999), 25);
        assert_eq!(increment_for(1_000), 50);
        assert_eq!(increment_for(4_999), 50);
        assert_eq!(increment_for(5_000), 100);
        assert_eq!(increment_for(24_999), 250);
        assert_eq!(increment_for(25_000), 500);
        assert_eq!(increment_for(99_999), 1_000);
    }

    #[test]
    fn percentage_tier_rounds_up() {
        // 2% of 100_000 = 2_000, already a multiple of 500.
        assert_eq!(increment_for(100_000), 2_000);
        // 2% of 130_000 = 2_600, rounds up to 3_000.
        assert_eq!(increment_for(130_000), 3_000);
        // 2% of 1_000_000 = 20_000.
        assert_eq!(increment_for(1_000_000), 20_000);
    }

    #[test]
    fn next_minimum_from_even_thousand() {
        // Price 1000 with floor 1000 sits in the 50-unit band below 5000.
        assert_eq!(next_minimum(1_000, 1_000), 1_050);
        assert!(!is_acceptable(1_049, 1_000, 1_000));
        assert!(is_acceptable(1_050, 1_000, 1_000));
    }

    #[test]
    fn always_strictly_above_price_and_at_least_floor() {
        for price in [0, 1, 999, 1_000, 4_999, 50_000, 99_999, 100_000, 7_777_777] {
            for floor in [0, 500, price, price + 10_000] {
                let next = next_minimum(price, floor);
                assert!(next > price, "price={price} floor={floor} next={next}");
                assert!(next >= floor, "price={price} floor={floor} next={next}");
            }
        }
    }

    #[test]
    fn floor_dominates_when_higher_than_step() {
        // current 100, step 25 → 125, but the floor is 2_000.
        assert_eq!(next_minimum(100, 2_000), 2_000);
    }

    #[test]
    fn no_overflow_near_u64_max() {
        let next = next_minimum(u64::MAX - 10, 0);
        assert!(next >= u64::MAX - 10);
    }
}
