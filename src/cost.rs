//! Packed cost values combining hard and soft constraint violations.
//!
//! A cost is a single `i64` holding the hard component in its upper half and
//! the soft component in its lower half, so that comparing two costs with the
//! ordinary integer comparison ranks any number of hard violations above any
//! number of soft ones.

/// A combined hard/soft cost. Always non-negative in practice.
pub type Cost = i64;

/// Weight of one hard violation relative to soft violations.
pub const HARD_COST_WEIGHT: Cost = 1 << 32;

/// The largest representable cost.
pub const MAX_COST: Cost = i64::MAX;

/// Combine a hard and a soft violation count into one packed cost.
pub const fn cost(hard: i64, soft: i64) -> Cost {
    hard * HARD_COST_WEIGHT + soft
}

/// The hard component of a packed cost.
pub const fn hard_cost(c: Cost) -> i64 {
    c >> 32
}

/// The soft component of a packed cost.
pub const fn soft_cost(c: Cost) -> i64 {
    c - ((c >> 32) << 32)
}

/// Render a cost as `hard.soft` for log and debug output.
pub fn show(c: Cost) -> String {
    format!("{}.{:05}", hard_cost(c), soft_cost(c))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pack_and_unpack() {
        let c = cost(3, 42);
        assert_eq!(hard_cost(c), 3);
        assert_eq!(soft_cost(c), 42);
        assert_eq!(c, 3 * HARD_COST_WEIGHT + 42);
    }

    #[test]
    fn hard_dominates_soft() {
        assert!(cost(1, 0) > cost(0, 1_000_000));
        assert!(cost(2, 0) > cost(1, 999_999));
    }

    #[test]
    fn show_format() {
        assert_eq!(show(cost(1, 7)), "1.00007");
        assert_eq!(show(0), "0.00000");
    }
}
