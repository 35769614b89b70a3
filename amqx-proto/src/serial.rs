//! RFC 1982 serial number arithmetic over `u32`.
//!
//! Delivery ids, delivery counts and transfer ids are serial numbers: they
//! wrap at 2^32 and comparisons must stay correct across the wrap. All
//! window and credit computations in this crate go through these helpers
//! rather than raw integer operators.

use core::cmp::Ordering;

pub fn serial_add(a: u32, n: u32) -> u32 {
    a.wrapping_add(n)
}

pub fn serial_sub(a: u32, n: u32) -> u32 {
    a.wrapping_sub(n)
}

/// Serial distance from `b` forward to `a` (`a - b` in serial space).
pub fn serial_diff(a: u32, b: u32) -> u32 {
    a.wrapping_sub(b)
}

/// Serial comparison. Equal is exact; otherwise `a < b` when the forward
/// distance from `a` to `b` is less than half the space.
pub fn serial_cmp(a: u32, b: u32) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if b.wrapping_sub(a) < (1 << 31) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

pub fn serial_lt(a: u32, b: u32) -> bool {
    serial_cmp(a, b) == Ordering::Less
}

pub fn serial_le(a: u32, b: u32) -> bool {
    serial_cmp(a, b) != Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_across_wrap() {
        assert!(serial_lt(u32::MAX, 0));
        assert!(serial_lt(u32::MAX - 5, 3));
        assert!(!serial_lt(3, u32::MAX - 5));
        assert!(serial_lt(0, 1));
        assert_eq!(serial_cmp(7, 7), Ordering::Equal);
    }

    #[test]
    fn distance_across_wrap() {
        assert_eq!(serial_diff(2, u32::MAX), 3);
        assert_eq!(serial_diff(10, 4), 6);
        assert_eq!(serial_add(u32::MAX, 1), 0);
        assert_eq!(serial_sub(0, 1), u32::MAX);
    }

    #[test]
    fn window_recompute_stays_nonnegative_in_serial_space() {
        // remote_incoming_window = next_incoming_id + incoming_window -
        // next_outgoing_id, evaluated with wrapping arithmetic.
        let next_incoming_id = u32::MAX - 1;
        let incoming_window = 10;
        let next_outgoing_id = 3; // five transfers past the wrap
        let win = serial_diff(serial_add(next_incoming_id, incoming_window), next_outgoing_id);
        assert_eq!(win, 5);
    }
}
