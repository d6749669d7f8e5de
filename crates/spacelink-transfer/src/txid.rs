//! Transaction id selection.
//!
//! Larger files get ids from a higher sub-range so that many small
//! concurrent transfers from independent senders rarely collide with them,
//! and lower ids (serviced first) go to small files.

use std::ops::RangeInclusive;

/// Highest usable tx_id; 0 means "none".
pub const TX_ID_MAX: u8 = 255;

/// Preferred id range for a file of `file_size` bytes in a queue of
/// `capacity` ids.
///
/// `minindex = capacity - capacity^((3 - log10(size) / 2) / 3)`, clamped to
/// `1..=capacity`.
pub fn tx_id_range(file_size: u64, capacity: u8) -> RangeInclusive<u8> {
    let capacity = capacity.max(1);
    let size = file_size.max(1) as f64;
    let exponent = (3.0 - size.log10() / 2.0) / 3.0;
    let cap = f64::from(capacity);
    let minindex = (cap - cap.powf(exponent)).floor().clamp(1.0, cap) as u8;
    minindex..=capacity
}

/// First free id in the preferred range, else the lowest free id overall.
pub fn choose_tx_id(file_size: u64, in_use: impl Fn(u8) -> bool) -> Option<u8> {
    tx_id_range(file_size, TX_ID_MAX)
        .find(|&id| !in_use(id))
        .or_else(|| (1..=TX_ID_MAX).find(|&id| !in_use(id)))
}
