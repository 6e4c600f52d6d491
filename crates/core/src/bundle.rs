//! tlog-tiles entry bundle codec.
//!
//! A bundle is the concatenation of entry slots; the default slot is a
//! big-endian uint16 length prefix followed by the entry data. A bundle holds
//! up to [`crate::ENTRY_BUNDLE_WIDTH`] entries; the final bundle of the log
//! may be partial.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("truncated entry bundle")]
    Truncated,
}

/// Encode a single default slot: `uint16-be length || data`.
pub fn encode_slot(data: &[u8]) -> Vec<u8> {
    let len = u16::try_from(data.len()).expect("leaf exceeds bundle slot size");

    let mut slot = Vec::with_capacity(2 + data.len());
    slot.extend_from_slice(&len.to_be_bytes());
    slot.extend_from_slice(data);
    slot
}

/// Split a bundle into its per-entry data slices.
pub fn bundle_slots(bundle: &[u8]) -> Result<Vec<&[u8]>, BundleError> {
    let mut slots = Vec::new();
    let mut rest = bundle;

    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(BundleError::Truncated);
        }

        let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
        rest = &rest[2..];

        if rest.len() < len {
            return Err(BundleError::Truncated);
        }

        let (data, tail) = rest.split_at(len);
        slots.push(data);
        rest = tail;
    }

    Ok(slots)
}
