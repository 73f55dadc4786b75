//! Binary layout of the shared chat ring.
//!
//! The block is mapped by unrelated processes, so the layout is `#[repr(C)]`,
//! versioned, and self-describing: any opener can check that the block was
//! written by a compatible build before touching a slot.
//!
//! # Memory Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            RingHeader (56B)                          │
//! │  magic │ version │ capacity │ elem_size │ write_index │ read_index │  │
//! │  (8B)  │  (8B)   │  (8B)    │  (8B)     │ (8B atomic) │ (8B atomic)│  │
//! │                          active_users (8B atomic)                    │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  MessageRecord[0]  username[32] timestamp[32] text[512] valid[1]      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                 ...                                  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  MessageRecord[capacity-1]                                           │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A fresh object is all zeroes, so `magic == 0` means "not initialised yet".
//! Every field below the magic is only written while the mutual-exclusion
//! semaphore is held.

use parley_events::MessageRecord;
use std::mem::size_of;
use std::sync::atomic::{AtomicU64, Ordering};

/// ASCII "PARLEYRB": `0x5041_524C_4559_5242`.
pub const RING_MAGIC: u64 = 0x5041_524C_4559_5242;

/// Bump on any incompatible change to the header or to `MessageRecord`.
pub const RING_VERSION: u64 = 1;

#[repr(C)]
pub struct RingHeader {
    /// Zero until the first opener finishes initialisation, then `RING_MAGIC`.
    pub magic: AtomicU64,
    pub version: u64,
    /// Number of slots; fixed for the lifetime of the object.
    pub capacity: u64,
    /// `size_of::<MessageRecord>()` of the initialising build.
    pub elem_size: u64,
    /// Next slot a producer fills, in `[0, capacity)`.
    pub write_index: AtomicU64,
    /// Next slot a consumer drains, in `[0, capacity)`.
    pub read_index: AtomicU64,
    /// Advisory count of joined participants.
    pub active_users: AtomicU64,
}

impl RingHeader {
    pub fn is_initialized(&self) -> bool {
        self.magic.load(Ordering::Acquire) != 0
    }

    /// Checks an initialised header against what this process expects.
    pub fn validate(&self, capacity: usize) -> Result<(), &'static str> {
        if self.magic.load(Ordering::Acquire) != RING_MAGIC {
            return Err("Bad magic");
        }
        if self.version != RING_VERSION {
            return Err("Wrong version");
        }
        if self.capacity != capacity as u64 {
            return Err("Capacity mismatch");
        }
        if self.elem_size as usize != size_of::<MessageRecord>() {
            return Err("Record size mismatch");
        }
        let cap = self.capacity;
        if self.write_index.load(Ordering::Relaxed) >= cap
            || self.read_index.load(Ordering::Relaxed) >= cap
        {
            return Err("Cursor out of range");
        }
        Ok(())
    }
}

/// Header followed by `capacity` records.
pub fn bytes_for_ring(capacity: usize) -> usize {
    size_of::<RingHeader>() + capacity * size_of::<MessageRecord>()
}

/// Byte offset of slot `index` from the start of the block.
#[inline(always)]
pub fn slot_offset(index: u64) -> usize {
    size_of::<RingHeader>() + index as usize * size_of::<MessageRecord>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::align_of;

    fn header(capacity: u64) -> RingHeader {
        RingHeader {
            magic: AtomicU64::new(RING_MAGIC),
            version: RING_VERSION,
            capacity,
            elem_size: size_of::<MessageRecord>() as u64,
            write_index: AtomicU64::new(0),
            read_index: AtomicU64::new(0),
            active_users: AtomicU64::new(0),
        }
    }

    #[test]
    fn header_layout_is_stable() {
        assert_eq!(size_of::<RingHeader>(), 56);
        assert_eq!(align_of::<RingHeader>(), 8);
    }

    #[test]
    fn ring_of_64_has_documented_size() {
        assert_eq!(bytes_for_ring(64), 56 + 64 * 577);
        assert_eq!(slot_offset(0), 56);
        assert_eq!(slot_offset(2), 56 + 2 * 577);
    }

    #[test]
    fn valid_header_passes() {
        assert_eq!(header(64).validate(64), Ok(()));
    }

    #[test]
    fn mismatches_are_reported() {
        assert_eq!(header(64).validate(32), Err("Capacity mismatch"));

        let h = header(64);
        h.magic.store(1, Ordering::Relaxed);
        assert_eq!(h.validate(64), Err("Bad magic"));

        let mut h = header(64);
        h.version = 99;
        assert_eq!(h.validate(64), Err("Wrong version"));

        let mut h = header(64);
        h.elem_size = 8;
        assert_eq!(h.validate(64), Err("Record size mismatch"));

        let h = header(64);
        h.read_index.store(64, Ordering::Relaxed);
        assert_eq!(h.validate(64), Err("Cursor out of range"));
    }

    #[test]
    fn zero_magic_means_uninitialized() {
        let h = header(64);
        assert!(h.is_initialized());
        h.magic.store(0, Ordering::Relaxed);
        assert!(!h.is_initialized());
    }
}
