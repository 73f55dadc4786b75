//! Ring configuration and cursor arithmetic.

/// Slot count used by every chat channel unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 64;

/// Configuration for a ring buffer.
///
/// Cursors wrap with a modulo, so any non-zero capacity works; it does not
/// have to be a power of two.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Number of message slots in the ring.
    pub capacity: usize,
}

impl RingConfig {
    /// Geometry is checked when a channel is opened, see [`RingConfig::validate`].
    ///
    /// ```
    /// use parley_icc::RingConfig;
    /// let cfg = RingConfig::new(64);
    /// assert_eq!(cfg.capacity, 64);
    /// assert!(RingConfig::new(0).validate().is_err());
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    /// The capacity must be non-zero and fit a counting semaphore.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.capacity == 0 {
            return Err("Capacity must be non-zero");
        }
        if self.capacity > i32::MAX as usize {
            return Err("Capacity must fit a semaphore count");
        }
        Ok(())
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Successor of a cursor, modulo `capacity`.
///
/// ```text
/// capacity = 64
/// 0  -> 1
/// 62 -> 63
/// 63 -> 0   (wraps)
/// ```
#[inline(always)]
pub fn next_index(index: u64, capacity: u64) -> u64 {
    (index + 1) % capacity
}
