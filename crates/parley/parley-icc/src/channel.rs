//! Bounded multi-producer / multi-consumer chat channel over shared memory.
//!
//! A [`ShmChannel`] attaches to a named shared block holding a ring of
//! [`MessageRecord`]s and to three named counting semaphores:
//!
//! - `mutex`  (initial 1): binary gate around every cursor and slot access
//! - `free`   (initial capacity): slots a producer may fill
//! - `filled` (initial 0): slots a consumer may drain
//!
//! # Protocol
//!
//! **publish:** wait `free` → take gate → write `slots[write_index]`, advance
//! `write_index` → drop gate → post `filled`
//!
//! **recv / poll:** wait `filled` → take gate → read `slots[read_index]`, mark it
//! consumed, advance `read_index` → drop gate → post `free`
//!
//! A full ring blocks producers instead of overwriting unread records. The
//! semaphores are the only coordination between processes, so any number of
//! unrelated processes may publish and drain concurrently, and none of them has
//! to outlive the others.
//!
//! # Stalled peers
//!
//! A peer that dies while holding the gate leaves it taken forever. The
//! `*_timeout` variants bound every wait so a caller can notice and give up.

use crate::error::ChannelError;
use crate::ring::{RingConfig, next_index};
use crate::semaphore::{Deadline, NamedSemaphore, SemaphoreGuard};
use crate::shm_layout::{RING_MAGIC, RING_VERSION, RingHeader, bytes_for_ring, slot_offset};
use parley_events::MessageRecord;
use parley_mmap::SharedMemory;
use std::mem::size_of;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Names and geometry of a channel. Every participant must agree on all of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Directory backing named shared memory (`/dev/shm` on Linux).
    pub shm_dir: PathBuf,
    pub shm_name: String,
    pub mutex_sem: String,
    pub free_sem: String,
    pub filled_sem: String,
    pub ring: RingConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            shm_dir: PathBuf::from("/dev/shm"),
            shm_name: "/os_chat_shm".into(),
            mutex_sem: "/os_chat_mutex".into(),
            free_sem: "/os_chat_empty".into(),
            filled_sem: "/os_chat_full".into(),
            ring: RingConfig::default(),
        }
    }
}

impl ChannelConfig {
    /// Derive all four object names from one prefix, e.g. `/room1` gives
    /// `/room1_shm`, `/room1_mutex`, `/room1_free`, `/room1_filled`.
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            shm_name: format!("{prefix}_shm"),
            mutex_sem: format!("{prefix}_mutex"),
            free_sem: format!("{prefix}_free"),
            filled_sem: format!("{prefix}_filled"),
            ..Self::default()
        }
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.ring = RingConfig::new(capacity);
        self
    }
}

/// Point-in-time view of a channel, taken under the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub capacity: u64,
    pub write_index: u64,
    pub read_index: u64,
    /// Current `filled` semaphore count.
    pub filled: u32,
    /// Current `free` semaphore count.
    pub free: u32,
    pub active_users: u64,
}

pub struct ShmChannel {
    /// Owns the mapping; `base` points into it.
    _shm: SharedMemory,
    base: *mut u8,
    capacity: u64,
    mutex: NamedSemaphore,
    free: NamedSemaphore,
    filled: NamedSemaphore,
}

// SAFETY: every access to the mapped block happens while holding the `mutex`
// semaphore, which serialises threads as well as processes.
unsafe impl Send for ShmChannel {}
unsafe impl Sync for ShmChannel {}

impl ShmChannel {
    /// Attach to the channel described by `cfg`, creating the shared block and
    /// semaphores if this is the first participant.
    ///
    /// The first opener (the one that finds `magic == 0`) writes the header and
    /// zeroes every slot while holding the gate, so two first-time openers can
    /// never both initialise. Later openers validate the header instead.
    ///
    /// # Errors
    /// Mapping, semaphore and layout failures are returned as-is; they are
    /// fatal for the caller.
    pub fn open(cfg: &ChannelConfig) -> Result<Self, ChannelError> {
        cfg.ring.validate().map_err(ChannelError::Layout)?;
        let capacity = cfg.ring.capacity;
        let bytes = bytes_for_ring(capacity);

        let mut shm = SharedMemory::open_or_create(&cfg.shm_dir, &cfg.shm_name, bytes as u64)
            .map_err(|source| ChannelError::Map {
                name: cfg.shm_name.clone(),
                source,
            })?;
        if shm.len() < bytes {
            return Err(ChannelError::Layout("Mapping smaller than ring"));
        }
        tracing::debug!(path = %shm.path().display(), bytes = shm.len(), "mapped chat ring");
        let base = shm.as_mut_ptr();

        let mutex = NamedSemaphore::open(&cfg.mutex_sem, 1)?;
        let free = NamedSemaphore::open(&cfg.free_sem, capacity as u32)?;
        let filled = NamedSemaphore::open(&cfg.filled_sem, 0)?;

        let channel = Self {
            _shm: shm,
            base,
            capacity: capacity as u64,
            mutex,
            free,
            filled,
        };
        channel.initialize()?;
        Ok(channel)
    }

    /// Remove the shared block and all three semaphores from the system.
    /// Attached processes keep working on their existing handles.
    pub fn unlink(cfg: &ChannelConfig) -> Result<(), ChannelError> {
        SharedMemory::unlink(&cfg.shm_dir, &cfg.shm_name).map_err(|source| {
            ChannelError::Unlink {
                name: cfg.shm_name.clone(),
                source,
            }
        })?;
        NamedSemaphore::unlink(&cfg.mutex_sem)?;
        NamedSemaphore::unlink(&cfg.free_sem)?;
        NamedSemaphore::unlink(&cfg.filled_sem)?;
        tracing::info!(shm = %cfg.shm_name, "unlinked channel");
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    fn initialize(&self) -> Result<(), ChannelError> {
        let _gate = self.mutex.acquire()?;
        if self.header().is_initialized() {
            return self
                .header()
                .validate(self.capacity as usize)
                .map_err(ChannelError::Layout);
        }

        // SAFETY: we hold the gate and nobody else has seen a valid magic, so no
        // other participant reads or writes the block concurrently. The mapping
        // is bytes_for_ring(capacity) long.
        unsafe {
            ptr::write_bytes(
                self.base.add(slot_offset(0)),
                0,
                self.capacity as usize * size_of::<MessageRecord>(),
            );
            ptr::write(
                self.base as *mut RingHeader,
                RingHeader {
                    magic: AtomicU64::new(0),
                    version: RING_VERSION,
                    capacity: self.capacity,
                    elem_size: size_of::<MessageRecord>() as u64,
                    write_index: AtomicU64::new(0),
                    read_index: AtomicU64::new(0),
                    active_users: AtomicU64::new(0),
                },
            );
        }
        self.header().magic.store(RING_MAGIC, Ordering::Release);
        tracing::info!(capacity = self.capacity, "initialised shared chat ring");
        Ok(())
    }

    #[inline(always)]
    fn header(&self) -> &RingHeader {
        // SAFETY: base points at a mapping at least size_of::<RingHeader>() long,
        // page aligned, and every field is valid for any bit pattern.
        unsafe { &*(self.base as *const RingHeader) }
    }

    #[inline(always)]
    fn slot_ptr(&self, index: u64) -> *mut MessageRecord {
        debug_assert!(index < self.capacity);
        // SAFETY: index < capacity, so the slot lies inside the mapping.
        unsafe { self.base.add(slot_offset(index)) as *mut MessageRecord }
    }

    /// Publish one record, blocking while the ring is full.
    pub fn publish(&self, record: &MessageRecord) -> Result<(), ChannelError> {
        if !record.is_valid() {
            return Err(ChannelError::InvalidRecord);
        }
        self.free.wait()?;
        self.commit(record, None)
    }

    /// [`publish`](Self::publish) that gives up after `timeout`, leaving the
    /// ring untouched.
    pub fn publish_timeout(
        &self,
        record: &MessageRecord,
        timeout: Duration,
    ) -> Result<(), ChannelError> {
        if !record.is_valid() {
            return Err(ChannelError::InvalidRecord);
        }
        let deadline = Deadline::after(timeout);
        if !self.free.wait_until(&deadline)? {
            return Err(ChannelError::Timeout(timeout));
        }
        self.commit(record, Some(&deadline))
    }

    /// Non-blocking drain: `None` when nothing is waiting.
    pub fn poll(&self) -> Result<Option<MessageRecord>, ChannelError> {
        loop {
            if !self.filled.try_wait()? {
                return Ok(None);
            }
            if let Some(record) = self.consume(None)? {
                return Ok(Some(record));
            }
        }
    }

    /// Blocking drain: waits until a record is available.
    pub fn recv(&self) -> Result<MessageRecord, ChannelError> {
        loop {
            self.filled.wait()?;
            if let Some(record) = self.consume(None)? {
                return Ok(record);
            }
        }
    }

    /// [`recv`](Self::recv) bounded by `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<MessageRecord, ChannelError> {
        let deadline = Deadline::after(timeout);
        loop {
            if !self.filled.wait_until(&deadline)? {
                return Err(ChannelError::Timeout(timeout));
            }
            if let Some(record) = self.consume(Some(&deadline))? {
                return Ok(record);
            }
        }
    }

    /// Register one more participant. Returns the new count.
    pub fn join(&self) -> Result<u64, ChannelError> {
        let _gate = self.mutex.acquire()?;
        let users = self.header().active_users.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(active_users = users, "joined channel");
        Ok(users)
    }

    /// Deregister a participant. Never goes below zero.
    pub fn leave(&self) -> Result<u64, ChannelError> {
        let _gate = self.mutex.acquire()?;
        let h = self.header();
        let users = h.active_users.load(Ordering::Relaxed).saturating_sub(1);
        h.active_users.store(users, Ordering::Relaxed);
        tracing::debug!(active_users = users, "left channel");
        Ok(users)
    }

    pub fn stats(&self) -> Result<ChannelStats, ChannelError> {
        let _gate = self.mutex.acquire()?;
        let h = self.header();
        Ok(ChannelStats {
            capacity: h.capacity,
            write_index: h.write_index.load(Ordering::Relaxed),
            read_index: h.read_index.load(Ordering::Relaxed),
            filled: self.filled.value()?,
            free: self.free.value()?,
            active_users: h.active_users.load(Ordering::Relaxed),
        })
    }

    fn gate(&self, deadline: Option<&Deadline>) -> Result<SemaphoreGuard<'_>, ChannelError> {
        match deadline {
            None => self.mutex.acquire(),
            Some(d) => self
                .mutex
                .acquire_until(d)?
                .ok_or(ChannelError::Timeout(d.timeout())),
        }
    }

    // Caller holds one `free` permit. On failure the permit is handed back.
    fn commit(&self, record: &MessageRecord, deadline: Option<&Deadline>) -> Result<(), ChannelError> {
        let index = match self.write_slot(record, deadline) {
            Ok(index) => index,
            Err(e) => {
                if let Err(post_err) = self.free.post() {
                    tracing::error!(error = %post_err, "failed to return free slot");
                }
                return Err(e);
            }
        };
        self.filled.post()?;
        tracing::debug!(index, user = record.username(), "published record");
        Ok(())
    }

    fn write_slot(
        &self,
        record: &MessageRecord,
        deadline: Option<&Deadline>,
    ) -> Result<u64, ChannelError> {
        let _gate = self.gate(deadline)?;
        let h = self.header();
        let index = h.write_index.load(Ordering::Acquire);
        if index >= self.capacity {
            return Err(ChannelError::Layout("Cursor out of range"));
        }
        // SAFETY: gate held; index checked against capacity.
        unsafe { ptr::write(self.slot_ptr(index), *record) };
        h.write_index
            .store(next_index(index, self.capacity), Ordering::Release);
        Ok(index)
    }

    // Caller holds one `filled` permit. Returns `None` for a slot that was
    // never marked valid; that slot is still consumed and freed.
    fn consume(&self, deadline: Option<&Deadline>) -> Result<Option<MessageRecord>, ChannelError> {
        let taken = match self.read_slot(deadline) {
            Ok(taken) => taken,
            Err(e) => {
                if let Err(post_err) = self.filled.post() {
                    tracing::error!(error = %post_err, "failed to return filled slot");
                }
                return Err(e);
            }
        };
        self.free.post()?;
        let (index, record) = taken;
        if record.is_valid() {
            tracing::debug!(index, user = record.username(), "consumed record");
            Ok(Some(record))
        } else {
            tracing::warn!(index, "skipped slot that was never published");
            Ok(None)
        }
    }

    fn read_slot(&self, deadline: Option<&Deadline>) -> Result<(u64, MessageRecord), ChannelError> {
        let _gate = self.gate(deadline)?;
        let h = self.header();
        let index = h.read_index.load(Ordering::Acquire);
        if index >= self.capacity {
            return Err(ChannelError::Layout("Cursor out of range"));
        }
        let slot = self.slot_ptr(index);
        // SAFETY: gate held; index checked against capacity; MessageRecord is
        // valid for any bit pattern.
        let record = unsafe {
            let record = ptr::read(slot);
            (*slot).invalidate();
            record
        };
        h.read_index
            .store(next_index(index, self.capacity), Ordering::Release);
        Ok((index, record))
    }
}
