//! Buffer Pool
//!
//! Fixed-capacity reuse allocator for the real-time path.
//!
//! Acquiring moves a boxed [`AudioBuffer`] out of its slot and hands it to
//! the caller as a [`PooledBuffer`]; releasing moves it back. Moving a `Box`
//! never touches the allocator, and ownership guarantees a slot has exactly
//! one acquirer at a time.
//!
//! The pool has two phases. While growth is allowed (warm-up / pre-roll) an
//! acquire that finds no suitable free slot may allocate. Once sealed, an
//! acquire only ever reuses existing storage and reports exhaustion with
//! `None`.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use super::buffer::{AudioBuffer, DEFAULT_SAMPLE_RATE};
use crate::error::{NuevaError, Result};

/// Default upper bound on live slots
pub const DEFAULT_MAX_BUFFERS: usize = 32;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

enum SlotState {
    /// Storage was reclaimed by maintenance; the index can be reused
    Vacant,
    Free(Box<AudioBuffer>),
    InUse,
}

struct PooledSlot {
    state: SlotState,
    last_used_frame: u64,
}

/// A buffer on loan from a [`BufferPool`]
///
/// Hand it back with [`BufferPool::release`] before the end of the block.
/// Contents are undefined until cleared. Dropping one instead of releasing it
/// frees its storage on the dropping thread and leaves its slot on loan for
/// the lifetime of the pool.
#[must_use = "pooled buffers must be released back to their pool"]
pub struct PooledBuffer {
    pool_id: u64,
    slot: usize,
    buffer: Box<AudioBuffer>,
}

impl PooledBuffer {
    /// Index of the slot this buffer belongs to
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Deref for PooledBuffer {
    type Target = AudioBuffer;

    fn deref(&self) -> &AudioBuffer {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut AudioBuffer {
        &mut self.buffer
    }
}

/// Pool of reusable audio buffers
pub struct BufferPool {
    id: u64,
    slots: Vec<PooledSlot>,
    max_buffers: usize,
    live: usize,
    active: usize,
    current_frame: u64,
    growth_allowed: bool,
    sample_rate: f64,
}

impl BufferPool {
    /// Create an empty pool that will hold at most `max_buffers` live slots
    ///
    /// Growth is allowed until [`BufferPool::seal`] is called.
    pub fn new(max_buffers: usize) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            slots: Vec::with_capacity(max_buffers),
            max_buffers,
            live: 0,
            active: 0,
            current_frame: 0,
            growth_allowed: true,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    /// Stamp buffers handed out by this pool with `sample_rate`
    pub fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    // ========================================================================
    // Real-time Path
    // ========================================================================

    /// Acquire a buffer shaped `(num_channels, num_samples)`
    ///
    /// Scans free slots for the first one with enough capacity and resizes it
    /// logically. If none fits and growth is allowed, a new slot is created
    /// (or, when the pool is full, the least recently used free slot is
    /// regrown). Returns `None` when the pool cannot satisfy the request;
    /// callers treat that as a dropout, not an error.
    pub fn acquire(&mut self, num_channels: usize, num_samples: usize) -> Option<PooledBuffer> {
        let fit = self.slots.iter().position(|slot| {
            matches!(&slot.state, SlotState::Free(buffer) if buffer.fits(num_channels, num_samples))
        });
        if let Some(index) = fit {
            return self.take(index, num_channels, num_samples);
        }

        if !self.growth_allowed {
            return None;
        }
        if self.live < self.max_buffers {
            return Some(self.create(num_channels, num_samples));
        }

        let lru = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot.state, SlotState::Free(_)))
            .min_by_key(|(_, slot)| slot.last_used_frame)
            .map(|(index, _)| index)?;
        self.take(lru, num_channels, num_samples)
    }

    /// Return a buffer to its slot and stamp the slot with the current frame
    ///
    /// Releasing a buffer from another pool is a caller bug: it asserts in
    /// debug builds and drops the buffer in release builds. Use
    /// [`BufferPool::try_release`] when the origin is not known.
    pub fn release(&mut self, pooled: PooledBuffer) {
        if let Err(foreign) = self.try_release(pooled) {
            debug_assert_eq!(foreign.pool_id, self.id, "released a buffer from another pool");
        }
    }

    /// Return a buffer to its slot, handing it back if it belongs elsewhere
    pub fn try_release(&mut self, pooled: PooledBuffer) -> std::result::Result<(), PooledBuffer> {
        if pooled.pool_id != self.id {
            return Err(pooled);
        }
        let PooledBuffer { slot, buffer, .. } = pooled;

        let frame = self.current_frame;
        if let Some(entry) = self.slots.get_mut(slot) {
            if matches!(entry.state, SlotState::InUse) {
                entry.state = SlotState::Free(buffer);
                entry.last_used_frame = frame;
                self.active -= 1;
            }
        }
        Ok(())
    }

    /// Advance the frame counter used to order reclamation
    ///
    /// The mix engine calls this once per processed block.
    pub fn advance_frame(&mut self) {
        self.current_frame = self.current_frame.wrapping_add(1);
    }

    fn take(
        &mut self,
        index: usize,
        num_channels: usize,
        num_samples: usize,
    ) -> Option<PooledBuffer> {
        let frame = self.current_frame;
        let sample_rate = self.sample_rate;
        let entry = self.slots.get_mut(index)?;

        match std::mem::replace(&mut entry.state, SlotState::InUse) {
            SlotState::Free(mut buffer) => {
                buffer.set_size(num_channels, num_samples);
                buffer.set_sample_rate(sample_rate);
                entry.last_used_frame = frame;
                self.active += 1;
                Some(PooledBuffer {
                    pool_id: self.id,
                    slot: index,
                    buffer,
                })
            }
            other => {
                entry.state = other;
                None
            }
        }
    }

    /// Register a new slot, reusing a vacant index when there is one
    fn register(&mut self, state: SlotState) -> usize {
        let entry = PooledSlot {
            state,
            last_used_frame: self.current_frame,
        };
        self.live += 1;

        let vacant = self
            .slots
            .iter()
            .position(|slot| matches!(slot.state, SlotState::Vacant));
        match vacant {
            Some(index) => {
                self.slots[index] = entry;
                index
            }
            None => {
                self.slots.push(entry);
                self.slots.len() - 1
            }
        }
    }

    /// Create a slot that is immediately on loan; the only allocating acquire
    fn create(&mut self, num_channels: usize, num_samples: usize) -> PooledBuffer {
        let buffer = Box::new(AudioBuffer::with_sample_rate(
            num_channels,
            num_samples,
            self.sample_rate,
        ));
        let slot = self.register(SlotState::InUse);
        self.active += 1;
        PooledBuffer {
            pool_id: self.id,
            slot,
            buffer,
        }
    }

    // ========================================================================
    // Warm-up and Maintenance (control context)
    // ========================================================================

    /// Allocate up to `count` free buffers shaped `(num_channels, num_samples)`
    ///
    /// Stops at `max_buffers`. Returns the number of slots created.
    pub fn preallocate(&mut self, num_channels: usize, num_samples: usize, count: usize) -> usize {
        let mut created = 0;
        while created < count && self.live < self.max_buffers {
            let buffer = Box::new(AudioBuffer::with_sample_rate(
                num_channels,
                num_samples,
                self.sample_rate,
            ));
            self.register(SlotState::Free(buffer));
            created += 1;
        }
        created
    }

    /// Grow every free slot so it can hold `(num_channels, num_samples)`
    ///
    /// Used at pre-roll when the block shape changes. Returns the number of
    /// slots that had to reallocate.
    pub fn ensure_capacity(&mut self, num_channels: usize, num_samples: usize) -> usize {
        let mut grown = 0;
        for slot in &mut self.slots {
            if let SlotState::Free(buffer) = &mut slot.state {
                if buffer.set_size(num_channels, num_samples) {
                    grown += 1;
                }
            }
        }
        grown
    }

    /// Drop free slots idle for at least `idle_frames` frames
    ///
    /// `idle_frames == 0` drops every free slot. Returns the number of slots
    /// reclaimed. Buffers on loan are never touched. Frees memory, so only
    /// call it where the host is not running blocks.
    pub fn clear_unused(&mut self, idle_frames: u64) -> usize {
        let mut reclaimed = 0;
        while self.take_idle(idle_frames, 0).is_some() {
            reclaimed += 1;
        }
        reclaimed
    }

    /// Vacate one free slot idle for at least `idle_frames` frames and hand
    /// its storage to the caller
    ///
    /// Never shrinks the pool below `keep` live slots. Does not free, so the
    /// audio thread can call it and pass the box on for dropping elsewhere.
    pub fn take_idle(&mut self, idle_frames: u64, keep: usize) -> Option<Box<AudioBuffer>> {
        if self.live <= keep {
            return None;
        }
        let now = self.current_frame;
        let slot = self.slots.iter_mut().find(|slot| {
            matches!(slot.state, SlotState::Free(_))
                && now.wrapping_sub(slot.last_used_frame) >= idle_frames
        })?;
        match std::mem::replace(&mut slot.state, SlotState::Vacant) {
            SlotState::Free(buffer) => {
                self.live -= 1;
                Some(buffer)
            }
            other => {
                slot.state = other;
                None
            }
        }
    }

    /// Add a buffer allocated elsewhere as a free slot
    ///
    /// Works while sealed and never allocates: the buffer is handed back when
    /// the pool is at `max_buffers` or the slot table has no spare capacity.
    pub fn adopt(
        &mut self,
        mut buffer: Box<AudioBuffer>,
    ) -> std::result::Result<usize, Box<AudioBuffer>> {
        let has_vacant = self
            .slots
            .iter()
            .any(|slot| matches!(slot.state, SlotState::Vacant));
        if self.live >= self.max_buffers
            || (!has_vacant && self.slots.len() == self.slots.capacity())
        {
            return Err(buffer);
        }
        buffer.set_sample_rate(self.sample_rate);
        Ok(self.register(SlotState::Free(buffer)))
    }

    /// Stop the pool from allocating on acquire
    pub fn seal(&mut self) {
        self.growth_allowed = false;
    }

    /// Allow acquires to allocate again (pre-roll only)
    pub fn unseal(&mut self) {
        self.growth_allowed = true;
    }

    /// Whether acquire may allocate
    pub fn growth_allowed(&self) -> bool {
        self.growth_allowed
    }

    /// Change the live slot limit, evicting least recently used free slots
    /// when the pool is above the new limit
    ///
    /// Fails without changing anything when more buffers than `max_buffers`
    /// are on loan. Returns the number of slots evicted.
    pub fn set_max_buffers(&mut self, max_buffers: usize) -> Result<usize> {
        if max_buffers < self.active {
            return Err(NuevaError::InvalidParameter {
                name: "max_buffers",
                value: max_buffers as f64,
            });
        }

        let mut evicted = 0;
        while self.live > max_buffers {
            let lru = self
                .slots
                .iter_mut()
                .filter(|slot| matches!(slot.state, SlotState::Free(_)))
                .min_by_key(|slot| slot.last_used_frame);
            match lru {
                Some(slot) => {
                    slot.state = SlotState::Vacant;
                    self.live -= 1;
                    evicted += 1;
                }
                None => break,
            }
        }

        self.max_buffers = max_buffers;
        if let Some(extra) = max_buffers.checked_sub(self.slots.len()) {
            self.slots.reserve(extra);
        }
        Ok(evicted)
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    /// Buffers currently on loan
    pub fn active_buffers(&self) -> usize {
        self.active
    }

    /// Live slots (free or on loan)
    pub fn pool_size(&self) -> usize {
        self.live
    }

    /// Live slots not on loan
    pub fn free_buffers(&self) -> usize {
        self.live - self.active
    }

    /// Upper bound on live slots
    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    /// Current reclamation frame
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BUFFERS)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_creates_while_growing() {
        let mut pool = BufferPool::new(4);
        let buffer = pool.acquire(2, 512).unwrap();
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.num_samples(), 512);
        assert_eq!(pool.pool_size(), 1);
        assert_eq!(pool.active_buffers(), 1);
        pool.release(buffer);
        assert_eq!(pool.active_buffers(), 0);
        assert_eq!(pool.free_buffers(), 1);
    }

    #[test]
    fn test_no_double_issue_before_release() {
        let mut pool = BufferPool::new(4);
        pool.preallocate(2, 256, 2);
        pool.seal();

        let a = pool.acquire(2, 256).unwrap();
        let b = pool.acquire(2, 256).unwrap();
        assert_ne!(a.slot(), b.slot());
        assert_ne!(a.channel(0).as_ptr(), b.channel(0).as_ptr());
        assert!(pool.acquire(2, 256).is_none());

        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn test_release_allows_reuse_of_same_instance() {
        let mut pool = BufferPool::new(1);
        let first = pool.acquire(2, 512).unwrap();
        let slot = first.slot();
        let ptr = first.channel(0).as_ptr();
        pool.release(first);
        pool.seal();

        let smaller = pool.acquire(1, 128).unwrap();
        assert_eq!(smaller.slot(), slot);
        assert_eq!(smaller.channel(0).as_ptr(), ptr);
        assert_eq!(smaller.num_channels(), 1);
        assert_eq!(smaller.num_samples(), 128);
        pool.release(smaller);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut pool = BufferPool::new(2);
        let a = pool.acquire(2, 64).unwrap();
        let b = pool.acquire(2, 64).unwrap();
        assert!(pool.acquire(2, 64).is_none());
        assert_eq!(pool.pool_size(), 2);
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn test_sealed_pool_never_grows() {
        let mut pool = BufferPool::new(8);
        pool.preallocate(2, 64, 1);
        pool.seal();

        // too large for the only slot
        assert!(pool.acquire(2, 4096).is_none());
        let a = pool.acquire(2, 64).unwrap();
        assert!(pool.acquire(2, 64).is_none());
        assert_eq!(pool.pool_size(), 1);
        pool.release(a);
    }

    #[test]
    fn test_full_pool_regrows_lru_during_warmup() {
        let mut pool = BufferPool::new(2);
        pool.preallocate(1, 16, 2);
        let a = pool.acquire(1, 16).unwrap();
        pool.advance_frame();
        pool.release(a);
        // both free, both too small; the least recently used one is regrown
        let big = pool.acquire(2, 1024).unwrap();
        assert_eq!(big.num_samples(), 1024);
        assert_eq!(pool.pool_size(), 2);
        assert_eq!(big.slot(), 1);
        pool.release(big);
    }

    #[test]
    fn test_preallocated_buffers_start_free() {
        let mut pool = BufferPool::new(3);
        assert_eq!(pool.preallocate(2, 512, 10), 3);
        assert_eq!(pool.pool_size(), 3);
        assert_eq!(pool.active_buffers(), 0);
        assert_eq!(pool.free_buffers(), 3);
    }

    #[test]
    fn test_release_stamps_frame() {
        let mut pool = BufferPool::new(2);
        pool.preallocate(1, 32, 2);
        let a = pool.acquire(1, 32).unwrap();
        for _ in 0..10 {
            pool.advance_frame();
        }
        pool.release(a);

        // the untouched slot has been idle for 10 frames, the released one for 0
        assert_eq!(pool.clear_unused(5), 1);
        assert_eq!(pool.pool_size(), 1);
        assert!(pool.acquire(1, 32).is_some());
    }

    #[test]
    fn test_clear_unused_keeps_loans() {
        let mut pool = BufferPool::new(4);
        pool.preallocate(1, 32, 3);
        let held = pool.acquire(1, 32).unwrap();
        assert_eq!(pool.clear_unused(0), 2);
        assert_eq!(pool.pool_size(), 1);
        assert_eq!(pool.active_buffers(), 1);
        pool.release(held);
        assert_eq!(pool.free_buffers(), 1);
    }

    #[test]
    fn test_vacant_slots_are_reused() {
        let mut pool = BufferPool::new(2);
        pool.preallocate(1, 32, 2);
        pool.clear_unused(0);
        assert_eq!(pool.pool_size(), 0);
        assert_eq!(pool.preallocate(1, 32, 2), 2);
        assert_eq!(pool.pool_size(), 2);
        let a = pool.acquire(1, 32).unwrap();
        assert!(a.slot() < 2);
        pool.release(a);
    }

    #[test]
    fn test_foreign_buffer_is_handed_back() {
        let mut pool_a = BufferPool::new(1);
        let mut pool_b = BufferPool::new(1);
        let from_a = pool_a.acquire(1, 8).unwrap();
        let from_b = pool_b.acquire(1, 8).unwrap();

        let from_a = pool_b.try_release(from_a).unwrap_err();
        assert_eq!(pool_b.active_buffers(), 1);
        pool_b.release(from_b);
        assert_eq!(pool_b.active_buffers(), 0);

        pool_a.release(from_a);
        assert_eq!(pool_a.active_buffers(), 0);
        assert_eq!(pool_a.free_buffers(), 1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "released a buffer from another pool")]
    fn test_release_of_foreign_buffer_asserts() {
        let mut pool_a = BufferPool::new(1);
        let mut pool_b = BufferPool::new(1);
        let from_a = pool_a.acquire(1, 8).unwrap();
        pool_b.release(from_a);
    }

    #[test]
    fn test_lowering_max_buffers_evicts_free_slots() {
        let mut pool = BufferPool::new(4);
        pool.preallocate(1, 32, 4);
        let held = pool.acquire(1, 32).unwrap();

        assert_eq!(pool.set_max_buffers(2).unwrap(), 2);
        assert_eq!(pool.pool_size(), 2);
        assert_eq!(pool.max_buffers(), 2);
        assert!(pool.pool_size() <= pool.max_buffers());

        assert!(pool.set_max_buffers(0).is_err());
        assert_eq!(pool.max_buffers(), 2);
        pool.release(held);
    }

    #[test]
    fn test_take_idle_respects_floor() {
        let mut pool = BufferPool::new(4);
        pool.preallocate(1, 32, 3);
        pool.seal();
        let taken = pool.take_idle(0, 2).unwrap();
        assert_eq!(taken.num_channels(), 1);
        assert!(pool.take_idle(0, 2).is_none());
        assert_eq!(pool.pool_size(), 2);
    }

    #[test]
    fn test_adopt_fills_vacant_slots_while_sealed() {
        let mut pool = BufferPool::new(2);
        pool.preallocate(2, 64, 2);
        pool.seal();
        let spare = pool.take_idle(0, 0).unwrap();

        assert!(pool.adopt(spare).is_ok());
        assert_eq!(pool.pool_size(), 2);
        let extra = Box::new(AudioBuffer::new(2, 64));
        assert!(pool.adopt(extra).is_err());
        assert_eq!(pool.pool_size(), 2);
    }

    #[test]
    fn test_ensure_capacity_grows_free_slots() {
        let mut pool = BufferPool::new(2);
        pool.preallocate(2, 128, 2);
        assert_eq!(pool.ensure_capacity(2, 1024), 2);
        pool.seal();
        let a = pool.acquire(2, 1024).unwrap();
        pool.release(a);
    }

    #[test]
    fn test_buffers_carry_pool_sample_rate() {
        let mut pool = BufferPool::new(1).with_sample_rate(44_100.0);
        let a = pool.acquire(1, 8).unwrap();
        assert_eq!(a.sample_rate(), 44_100.0);
        pool.release(a);
    }
}
