//! Lock-free single-producer / single-consumer queue of fixed-size sample blocks.
//!
//! The audio thread owns the [`BlockProducer`] and the UI thread owns the
//! [`BlockConsumer`]. Both sides only copy into or out of preallocated slots,
//! so neither ever allocates, locks or waits on the other.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::ScopeError;

/// log2 of the default block size.
pub const BLOCK_ORDER: u32 = 9;
pub const BLOCK_SIZE: usize = 1 << BLOCK_ORDER;
pub const NUM_SLOTS: usize = 5;

/// Outcome of [`BlockProducer::push`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Push {
    Queued,
    /// Every slot was still unread; the block was discarded.
    Dropped,
}

struct Shared {
    block_size: usize,
    slots: Box<[UnsafeCell<Box<[f32]>>]>,
    // Cursors run over 0..2 * slots so that "full" and "empty" stay distinct.
    write: AtomicUsize,
    read: AtomicUsize,
    dropped: AtomicU64,
}

// SAFETY: a slot is only touched by the producer while it is free and only by
// the consumer while it is published. Ownership of a slot changes hands through
// a release store on one cursor paired with an acquire load on the other.
unsafe impl Sync for Shared {}

impl Shared {
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn distance(&self, write: usize, read: usize) -> usize {
        let span = 2 * self.capacity();
        (write + span - read) % span
    }

    fn advance(&self, cursor: usize) -> usize {
        let next = cursor + 1;
        if next == 2 * self.capacity() { 0 } else { next }
    }

    fn slot(&self, cursor: usize) -> &UnsafeCell<Box<[f32]>> {
        &self.slots[cursor % self.capacity()]
    }

    fn check_len(&self, actual: usize) -> Result<(), ScopeError> {
        if actual == self.block_size {
            Ok(())
        } else {
            Err(ScopeError::BlockLength {
                expected: self.block_size,
                actual,
            })
        }
    }

    fn ready(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        self.distance(write, read)
    }
}

pub struct BlockQueue;

impl BlockQueue {
    /// Allocates `num_slots` blocks of `block_size` samples and splits the
    /// queue into its two halves.
    pub fn new(
        block_size: usize,
        num_slots: usize,
    ) -> Result<(BlockProducer, BlockConsumer), ScopeError> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(ScopeError::BlockSize(block_size));
        }
        if num_slots == 0 {
            return Err(ScopeError::NoSlots);
        }

        let slots = (0..num_slots)
            .map(|_| UnsafeCell::new(vec![0.0; block_size].into_boxed_slice()))
            .collect();
        let shared = Arc::new(Shared {
            block_size,
            slots,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
        });

        Ok((
            BlockProducer {
                shared: Arc::clone(&shared),
            },
            BlockConsumer { shared },
        ))
    }

    pub fn with_defaults() -> Result<(BlockProducer, BlockConsumer), ScopeError> {
        Self::new(BLOCK_SIZE, NUM_SLOTS)
    }
}

/// Write half of the queue. Lives on the audio thread.
pub struct BlockProducer {
    shared: Arc<Shared>,
}

impl BlockProducer {
    /// Copies `block` into the next free slot and publishes it.
    ///
    /// When every slot is still waiting to be read the new block is dropped
    /// and the queued ones are kept.
    pub fn push(&mut self, block: &[f32]) -> Result<Push, ScopeError> {
        let shared = &*self.shared;
        shared.check_len(block.len())?;

        let write = shared.write.load(Ordering::Relaxed);
        let read = shared.read.load(Ordering::Acquire);
        if shared.distance(write, read) == shared.capacity() {
            shared.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(Push::Dropped);
        }

        // SAFETY: the slot at `write` is free, and the consumer will not look
        // at it until the release store below publishes it.
        unsafe {
            (*shared.slot(write).get()).copy_from_slice(block);
        }
        shared.write.store(shared.advance(write), Ordering::Release);
        Ok(Push::Queued)
    }

    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }

    #[cfg(test)]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

/// Read half of the queue. Lives on the UI thread.
pub struct BlockConsumer {
    shared: Arc<Shared>,
}

impl BlockConsumer {
    /// Copies the oldest published block into `destination` and frees its slot.
    ///
    /// Returns `Ok(false)` and leaves `destination` untouched when nothing is
    /// ready.
    pub fn pop(&mut self, destination: &mut [f32]) -> Result<bool, ScopeError> {
        let shared = &*self.shared;
        shared.check_len(destination.len())?;

        let read = shared.read.load(Ordering::Relaxed);
        let write = shared.write.load(Ordering::Acquire);
        if shared.distance(write, read) == 0 {
            return Ok(false);
        }

        // SAFETY: the slot at `read` was published by the producer's release
        // store, which the acquire load above synchronises with. The producer
        // cannot reuse it until the release store below frees it.
        unsafe {
            destination.copy_from_slice(&*shared.slot(read).get());
        }
        shared.read.store(shared.advance(read), Ordering::Release);
        Ok(true)
    }

    pub fn block_size(&self) -> usize {
        self.shared.block_size
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Number of published blocks waiting to be popped.
    pub fn len(&self) -> usize {
        self.shared.ready()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks the producer had to discard because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
