// SPDX-FileCopyrightText: The djio authors
// SPDX-License-Identifier: MPL-2.0

//! Chunk ring buffer between the BLE stack and the MIDI parser
//!
//! Every chunk is preceded by a 2-byte header with its length (14 bits)
//! and its [`BleDataType`] (2 bits). Chunks are stored contiguously and
//! 2-byte aligned. A chunk that does not fit into the space before the
//! end of the buffer is split, the remainder continues at the start of
//! the buffer with a [`BleDataType::Continuation`] header.
//!
//! The chunk that has been popped last remains valid until the next pop.
//! When nothing is left, the consumer keeps an empty sentinel header in
//! front of the write position. Producer and consumer only communicate
//! through the number of occupied bytes, never by comparing positions.

use std::{
    cell::{Cell, UnsafeCell},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_utils::CachePadded;

use super::BleDataType;

const HEADER_LEN: usize = 2;

/// Maximum length of a single chunk.
pub const MAX_CHUNK_LEN: usize = 0x3FFF;

const fn ceil2(len: usize) -> usize {
    (len + 1) & !1
}

/// Number of occupied bytes, shared between producer and consumer.
pub trait SizeHolder {
    fn new(initial: usize) -> Self;

    fn load_acquire(&self) -> usize;

    fn add_release(&self, amount: usize);

    fn sub_release(&self, amount: usize);
}

/// Size counter for producer and consumer on the same thread.
#[derive(Debug)]
pub struct NonAtomicSize(Cell<usize>);

impl SizeHolder for NonAtomicSize {
    fn new(initial: usize) -> Self {
        Self(Cell::new(initial))
    }

    fn load_acquire(&self) -> usize {
        self.0.get()
    }

    fn add_release(&self, amount: usize) {
        self.0.set(self.0.get() + amount);
    }

    fn sub_release(&self, amount: usize) {
        self.0.set(self.0.get() - amount);
    }
}

/// Lock-free size counter for a single producer and a single consumer.
#[derive(Debug)]
pub struct AtomicSize(CachePadded<AtomicUsize>);

impl SizeHolder for AtomicSize {
    fn new(initial: usize) -> Self {
        Self(CachePadded::new(AtomicUsize::new(initial)))
    }

    fn load_acquire(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn add_release(&self, amount: usize) {
        self.0.fetch_add(amount, Ordering::Release);
    }

    fn sub_release(&self, amount: usize) {
        self.0.fetch_sub(amount, Ordering::Release);
    }
}

#[derive(Debug)]
struct RingStorage<const N: usize, S> {
    buffer: UnsafeCell<[u8; N]>,
    size: S,
}

// SAFETY: The producer only writes to unoccupied bytes and the consumer
// only accesses occupied bytes. Ownership of a region is handed over
// through the atomic size counter with release/acquire semantics.
#[allow(unsafe_code)]
unsafe impl<const N: usize> Sync for RingStorage<N, AtomicSize> {}

/// Where a pushed chunk ends up.
enum Layout {
    Contiguous,
    /// Header slot at the very end, skipped by a padding header.
    Padded,
    Split { head_len: usize },
}

#[allow(unsafe_code)]
impl<const N: usize, S> RingStorage<N, S>
where
    S: SizeHolder,
{
    fn new() -> Self {
        const {
            assert!(N >= 2 * HEADER_LEN, "capacity too small");
            assert!(N % 2 == 0, "capacity must be even");
        };
        Self {
            // Starts with an empty sentinel header at position 0
            buffer: UnsafeCell::new([0; N]),
            size: S::new(HEADER_LEN),
        }
    }

    fn base(&self) -> *mut u8 {
        self.buffer.get().cast::<u8>()
    }

    /// # Safety
    ///
    /// The range must be owned by the caller.
    unsafe fn write_bytes(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= N);
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(offset), data.len());
    }

    /// # Safety
    ///
    /// The range must be owned by the caller.
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn write_header(&self, offset: usize, len: usize, kind: BleDataType) {
        debug_assert!(len <= MAX_CHUNK_LEN);
        let header = (len as u16) | (u16::from(kind as u8) << 14);
        self.write_bytes(offset, &header.to_le_bytes());
    }

    /// # Safety
    ///
    /// The header must be owned by the caller.
    unsafe fn read_header(&self, offset: usize) -> (usize, BleDataType) {
        let bytes = self.bytes(offset, HEADER_LEN);
        let header = u16::from_le_bytes([bytes[0], bytes[1]]);
        let len = usize::from(header & 0x3FFF);
        #[allow(clippy::cast_possible_truncation)]
        let kind = BleDataType::from_repr((header >> 14) as u8).unwrap_or_default();
        (len, kind)
    }

    /// # Safety
    ///
    /// The range must be owned by the caller and must not be written
    /// while the returned slice is alive.
    unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= N);
        std::slice::from_raw_parts(self.base().add(offset), len)
    }

    /// # Safety
    ///
    /// Must only be invoked by the single producer.
    unsafe fn push(&self, write_p: &mut usize, data: &[u8], kind: BleDataType) -> bool {
        debug_assert_ne!(BleDataType::None, kind);
        let len = data.len();
        if len > MAX_CHUNK_LEN {
            return false;
        }
        let size = self.size.load_acquire();
        let wp = *write_p;
        let contiguous = N - wp - HEADER_LEN;
        let (layout, needed) = if len <= contiguous {
            (Layout::Contiguous, HEADER_LEN + ceil2(len))
        } else if contiguous == 0 {
            (Layout::Padded, 2 * HEADER_LEN + ceil2(len))
        } else {
            let head_len = contiguous;
            let needed = 2 * HEADER_LEN + head_len + ceil2(len - head_len);
            (Layout::Split { head_len }, needed)
        };
        if size + needed > N {
            return false;
        }
        match layout {
            Layout::Contiguous => {
                self.write_header(wp, len, kind);
                self.write_bytes(wp + HEADER_LEN, data);
            }
            Layout::Padded => {
                self.write_header(wp, 0, BleDataType::None);
                self.write_header(0, len, kind);
                self.write_bytes(HEADER_LEN, data);
            }
            Layout::Split { head_len } => {
                let (head, tail) = data.split_at(head_len);
                self.write_header(wp, head.len(), kind);
                self.write_bytes(wp + HEADER_LEN, head);
                self.write_header(0, tail.len(), BleDataType::Continuation);
                self.write_bytes(HEADER_LEN, tail);
            }
        }
        *write_p = (wp + needed) % N;
        self.size.add_release(needed);
        true
    }

    /// Release the current chunk and advance to the next one.
    ///
    /// # Safety
    ///
    /// Must only be invoked by the single consumer.
    unsafe fn pop(&self, read_p: &mut usize) -> BleDataType {
        loop {
            let (old_len, _) = self.read_header(*read_p);
            let old_len = ceil2(old_len);
            if self.size.load_acquire() - HEADER_LEN == old_len {
                // Nothing new, move the sentinel in front of the write position
                *read_p += old_len;
                self.write_header(*read_p, 0, BleDataType::None);
                self.size.sub_release(old_len);
                return BleDataType::None;
            }
            *read_p = (*read_p + HEADER_LEN + old_len) % N;
            self.size.sub_release(HEADER_LEN + old_len);
            let (_, kind) = self.read_header(*read_p);
            if kind != BleDataType::None {
                return kind;
            }
            // Skip padding
        }
    }

    /// # Safety
    ///
    /// Must only be invoked by the single consumer.
    unsafe fn current(&self, read_p: usize) -> (BleDataType, &[u8]) {
        let (len, kind) = self.read_header(read_p);
        (kind, self.bytes(read_p + HEADER_LEN, len))
    }
}

/// Ring buffer for BLE-MIDI chunks.
///
/// Pushing and popping on the same thread works with the default
/// [`NonAtomicSize`]. Use [`AtomicSize`] and [`split()`](Self::split)
/// for a producer and a consumer on different threads.
#[derive(Debug)]
pub struct BleRingBuf<const N: usize, S = NonAtomicSize> {
    storage: Box<RingStorage<N, S>>,
    write_p: usize,
    read_p: usize,
}

#[allow(unsafe_code)]
impl<const N: usize, S> BleRingBuf<N, S>
where
    S: SizeHolder,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: Box::new(RingStorage::new()),
            write_p: HEADER_LEN,
            read_p: 0,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Append a chunk.
    ///
    /// Returns `false` without storing anything if there is not enough room.
    pub fn push(&mut self, data: &[u8], kind: BleDataType) -> bool {
        // SAFETY: Exclusive access through &mut self
        let pushed = unsafe { self.storage.push(&mut self.write_p, data, kind) };
        if !pushed {
            log::warn!("Failed to push {len} bytes into BLE ring buffer", len = data.len());
        }
        pushed
    }

    /// Release the current chunk and advance to the next one.
    pub fn pop(&mut self) -> BleDataType {
        // SAFETY: Exclusive access through &mut self
        unsafe { self.storage.pop(&mut self.read_p) }
    }

    /// The chunk that has been popped last.
    #[must_use]
    pub fn current(&self) -> (BleDataType, &[u8]) {
        // SAFETY: The current chunk is not written until the next pop
        unsafe { self.storage.current(self.read_p) }
    }

    /// Pop the next chunk, if any.
    pub fn pop_chunk(&mut self) -> Option<(BleDataType, &[u8])> {
        match self.pop() {
            BleDataType::None => None,
            _ => Some(self.current()),
        }
    }
}

impl<const N: usize, S> Default for BleRingBuf<N, S>
where
    S: SizeHolder,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> BleRingBuf<N, AtomicSize> {
    /// Split into the producer and consumer halves.
    #[must_use]
    pub fn split(self) -> (BleRingProducer<N>, BleRingConsumer<N>) {
        let Self {
            storage,
            write_p,
            read_p,
        } = self;
        let storage = Arc::<RingStorage<N, AtomicSize>>::from(storage);
        let producer = BleRingProducer {
            storage: Arc::clone(&storage),
            write_p,
        };
        let consumer = BleRingConsumer { storage, read_p };
        (producer, consumer)
    }
}

/// Pushing half of a [`BleRingBuf`], e.g. for a BLE stack callback.
#[derive(Debug)]
pub struct BleRingProducer<const N: usize> {
    storage: Arc<RingStorage<N, AtomicSize>>,
    write_p: usize,
}

#[allow(unsafe_code)]
impl<const N: usize> BleRingProducer<N> {
    pub fn push(&mut self, data: &[u8], kind: BleDataType) -> bool {
        // SAFETY: There is only a single producer
        let pushed = unsafe { self.storage.push(&mut self.write_p, data, kind) };
        if !pushed {
            log::warn!("Failed to push {len} bytes into BLE ring buffer", len = data.len());
        }
        pushed
    }
}

/// Popping half of a [`BleRingBuf`].
#[derive(Debug)]
pub struct BleRingConsumer<const N: usize> {
    storage: Arc<RingStorage<N, AtomicSize>>,
    read_p: usize,
}

#[allow(unsafe_code)]
impl<const N: usize> BleRingConsumer<N> {
    pub fn pop(&mut self) -> BleDataType {
        // SAFETY: There is only a single consumer
        unsafe { self.storage.pop(&mut self.read_p) }
    }

    #[must_use]
    pub fn current(&self) -> (BleDataType, &[u8]) {
        // SAFETY: The current chunk is not written until the next pop
        unsafe { self.storage.current(self.read_p) }
    }

    pub fn pop_chunk(&mut self) -> Option<(BleDataType, &[u8])> {
        match self.pop() {
            BleDataType::None => None,
            _ => Some(self.current()),
        }
    }
}
