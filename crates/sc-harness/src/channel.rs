//! The streaming channel: a bounded, thread-safe, forward-only byte pipe
//!
//! A channel emulates file semantics (sequential read, one-byte pushback, no
//! seek) between an encode producer and a decode consumer running on
//! independent threads. The producer's `write` blocks while the ring is
//! full; the consumer's `read` blocks while it is empty and end-of-input has
//! not been signaled. Those are the only two blocking points in the rig.
//!
//! A zero-capacity channel silently discards all writes and never blocks,
//! which disables decode-side verification without branching call sites.

use std::fs::File;
use std::io::Write;

use parking_lot::{Condvar, Mutex};

use crate::codec::{BlockSink, ByteSource};
use crate::fuzz::FaultInjector;
use crate::prng::SharedPrng;

/// Counter snapshot for reporting after a run.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ChannelStats {
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub first_block_size: u64,
    /// Times the producer blocked on a full ring.
    pub full_waits: u64,
    /// Times the consumer blocked on an empty ring.
    pub empty_waits: u64,
    /// Fault-injection hits landed on this channel.
    pub fuzz_hits: u64,
    pub capture_failed: bool,
}

struct Inner {
    ring: Box<[u8]>,
    head: usize,
    tail: usize,
    used: usize,
    push_back: Option<u8>,
    done: bool,
    capture: Option<File>,
    stats: ChannelStats,
}

/// Fault-injection state for a channel: the injector plus the generator it
/// draws from, shared with (and advanced by) the producer's synthesis loop.
struct FuzzState {
    injector: FaultInjector,
    prng: SharedPrng,
    hits: std::sync::atomic::AtomicU64,
}

/// Bounded blocking byte pipe with one-byte pushback.
pub struct StreamChannel {
    inner: Mutex<Inner>,
    /// Wakes a producer blocked on a full ring.
    space: Condvar,
    /// Wakes a consumer blocked on an empty ring.
    data: Condvar,
    fuzz: Option<FuzzState>,
}

impl StreamChannel {
    /// Create a channel with the given ring capacity in bytes. Capacity zero
    /// creates a sink that swallows writes and reads back nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                used: 0,
                push_back: None,
                done: false,
                capture: None,
                stats: ChannelStats::default(),
            }),
            space: Condvar::new(),
            data: Condvar::new(),
            fuzz: None,
        }
    }

    /// Create a channel that corrupts written bytes in flight, drawing fuzz
    /// decisions from the shared generator.
    pub fn with_fuzz(capacity: usize, injector: FaultInjector, prng: SharedPrng) -> Self {
        let mut channel = Self::new(capacity);
        channel.fuzz = Some(FuzzState {
            injector,
            prng,
            hits: std::sync::atomic::AtomicU64::new(0),
        });
        channel
    }

    /// Total fault-injection hits landed on this channel so far.
    pub fn fuzz_hits(&self) -> u64 {
        self.fuzz
            .as_ref()
            .map(|fuzz| fuzz.hits.load(std::sync::atomic::Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Mirror every written byte verbatim to `file`. A write failure is
    /// recorded and capture stops, but streaming continues unaffected.
    pub fn set_capture(&self, file: File) {
        self.inner.lock().capture = Some(file);
    }

    /// Write a block into the channel, fuzzing it in place first when
    /// configured. Blocks while the ring lacks capacity. Returns `false`
    /// only for an empty buffer.
    pub fn write(&self, block: &mut [u8]) -> bool {
        if block.is_empty() {
            return false;
        }

        // Corruption happens before the bytes become shared state, and the
        // injector restores the generator, so the producer's own sequence is
        // unaffected.
        if let Some(fuzz) = &self.fuzz {
            let mut prng = fuzz.prng.lock();
            let hits = fuzz.injector.corrupt(&mut prng, block);
            fuzz.hits
                .fetch_add(hits as u64, std::sync::atomic::Ordering::Relaxed);
        }

        let mut inner = self.inner.lock();

        if inner.stats.first_block_size == 0 {
            inner.stats.first_block_size = block.len() as u64;
        }
        inner.stats.bytes_written += block.len() as u64;

        if let Some(file) = inner.capture.as_mut() {
            if let Err(err) = file.write_all(block) {
                log::warn!("capture write failed, dropping capture file: {err}");
                inner.stats.capture_failed = true;
                inner.capture = None;
            }
        }

        let capacity = inner.ring.len();
        if capacity == 0 {
            // No ring attached: swallow the data silently.
            return true;
        }

        let mut offset = 0;
        while offset < block.len() {
            if inner.used == capacity {
                inner.stats.full_waits += 1;
                self.space.wait(&mut inner);
                continue;
            }

            let head = inner.head;
            let chunk = (block.len() - offset)
                .min(capacity - inner.used)
                .min(capacity - head);

            inner.ring[head..head + chunk].copy_from_slice(&block[offset..offset + chunk]);
            inner.head = (head + chunk) % capacity;
            inner.used += chunk;
            offset += chunk;

            self.data.notify_one();
        }

        true
    }

    /// Read up to `buf.len()` bytes: a pending pushed-back byte first, then
    /// ring content. Blocks while nothing is available and end-of-input has
    /// not been signaled; a short read means end-of-input, not an error.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let capacity = inner.ring.len();
        let mut filled = 0;

        while filled < buf.len() {
            if let Some(byte) = inner.push_back.take() {
                buf[filled] = byte;
                filled += 1;
            } else if inner.used > 0 {
                let tail = inner.tail;
                let chunk = (buf.len() - filled).min(inner.used).min(capacity - tail);

                buf[filled..filled + chunk].copy_from_slice(&inner.ring[tail..tail + chunk]);
                inner.tail = (tail + chunk) % capacity;
                inner.used -= chunk;
                inner.stats.bytes_read += chunk as u64;
                filled += chunk;

                self.space.notify_one();
            } else if inner.done {
                break;
            } else {
                inner.stats.empty_waits += 1;
                self.data.wait(&mut inner);
            }
        }

        self.space.notify_one();
        filled
    }

    /// Store one byte to be returned ahead of any buffered content by the
    /// next read. Returns `false` if a pushed-back byte is already pending.
    pub fn push_back(&self, byte: u8) -> bool {
        let mut inner = self.inner.lock();
        if inner.push_back.is_some() {
            return false;
        }
        inner.push_back = Some(byte);
        true
    }

    /// Signal end-of-input and wake any blocked reader. Idempotent, and safe
    /// to call with no reader attached.
    pub fn signal_end(&self) {
        let mut inner = self.inner.lock();
        inner.done = true;
        self.data.notify_all();
    }

    /// True once the producer has signaled end-of-input.
    pub fn is_done(&self) -> bool {
        self.inner.lock().done
    }

    /// Close any capture file and free the ring. Safe on zero-capacity
    /// channels; also happens implicitly on drop.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        inner.capture = None;
        inner.ring = Box::default();
        inner.head = 0;
        inner.tail = 0;
        inner.used = 0;
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ChannelStats {
        let mut stats = self.inner.lock().stats;
        stats.fuzz_hits = self.fuzz_hits();
        stats
    }
}

impl BlockSink for StreamChannel {
    fn write_block(&self, block: &mut [u8]) -> bool {
        self.write(block)
    }
}

impl ByteSource for StreamChannel {
    fn read(&self, buf: &mut [u8]) -> usize {
        StreamChannel::read(self, buf)
    }

    fn push_back(&self, byte: u8) -> bool {
        StreamChannel::push_back(self, byte)
    }
}
