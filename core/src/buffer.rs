//! Sample buffers bridging the real-time audio callback and the modem.
//!
//! Every operation takes a single short-lived lock and does at most one
//! chunk-sized copy, so the audio callback never waits on unbounded work.

use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::DEFAULT_RING_CAPACITY;

struct RingState {
    data: Vec<i16>,
    len: usize,
    tail: usize,
}

/// Fixed-capacity ring of captured chunks.
///
/// When full, a push overwrites the oldest chunk. The producer (audio
/// callback) is never blocked by a slow consumer; sustained overrun loses
/// the oldest audio instead.
pub struct InboundRing {
    chunk_size: usize,
    capacity: usize,
    state: Mutex<RingState>,
}

impl InboundRing {
    pub fn new(chunk_size: usize) -> Self {
        Self::with_capacity(chunk_size, DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(chunk_size: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunk_size,
            capacity,
            state: Mutex::new(RingState {
                data: vec![0; chunk_size * capacity],
                len: 0,
                tail: 0,
            }),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of chunks currently retained.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy one chunk into the next slot.
    ///
    /// Shorter input is zero-filled to a full chunk, longer input is cut.
    pub fn push(&self, src: &[i16]) {
        self.push_scaled(src, 1.0);
    }

    /// Copy one chunk into the next slot, applying `gain` on the way in.
    pub fn push_scaled(&self, src: &[i16], gain: f32) {
        let n = src.len().min(self.chunk_size);
        let mut state = self.state.lock();
        let start = state.tail * self.chunk_size;
        let slot = &mut state.data[start..start + self.chunk_size];

        if gain == 1.0 {
            slot[..n].copy_from_slice(&src[..n]);
        } else {
            for (dst, &s) in slot[..n].iter_mut().zip(src) {
                *dst = (s as f32 * gain).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
        }
        slot[n..].fill(0);

        state.tail = (state.tail + 1) % self.capacity;
        if state.len < self.capacity {
            state.len += 1;
        }
    }

    /// Append the oldest chunk to `dst`. Returns false when the ring is empty.
    pub fn pop_into(&self, dst: &mut Vec<i16>) -> bool {
        let mut state = self.state.lock();
        if state.len == 0 {
            return false;
        }

        let idx = (state.tail + self.capacity - state.len) % self.capacity;
        let start = idx * self.chunk_size;
        state.len -= 1;
        dst.extend_from_slice(&state.data[start..start + self.chunk_size]);
        true
    }

    /// Remove and return the oldest chunk.
    pub fn pop(&self) -> Option<Vec<i16>> {
        let mut chunk = Vec::with_capacity(self.chunk_size);
        self.pop_into(&mut chunk).then_some(chunk)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.len = 0;
        state.tail = 0;
    }
}

struct OutboundEntry {
    samples: Vec<i16>,
    cursor: usize,
}

/// Unbounded queue of sample sequences waiting to be played.
///
/// Each sequence is zero-padded to a whole number of chunks and is handed
/// out one chunk at a time.
pub struct OutboundQueue {
    chunk_size: usize,
    queue: Mutex<VecDeque<OutboundEntry>>,
}

impl OutboundQueue {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Chunks still waiting to be popped across all queued sequences.
    pub fn pending_chunks(&self) -> usize {
        self.queue
            .lock()
            .iter()
            .map(|e| (e.samples.len() - e.cursor) / self.chunk_size)
            .sum()
    }

    pub fn push(&self, mut samples: Vec<i16>) {
        if samples.is_empty() || self.chunk_size == 0 {
            return;
        }

        let pad = (self.chunk_size - samples.len() % self.chunk_size) % self.chunk_size;
        samples.resize(samples.len() + pad, 0);

        self.queue.lock().push_back(OutboundEntry { samples, cursor: 0 });
    }

    /// Copy the next chunk into `dst`.
    ///
    /// Returns false and leaves `dst` untouched when nothing is queued.
    pub fn pop(&self, dst: &mut [i16]) -> bool {
        let mut queue = self.queue.lock();
        let Some(entry) = queue.front_mut() else {
            return false;
        };

        let end = entry.cursor + self.chunk_size;
        let n = dst.len().min(self.chunk_size);
        dst[..n].copy_from_slice(&entry.samples[entry.cursor..entry.cursor + n]);
        entry.cursor = end;

        if entry.cursor >= entry.samples.len() {
            queue.pop_front();
        }
        true
    }

    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

/// The buffer pair shared between the engine, its worker and the audio callback.
pub struct IoBuffers {
    pub input: InboundRing,
    pub output: OutboundQueue,
}

impl IoBuffers {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            input: InboundRing::new(chunk_size),
            output: OutboundQueue::new(chunk_size),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.input.chunk_size()
    }

    pub fn clear(&self) {
        self.input.clear();
        self.output.clear();
    }
}
