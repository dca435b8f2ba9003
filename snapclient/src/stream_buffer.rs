use ringbuf::{traits::*, HeapRb};
use std::io::{self, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Default capacity of the stream buffer (1 MiB)
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

struct Inner {
    ring: HeapRb<u8>,
    closed: bool,
    /// Bumped by `detach_readers`; readers from an older generation see EOF
    generation: u64,
    /// Set while a decoder is being opened on the writer's thread
    non_blocking: bool,
}

/// Bounded circular byte buffer between the receive loop and the decoder.
///
/// Every operation takes the internal lock, so one writer and one reader can
/// use it concurrently through an `Arc`. Writes never block: bytes that do
/// not fit are dropped and the number actually stored is returned. A stalled
/// player therefore costs audio, never the network stream.
pub struct StreamBuffer {
    inner: Mutex<Inner>,
    data_ready: Condvar,
    capacity: usize,
}

impl StreamBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                ring: HeapRb::new(capacity),
                closed: false,
                generation: 0,
                non_blocking: false,
            }),
            data_ready: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append as much of `bytes` as fits; the rest is dropped
    pub fn write(&self, bytes: &[u8]) -> usize {
        let written = self.lock().ring.push_slice(bytes);
        if written > 0 {
            self.data_ready.notify_all();
        }
        written
    }

    /// Remove up to `max_bytes` from the front without blocking
    pub fn read(&self, max_bytes: usize) -> Vec<u8> {
        let mut inner = self.lock();
        let mut bytes = vec![0u8; max_bytes.min(inner.ring.occupied_len())];
        let read = inner.ring.pop_slice(&mut bytes);
        bytes.truncate(read);
        bytes
    }

    pub fn occupied(&self) -> usize {
        self.lock().ring.occupied_len()
    }

    pub fn free(&self) -> usize {
        self.lock().ring.vacant_len()
    }

    /// Discard everything buffered
    pub fn reset(&self) {
        self.lock().ring.clear();
    }

    /// Mark the stream as finished. Blocking readers drain what is left and
    /// then see end of stream.
    pub fn close(&self) {
        self.lock().closed = true;
        self.data_ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// End the stream for every reader created so far without closing the
    /// buffer. Bytes written afterwards are left for the next reader.
    pub fn detach_readers(&self) {
        self.lock().generation += 1;
        self.data_ready.notify_all();
    }

    /// Readers report end of stream on an empty buffer instead of waiting
    /// until the returned guard is dropped.
    ///
    /// The receive loop is the only writer, so a decoder opened on its thread
    /// must never wait for bytes that only the loop could deliver.
    pub fn non_blocking_reads(&self) -> NonBlockingReads<'_> {
        self.lock().non_blocking = true;
        NonBlockingReads { buffer: self }
    }

    /// Blocking `Read` view for decoders
    pub fn reader(self: &Arc<Self>) -> BufferReader {
        BufferReader {
            generation: self.lock().generation,
            buffer: Arc::clone(self),
        }
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Restores blocking reads when dropped
pub struct NonBlockingReads<'a> {
    buffer: &'a StreamBuffer,
}

impl Drop for NonBlockingReads<'_> {
    fn drop(&mut self) {
        self.buffer.lock().non_blocking = false;
    }
}

/// Reads from a [`StreamBuffer`], waiting for data instead of reporting end
/// of stream while the buffer is open.
pub struct BufferReader {
    buffer: Arc<StreamBuffer>,
    generation: u64,
}

impl Read for BufferReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut inner = self.buffer.lock();
        loop {
            if inner.generation != self.generation {
                return Ok(0);
            }
            let read = inner.ring.pop_slice(buf);
            if read > 0 {
                return Ok(read);
            }
            if inner.closed || inner.non_blocking {
                return Ok(0);
            }
            inner = self
                .buffer
                .data_ready
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
