use crate::stream_buffer::StreamBuffer;
use log::info;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Counters updated by the receive loop and read by the reporter.
/// Values are read independently, so a snapshot may be slightly skewed.
///
/// `packets` and `bytes` cover every complete frame, malformed ones
/// included. A handoff is counted once per decoder open, either in
/// `handoffs` when playback started or in `handoff_failures`.
#[derive(Debug, Default)]
pub struct Statistics {
    packets: AtomicU64,
    bytes: AtomicU64,
    audio_bytes: AtomicU64,
    dropped_bytes: AtomicU64,
    malformed: AtomicU64,
    handoffs: AtomicU64,
    handoff_failures: AtomicU64,
    codec: Mutex<Option<String>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One frame received, `size` being its payload length
    pub fn record_packet(&self, size: u32) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(u64::from(size), Ordering::Relaxed);
    }

    pub fn record_audio(&self, received: usize, stored: usize) {
        self.audio_bytes
            .fetch_add(received as u64, Ordering::Relaxed);
        self.dropped_bytes
            .fetch_add(received.saturating_sub(stored) as u64, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Playback started on the pending codec
    pub fn record_handoff(&self) {
        self.handoffs.fetch_add(1, Ordering::Relaxed);
    }

    /// The decoder or sink refused the pending codec
    pub fn record_handoff_failure(&self) {
        self.handoff_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_codec(&self, codec: &str) {
        *self.codec.lock().unwrap_or_else(PoisonError::into_inner) = Some(codec.to_string());
    }

    pub fn codec(&self) -> Option<String> {
        self.codec
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, buffer: &StreamBuffer) -> StatsSnapshot {
        StatsSnapshot {
            packets: self.packets(),
            bytes: self.bytes(),
            audio_bytes: self.audio_bytes.load(Ordering::Relaxed),
            dropped_bytes: self.dropped_bytes.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            handoffs: self.handoffs.load(Ordering::Relaxed),
            handoff_failures: self.handoff_failures.load(Ordering::Relaxed),
            codec: self.codec(),
            buffer_occupied: buffer.occupied(),
            buffer_capacity: buffer.capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets: u64,
    pub bytes: u64,
    pub audio_bytes: u64,
    pub dropped_bytes: u64,
    pub malformed: u64,
    pub handoffs: u64,
    pub handoff_failures: u64,
    pub codec: Option<String>,
    pub buffer_occupied: usize,
    pub buffer_capacity: usize,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "packets={} bytes={} audio={} dropped={} malformed={} handoffs={}/{} codec={} buffer={}/{}",
            self.packets,
            self.bytes,
            self.audio_bytes,
            self.dropped_bytes,
            self.malformed,
            self.handoffs,
            self.handoffs + self.handoff_failures,
            self.codec.as_deref().unwrap_or("-"),
            self.buffer_occupied,
            self.buffer_capacity
        )
    }
}

/// Logs a statistics snapshot at a fixed interval until stopped or dropped
pub struct StatsReporter {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StatsReporter {
    pub fn spawn(stats: Arc<Statistics>, buffer: Arc<StreamBuffer>, interval: Duration) -> Self {
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&should_stop);
        let step = Duration::from_millis(50).min(interval);

        let handle = thread::spawn(move || {
            let mut waited = Duration::ZERO;
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(step);
                waited += step;
                if waited >= interval {
                    waited = Duration::ZERO;
                    info!("📊 {}", stats.snapshot(&buffer));
                }
            }
        });

        Self {
            should_stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.should_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
