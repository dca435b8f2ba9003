use crate::error::CodecInitError;
use crate::stream_buffer::StreamBuffer;
use log::{debug, info};
use std::collections::HashMap;

/// Buffered bytes required before the decoder is opened
pub const DEFAULT_THRESHOLD: usize = 10 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerState {
    /// No codec pending, or the pending one was already handed off
    Idle,
    /// A codec header arrived and waits for enough buffered data
    Armed { codec: String },
}

/// Decides when buffered data is handed to a decoder.
///
/// Each codec header arms the trigger once; the next check that sees more
/// than the threshold buffered fires the handoff and returns to idle, whether
/// the handoff succeeds or not.
#[derive(Debug, Clone)]
pub struct PlaybackTrigger {
    state: TriggerState,
    threshold: usize,
    codec_thresholds: HashMap<String, usize>,
    attempts: u64,
}

impl PlaybackTrigger {
    pub fn new(threshold: usize) -> Self {
        Self {
            state: TriggerState::Idle,
            threshold,
            codec_thresholds: HashMap::new(),
            attempts: 0,
        }
    }

    /// Use a different threshold for one codec
    pub fn with_codec_threshold(mut self, codec: impl Into<String>, threshold: usize) -> Self {
        self.codec_thresholds.insert(codec.into(), threshold);
        self
    }

    pub fn state(&self) -> &TriggerState {
        &self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, TriggerState::Armed { .. })
    }

    /// Number of times the trigger fired, successful or not
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn threshold_for(&self, codec: &str) -> usize {
        self.codec_thresholds
            .get(codec)
            .copied()
            .unwrap_or(self.threshold)
    }

    /// A codec header was received. Replaces any codec still pending.
    pub fn arm(&mut self, codec: &str) {
        if let TriggerState::Armed { codec: previous } = &self.state {
            debug!("Codec {} replaced before handoff by {}", previous, codec);
        }
        self.state = TriggerState::Armed {
            codec: codec.to_string(),
        };
    }

    /// Evaluate the trigger against the buffer and run `handoff` if it fires.
    ///
    /// Returns `Ok(true)` when a handoff succeeded, `Ok(false)` when nothing
    /// fired. A failed handoff also leaves the trigger idle.
    pub fn check<F>(&mut self, buffer: &StreamBuffer, handoff: F) -> Result<bool, CodecInitError>
    where
        F: FnOnce(&str) -> Result<(), CodecInitError>,
    {
        let codec = match &self.state {
            TriggerState::Armed { codec } => codec,
            TriggerState::Idle => return Ok(false),
        };

        let occupied = buffer.occupied();
        if occupied <= self.threshold_for(codec) {
            return Ok(false);
        }

        let TriggerState::Armed { codec } = std::mem::replace(&mut self.state, TriggerState::Idle)
        else {
            return Ok(false);
        };

        info!(
            "🎬 Handing {} stream to decoder with {} buffered bytes",
            codec, occupied
        );
        self.attempts += 1;
        handoff(&codec).map(|_| true)
    }
}

impl Default for PlaybackTrigger {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_header_arms_trigger() {
        let mut trigger = PlaybackTrigger::default();
        assert_eq!(trigger.state(), &TriggerState::Idle);

        trigger.arm("pcm");
        assert_eq!(
            trigger.state(),
            &TriggerState::Armed {
                codec: "pcm".to_string()
            }
        );
    }

    #[test]
    fn test_fires_once_after_crossing_threshold() {
        let buffer = StreamBuffer::new(64 * 1024);
        let mut trigger = PlaybackTrigger::new(10_240);
        let mut calls = Vec::new();

        trigger.arm("pcm");
        buffer.write(&[0u8; 44]);

        for _ in 0..40 {
            buffer.write(&[0u8; 1024]);
            let occupied = buffer.occupied();
            let fired = trigger
                .check(&buffer, |codec| {
                    calls.push(codec.to_string());
                    Ok(())
                })
                .unwrap();
            if fired {
                assert!(occupied > 10_240);
            }
        }

        // Drain and cross the threshold again without a new codec header
        buffer.reset();
        for _ in 0..20 {
            buffer.write(&[0u8; 1024]);
            trigger
                .check(&buffer, |codec| {
                    calls.push(codec.to_string());
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(calls, vec!["pcm".to_string()]);
        assert_eq!(trigger.attempts(), 1);
        assert!(!trigger.is_armed());
    }

    #[test]
    fn test_exactly_threshold_does_not_fire() {
        let buffer = StreamBuffer::new(20_000);
        let mut trigger = PlaybackTrigger::new(10_240);
        trigger.arm("pcm");

        buffer.write(&vec![0u8; 10_240]);
        assert!(!trigger.check(&buffer, |_| Ok(())).unwrap());
        assert!(trigger.is_armed());

        buffer.write(&[0u8]);
        assert!(trigger.check(&buffer, |_| Ok(())).unwrap());
    }

    #[test]
    fn test_failed_handoff_disarms() {
        let buffer = StreamBuffer::new(20_000);
        let mut trigger = PlaybackTrigger::new(100);
        trigger.arm("aac");
        buffer.write(&[0u8; 200]);

        let err = trigger
            .check(&buffer, |codec| {
                Err(CodecInitError::UnsupportedCodec(codec.to_string()))
            })
            .unwrap_err();
        assert_eq!(err, CodecInitError::UnsupportedCodec("aac".to_string()));
        assert_eq!(trigger.state(), &TriggerState::Idle);

        // Nothing pending any more
        assert!(!trigger.check(&buffer, |_| panic!("must not fire")).unwrap());
    }

    #[test]
    fn test_last_codec_header_wins() {
        let buffer = StreamBuffer::new(20_000);
        let mut trigger = PlaybackTrigger::new(10);
        trigger.arm("flac");
        trigger.arm("pcm");
        buffer.write(&[0u8; 11]);

        let mut seen = None;
        trigger
            .check(&buffer, |codec| {
                seen = Some(codec.to_string());
                Ok(())
            })
            .unwrap();
        assert_eq!(seen.as_deref(), Some("pcm"));
    }

    #[test]
    fn test_rearm_after_handoff() {
        let buffer = StreamBuffer::new(20_000);
        let mut trigger = PlaybackTrigger::new(10);
        let mut count = 0;

        for codec in ["pcm", "pcm"] {
            trigger.arm(codec);
            buffer.write(&[0u8; 11]);
            trigger
                .check(&buffer, |_| {
                    count += 1;
                    Ok(())
                })
                .unwrap();
            buffer.reset();
        }
        assert_eq!(count, 2);
    }

    #[test]
    fn test_codec_specific_threshold() {
        let buffer = StreamBuffer::new(100_000);
        let mut trigger = PlaybackTrigger::new(10_240).with_codec_threshold("flac", 51_200);
        trigger.arm("flac");

        buffer.write(&vec![0u8; 20_000]);
        assert!(!trigger.check(&buffer, |_| Ok(())).unwrap());

        buffer.write(&vec![0u8; 40_000]);
        assert!(trigger.check(&buffer, |_| Ok(())).unwrap());
        assert_eq!(trigger.threshold_for("pcm"), 10_240);
    }
}
