use crate::decoder::SampleStream;
use snap_protocol::ServerSettings;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Volume and mute state shared between the session and the playback thread
#[derive(Debug)]
pub struct VolumeControl {
    percent: AtomicU8,
    muted: AtomicBool,
}

impl VolumeControl {
    pub fn new() -> Self {
        Self {
            percent: AtomicU8::new(100),
            muted: AtomicBool::new(false),
        }
    }

    /// Out of range values are clamped to 0-100
    pub fn set(&self, volume: i32, muted: bool) {
        self.percent
            .store(volume.clamp(0, 100) as u8, Ordering::Relaxed);
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn apply(&self, settings: &ServerSettings) {
        self.set(settings.volume, settings.muted);
    }

    pub fn percent(&self) -> u8 {
        self.percent.load(Ordering::Relaxed)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn gain(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            f32::from(self.percent()) / 100.0
        }
    }

    /// Wrap a sample stream so it follows this control
    pub fn attach(self: &Arc<Self>, samples: SampleStream) -> SampleStream {
        let volume = Arc::clone(self);
        Box::new(samples.map(move |sample| sample * volume.gain()))
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_drive_gain() {
        let volume = VolumeControl::new();
        assert_eq!(volume.gain(), 1.0);

        volume.apply(&ServerSettings {
            buffer_ms: 1000,
            latency: 0,
            muted: false,
            volume: 50,
        });
        assert_eq!(volume.gain(), 0.5);

        volume.set(80, true);
        assert_eq!(volume.gain(), 0.0);
        assert_eq!(volume.percent(), 80);
    }

    #[test]
    fn test_out_of_range_volume_is_clamped() {
        let volume = VolumeControl::new();
        volume.set(250, false);
        assert_eq!(volume.percent(), 100);
        volume.set(-3, false);
        assert_eq!(volume.percent(), 0);
    }

    #[test]
    fn test_attached_stream_follows_changes() {
        let volume = Arc::new(VolumeControl::new());
        let mut samples = volume.attach(Box::new(std::iter::repeat(0.8f32)));

        assert!((samples.next().unwrap() - 0.8).abs() < 1e-6);
        volume.set(25, false);
        assert!((samples.next().unwrap() - 0.2).abs() < 1e-6);
        volume.set(25, true);
        assert_eq!(samples.next().unwrap(), 0.0);
    }
}
