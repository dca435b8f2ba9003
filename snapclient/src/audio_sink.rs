use crate::decoder::{OutputFormat, SampleStream};
use crate::error::AudioSinkError;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Plays a decoded sample stream asynchronously
pub trait AudioSink: Send {
    /// Start playing `samples`. Returns once playback is running; a stream
    /// that is already playing is stopped first.
    fn play(&mut self, format: OutputFormat, samples: SampleStream) -> Result<(), AudioSinkError>;

    /// Stop playback. Safe to call when nothing is playing.
    fn stop(&mut self);
}

/// Pulls samples at real-time pace and discards them
pub struct NullSink {
    stop: Arc<AtomicBool>,
    samples_played: Arc<AtomicU64>,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            samples_played: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn samples_played(&self) -> u64 {
        self.samples_played.load(Ordering::Relaxed)
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn play(
        &mut self,
        format: OutputFormat,
        mut samples: SampleStream,
    ) -> Result<(), AudioSinkError> {
        self.stop();
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        let played = Arc::clone(&self.samples_played);

        // 10ms worth of interleaved samples per tick
        let tick = Duration::from_millis(10);
        let per_tick = (format.sample_rate as usize * format.channels as usize / 100).max(1);

        info!(
            "🔈 Null sink consuming {}Hz {}ch stream",
            format.sample_rate, format.channels
        );

        thread::Builder::new()
            .name("null-sink".to_string())
            .spawn(move || {
                let mut next = Instant::now();
                while !stop.load(Ordering::Relaxed) {
                    let count = samples.by_ref().take(per_tick).count();
                    played.fetch_add(count as u64, Ordering::Relaxed);
                    if count < per_tick {
                        debug!("Null sink reached end of stream");
                        break;
                    }
                    next += tick;
                    thread::sleep(next.saturating_duration_since(Instant::now()));
                }
            })
            .map_err(|e| AudioSinkError::Thread(e.to_string()))?;

        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for NullSink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(feature = "playback")]
pub use self::cpal_sink::{CpalConfig, CpalSink};

#[cfg(feature = "playback")]
mod cpal_sink {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{BuildStreamError, DeviceNameError, DevicesError, PlayStreamError};
    use log::{error, warn};
    use ringbuf::{traits::*, HeapRb};
    use std::sync::mpsc;

    impl From<BuildStreamError> for AudioSinkError {
        fn from(err: BuildStreamError) -> Self {
            AudioSinkError::DeviceError(err.to_string())
        }
    }

    impl From<PlayStreamError> for AudioSinkError {
        fn from(err: PlayStreamError) -> Self {
            AudioSinkError::DeviceError(err.to_string())
        }
    }

    impl From<DevicesError> for AudioSinkError {
        fn from(err: DevicesError) -> Self {
            AudioSinkError::DeviceError(err.to_string())
        }
    }

    impl From<DeviceNameError> for AudioSinkError {
        fn from(err: DeviceNameError) -> Self {
            AudioSinkError::DeviceError(err.to_string())
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct CpalConfig {
        /// Optional output device name
        pub device_name: Option<String>,
    }

    /// Plays through a cpal output device
    pub struct CpalSink {
        config: CpalConfig,
        stop: Arc<AtomicBool>,
    }

    impl CpalSink {
        pub fn new(config: CpalConfig) -> Self {
            Self {
                config,
                stop: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl AudioSink for CpalSink {
        fn play(
            &mut self,
            format: OutputFormat,
            samples: SampleStream,
        ) -> Result<(), AudioSinkError> {
            self.stop();
            let stop = Arc::new(AtomicBool::new(false));
            self.stop = Arc::clone(&stop);

            let config = self.config.clone();
            let (ready_tx, ready_rx) = mpsc::channel();

            // The cpal stream is not Send, so it lives on its own thread
            thread::Builder::new()
                .name("cpal-sink".to_string())
                .spawn(move || {
                    if let Err(e) = run_cpal_thread(&config, format, samples, &stop, &ready_tx) {
                        error!("CPAL thread failed: {}", e);
                        let _ = ready_tx.send(Err(e));
                    }
                })
                .map_err(|e| AudioSinkError::Thread(e.to_string()))?;

            ready_rx
                .recv()
                .map_err(|_| AudioSinkError::Thread("playback thread exited".to_string()))?
        }

        fn stop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn run_cpal_thread(
        config: &CpalConfig,
        format: OutputFormat,
        samples: SampleStream,
        stop: &AtomicBool,
        ready_tx: &mpsc::Sender<Result<(), AudioSinkError>>,
    ) -> Result<(), AudioSinkError> {
        let host = cpal::default_host();

        let device = if let Some(name) = &config.device_name {
            let mut found_device = None;
            for device in host.output_devices()? {
                if device.name()? == *name {
                    found_device = Some(device);
                }
            }
            found_device.ok_or_else(|| {
                AudioSinkError::DeviceError(format!("Output device '{}' not found", name))
            })?
        } else {
            host.default_output_device().ok_or_else(|| {
                AudioSinkError::DeviceError("No output device available".to_string())
            })?
        };

        info!("AudioSink: Using output device: {:?}", device.name());

        let stream_config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // 100ms of interleaved samples between the feeder and the callback
        let buffer_size = (format.sample_rate as usize * format.channels as usize / 10).max(1);
        let rb = HeapRb::<f32>::new(buffer_size);
        let (mut producer, mut consumer) = rb.split();

        let stream = device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = consumer.try_pop().unwrap_or(0.0);
                }
            },
            |err| error!("CPAL stream error: {}", err),
            None,
        )?;
        stream.play()?;
        let _ = ready_tx.send(Ok(()));

        for sample in samples {
            let mut pending = sample;
            while let Err(rejected) = producer.try_push(pending) {
                if stop.load(Ordering::Relaxed) {
                    return Ok(());
                }
                pending = rejected;
                thread::sleep(Duration::from_millis(5));
            }
        }

        warn!("Sample stream ended, stopping playback");
        Ok(())
    }
}
