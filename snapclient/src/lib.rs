//! # Snapclient
//!
//! Receive side of a snapcast client: connects to a snapserver, buffers the
//! incoming audio stream and hands it to a decoder and audio sink once enough
//! data has arrived.
//!
//! ```rust,no_run
//! use snapclient::{ClientConfig, ClientIdentity, NullSink, Session, StandardDecoders};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_url("tcp://127.0.0.1:1704")?;
//! let mut session = Session::connect(
//!     &config,
//!     Box::new(StandardDecoders),
//!     Box::new(NullSink::new()),
//! )?;
//! session.handshake(&ClientIdentity::from_config(&config))?;
//! session.receive_loop()?;
//! # Ok(())
//! # }
//! ```

pub mod audio_sink;
pub mod config;
pub mod decoder;
pub mod error;
pub mod identity;
pub mod mock_server;
pub mod playback;
pub mod session;
pub mod stats;
pub mod stream_buffer;
pub mod volume;

pub use audio_sink::{AudioSink, NullSink};
#[cfg(feature = "playback")]
pub use audio_sink::{CpalConfig, CpalSink};
pub use config::{ClientConfig, ConfigError};
pub use decoder::{DecoderFactory, OutputFormat, SampleStream, StandardDecoders};
pub use error::{AudioSinkError, CodecInitError, Result, SessionError};
pub use identity::ClientIdentity;
pub use mock_server::{MockServerConfig, MockServerHandle, MockSnapServer};
pub use playback::{PlaybackTrigger, TriggerState};
pub use session::{Session, SessionEvent, StopHandle};
pub use stats::{Statistics, StatsReporter, StatsSnapshot};
pub use stream_buffer::{BufferReader, NonBlockingReads, StreamBuffer};
pub use volume::VolumeControl;
