use crate::config::ConfigError;
use snap_protocol::ProtocolError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that end a session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Connect or transport failure. The stream cannot be resumed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Audio sink error: {0}")]
    AudioSink(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Failure to hand buffered data to a decoder and start playback.
///
/// Contained inside the session: the pending codec is dropped and buffering
/// continues until the next codec header.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecInitError {
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Decoder rejected {codec} stream: {reason}")]
    Rejected { codec: String, reason: String },

    #[error("Audio sink refused {codec} stream: {reason}")]
    Sink { codec: String, reason: String },
}

impl CodecInitError {
    pub fn codec(&self) -> &str {
        match self {
            CodecInitError::UnsupportedCodec(codec) => codec,
            CodecInitError::Rejected { codec, .. } => codec,
            CodecInitError::Sink { codec, .. } => codec,
        }
    }
}

/// Errors raised by an audio sink
#[derive(Error, Debug, Clone)]
pub enum AudioSinkError {
    #[error("Audio device error: {0}")]
    DeviceError(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to start playback thread: {0}")]
    Thread(String),
}

impl From<AudioSinkError> for SessionError {
    fn from(err: AudioSinkError) -> Self {
        SessionError::AudioSink(err.to_string())
    }
}
