use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, error, info, warn};
use snap_protocol::{
    CodecHeader, Connection, Hello, Message, MessageType, ProtocolError, ServerSettings, WireChunk,
};
use std::io::{self, Cursor};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Configuration for the mock snapserver
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Wave file to stream. A generated sine tone is used when unset.
    pub audio_file: Option<PathBuf>,
    /// Address to bind to (use "127.0.0.1:0" for a random port)
    pub bind_address: String,
    /// Start over when the audio ends instead of closing the connection
    pub loop_audio: bool,
    /// Playback speed multiplier (1.0 = real time, 2.0 = 2x speed)
    pub speed: f32,
    /// Audio per wire chunk
    pub chunk_ms: u32,
    /// Sent to every client right after its hello
    pub settings: ServerSettings,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            audio_file: None,
            bind_address: "127.0.0.1:0".to_string(),
            loop_audio: false,
            speed: 1.0,
            chunk_ms: 20,
            settings: ServerSettings {
                buffer_ms: 1000,
                latency: 0,
                muted: false,
                volume: 100,
            },
        }
    }
}

/// Interleaved little endian PCM ready to be cut into chunks
#[derive(Debug, Clone)]
struct AudioClip {
    spec: WavSpec,
    data: Vec<u8>,
}

impl AudioClip {
    fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let width = usize::from(spec.bits_per_sample / 8);

        info!(
            "📊 Audio file info: {}Hz, {} channels, {} bits",
            spec.sample_rate, spec.channels, spec.bits_per_sample
        );

        let mut data = Vec::with_capacity(reader.len() as usize * width);
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => {
                for sample in reader.samples::<f32>() {
                    data.extend_from_slice(&sample?.to_le_bytes());
                }
            }
            (SampleFormat::Int, 16 | 24 | 32) => {
                for sample in reader.samples::<i32>() {
                    data.extend_from_slice(&sample?.to_le_bytes()[..width]);
                }
            }
            (format, bits) => {
                return Err(format!("Unsupported wave format: {} bit {:?}", bits, format).into())
            }
        }

        Ok(Self { spec, data })
    }

    /// Two seconds of a 440Hz tone, 48kHz stereo 16 bit
    fn tone() -> Self {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let frames = spec.sample_rate as usize * 2;
        let mut data = Vec::with_capacity(frames * 4);
        for n in 0..frames {
            let t = n as f32 / spec.sample_rate as f32;
            let value = ((t * 440.0 * std::f32::consts::TAU).sin() * 0.3 * i16::MAX as f32) as i16;
            for _ in 0..spec.channels {
                data.extend_from_slice(&value.to_le_bytes());
            }
        }

        Self { spec, data }
    }

    /// RIFF header announcing an empty data chunk, as sent for live pcm streams
    fn pcm_header(&self) -> Result<Vec<u8>, hound::Error> {
        let mut cursor = Cursor::new(Vec::new());
        WavWriter::new(&mut cursor, self.spec)?.finalize()?;
        Ok(cursor.into_inner())
    }

    fn chunk_len(&self, chunk_ms: u32) -> usize {
        let frame = usize::from(self.spec.channels) * usize::from(self.spec.bits_per_sample / 8);
        let frames = (self.spec.sample_rate as usize * chunk_ms as usize / 1000).max(1);
        frames * frame
    }
}

/// Minimal snapserver that streams one clip as pcm to every client
pub struct MockSnapServer {
    config: MockServerConfig,
    clip: Arc<AudioClip>,
    should_stop: Arc<AtomicBool>,
    clients_served: Arc<AtomicUsize>,
}

impl MockSnapServer {
    pub fn new(config: MockServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let clip = match &config.audio_file {
            Some(path) => AudioClip::load(path)?,
            None => AudioClip::tone(),
        };
        if config.speed <= 0.0 {
            return Err(format!("Speed must be positive, got {}", config.speed).into());
        }

        info!("🎵 Mock snapserver configured:");
        match &config.audio_file {
            Some(path) => info!("  📁 File: {}", path.display()),
            None => info!("  📁 Generated 440Hz tone"),
        }
        info!("  🔄 Loop: {}", config.loop_audio);
        info!("  ⏱️ Speed: {}x", config.speed);

        Ok(Self {
            config,
            clip: Arc::new(clip),
            should_stop: Arc::new(AtomicBool::new(false)),
            clients_served: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Start accepting clients and return the bound port
    pub fn start(&mut self) -> Result<u16, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_address)?;
        listener.set_nonblocking(true)?;
        let actual_port = listener.local_addr()?.port();

        info!("🎵 Mock snapserver listening on port {}", actual_port);

        let config = self.config.clone();
        let clip = Arc::clone(&self.clip);
        let should_stop = Arc::clone(&self.should_stop);
        let clients_served = Arc::clone(&self.clients_served);

        thread::spawn(move || {
            while !should_stop.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, peer)) => {
                        let client_id = clients_served.fetch_add(1, Ordering::Relaxed) + 1;
                        info!("📡 Client {} connected from {}", client_id, peer);

                        let config = config.clone();
                        let clip = Arc::clone(&clip);
                        let should_stop = Arc::clone(&should_stop);
                        thread::spawn(move || {
                            match Self::serve_client(stream, &config, &clip, &should_stop) {
                                Ok(()) => info!("🔌 Client {} finished", client_id),
                                Err(e) => debug!("Client {} disconnected: {}", client_id, e),
                            }
                        });
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(20));
                    }
                    Err(e) => {
                        error!("Connection error: {}", e);
                        break;
                    }
                }
            }
            debug!("Accept loop stopped");
        });

        Ok(actual_port)
    }

    /// Start the server in the background and return a handle for testing
    pub fn start_background(mut self) -> Result<MockServerHandle, Box<dyn std::error::Error>> {
        let port = self.start()?;
        Ok(MockServerHandle {
            port,
            should_stop: Arc::clone(&self.should_stop),
            clients_served: Arc::clone(&self.clients_served),
        })
    }

    fn serve_client(
        stream: TcpStream,
        config: &MockServerConfig,
        clip: &AudioClip,
        should_stop: &AtomicBool,
    ) -> Result<(), ProtocolError> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let mut connection = Connection::new(stream)?;

        // The client speaks first
        let header = connection.read_header()?;
        if header.message_type() != Some(MessageType::Hello) {
            warn!("⚠️ Expected hello, got message type {}", header.msg_type);
            connection.discard(u64::from(header.size))?;
        } else {
            let payload = connection.read_exact(header.size as usize)?;
            let hello = Hello::from_payload(&payload)?;
            info!(
                "👋 Hello from {} ({} {}/{}, instance {})",
                hello.host_name, hello.client_name, hello.os, hello.arch, hello.instance
            );
        }

        connection.write_message(&Message::ServerSettings(config.settings.clone()))?;

        let payload = clip
            .pcm_header()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        connection.write_message(&Message::CodecHeader(CodecHeader {
            codec: "pcm".to_string(),
            payload,
        }))?;

        let chunk_len = clip.chunk_len(config.chunk_ms);
        let interval = Duration::from_secs_f32(config.chunk_ms as f32 / 1000.0 / config.speed);
        let mut chunks_sent = 0u64;

        loop {
            for data in clip.data.chunks(chunk_len) {
                if should_stop.load(Ordering::Relaxed) {
                    return Ok(());
                }

                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default();
                connection.write_message(&Message::WireChunk(WireChunk {
                    sec: now.as_secs() as i32,
                    usec: now.subsec_micros() as i32,
                    payload: data.to_vec(),
                }))?;

                chunks_sent += 1;
                if chunks_sent % 100 == 0 {
                    debug!("🎵 Sent {} wire chunks", chunks_sent);
                }
                thread::sleep(interval);
            }

            if !config.loop_audio {
                info!("🏁 Finished streaming clip (no loop)");
                return Ok(());
            }
        }
    }

    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
    }
}

/// Handle for a mock server running in the background. Stops it on drop.
pub struct MockServerHandle {
    pub port: u16,
    should_stop: Arc<AtomicBool>,
    clients_served: Arc<AtomicUsize>,
}

impl MockServerHandle {
    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn clients_served(&self) -> usize {
        self.clients_served.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for MockServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
