use crate::audio_sink::AudioSink;
use crate::config::ClientConfig;
use crate::decoder::{DecoderFactory, OutputFormat};
use crate::error::{CodecInitError, Result, SessionError};
use crate::identity::ClientIdentity;
use crate::playback::PlaybackTrigger;
use crate::stats::Statistics;
use crate::stream_buffer::StreamBuffer;
use crate::volume::VolumeControl;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use snap_protocol::{
    CodecHeader, Message, ProtocolError, ServerSettings, ShutdownHandle, SnapClient, WireChunk,
};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Things worth telling the application about while the loop runs
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ServerSettings(ServerSettings),
    /// A codec header arrived and playback is pending for it
    CodecChanged { codec: String },
    PlaybackStarted { codec: String, format: OutputFormat },
    /// The pending codec was dropped, buffering continues
    CodecInitFailed(CodecInitError),
    /// A frame was skipped, the stream is still aligned
    MalformedPayload { msg_type: u16, reason: String },
}

/// Stops a running receive loop from another thread
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
    shutdown: Option<ShutdownHandle>,
}

impl StopHandle {
    /// The loop returns `Ok(())` once it notices. A blocked socket read is
    /// interrupted by shutting the socket down.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(shutdown) = &self.shutdown {
            if let Err(e) = shutdown.shutdown() {
                warn!("Failed to shut down socket: {}", e);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

/// One connection to a snapserver: handshake, receive loop, buffering and
/// the handoff of buffered audio to a decoder and sink.
pub struct Session<R = TcpStream, W = TcpStream> {
    client: SnapClient<R, W>,
    buffer: Arc<StreamBuffer>,
    trigger: PlaybackTrigger,
    stats: Arc<Statistics>,
    volume: Arc<VolumeControl>,
    decoders: Box<dyn DecoderFactory>,
    sink: Box<dyn AudioSink>,
    subscribers: Vec<Sender<SessionEvent>>,
    stop: StopHandle,
    settings: Option<ServerSettings>,
    codec: Option<String>,
    playing: Option<String>,
}

impl Session {
    /// Validate `config` and connect to the server it names
    pub fn connect(
        config: &ClientConfig,
        decoders: Box<dyn DecoderFactory>,
        sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        config.validate()?;
        let client = SnapClient::connect(&config.host, config.port, config.read_timeout)?;
        Ok(Session::new(client, config, decoders, sink))
    }
}

impl<R: Read, W: Write> Session<R, W> {
    pub fn new(
        client: SnapClient<R, W>,
        config: &ClientConfig,
        decoders: Box<dyn DecoderFactory>,
        sink: Box<dyn AudioSink>,
    ) -> Self {
        let stop = StopHandle {
            stopped: Arc::new(AtomicBool::new(false)),
            shutdown: client.shutdown_handle(),
        };

        Self {
            client,
            buffer: Arc::new(StreamBuffer::new(config.buffer_capacity)),
            trigger: config.playback_trigger(),
            stats: Arc::new(Statistics::new()),
            volume: Arc::new(VolumeControl::new()),
            decoders,
            sink,
            subscribers: Vec::new(),
            stop,
            settings: None,
            codec: None,
            playing: None,
        }
    }

    /// Send the hello message. The server does not acknowledge it.
    pub fn handshake(&mut self, identity: &ClientIdentity) -> Result<()> {
        self.client.send_hello(&identity.to_hello())?;
        Ok(())
    }

    /// Receive and dispatch one message, returning its raw type.
    ///
    /// A malformed frame is counted as a packet and as malformed, reported
    /// and returned as a recoverable [`ProtocolError`]; the next call
    /// continues with the following frame.
    pub fn process_next(&mut self) -> Result<u16> {
        let header = self.client.read_header()?;

        let message = match self.client.decode(&header) {
            Ok(message) => message,
            Err(ProtocolError::MalformedPayload { msg_type, reason }) => {
                self.stats.record_packet(header.size);
                warn!("⚠️ Skipping malformed message type {}: {}", msg_type, reason);
                self.stats.record_malformed();
                self.emit(SessionEvent::MalformedPayload {
                    msg_type,
                    reason: reason.clone(),
                });
                return Err(ProtocolError::MalformedPayload { msg_type, reason }.into());
            }
            Err(e) => return Err(e.into()),
        };

        self.stats.record_packet(header.size);
        let msg_type = message.msg_type();

        match message {
            Message::ServerSettings(settings) => self.on_server_settings(settings),
            Message::CodecHeader(header) => self.on_codec_header(header),
            Message::WireChunk(chunk) => self.on_wire_chunk(chunk),
            Message::Hello(_) | Message::Unknown { .. } => {
                debug!("Ignoring message type {} ({} bytes)", msg_type, header.size);
            }
        }

        Ok(msg_type)
    }

    /// Process messages until the connection fails or [`StopHandle::stop`]
    /// is called. Malformed frames are skipped.
    ///
    /// On return the buffer is closed and emptied and the sink stopped.
    pub fn receive_loop(&mut self) -> Result<()> {
        info!("🎧 Receiving from {}", self.client.server_address());

        let result = loop {
            if self.stop.is_stopped() {
                break Ok(());
            }

            match self.process_next() {
                Ok(_) => {}
                Err(SessionError::Protocol(e)) if e.is_recoverable() => {}
                Err(e) if self.stop.is_stopped() => {
                    debug!("Receive loop interrupted by stop: {}", e);
                    break Ok(());
                }
                Err(e) => {
                    error!("❌ Receive loop failed: {}", e);
                    break Err(e);
                }
            }
        };

        self.teardown();
        info!("🛑 Session ended: {}", self.stats.snapshot(&self.buffer));
        result
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn buffer(&self) -> &Arc<StreamBuffer> {
        &self.buffer
    }

    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    pub fn volume(&self) -> &Arc<VolumeControl> {
        &self.volume
    }

    pub fn trigger(&self) -> &PlaybackTrigger {
        &self.trigger
    }

    /// Most recent settings pushed by the server
    pub fn server_settings(&self) -> Option<&ServerSettings> {
        self.settings.as_ref()
    }

    /// Codec currently handed to the sink
    pub fn playing_codec(&self) -> Option<&str> {
        self.playing.as_deref()
    }

    fn on_server_settings(&mut self, settings: ServerSettings) {
        info!(
            "⚙️ Server settings: buffer={}ms latency={}ms volume={} muted={}",
            settings.buffer_ms, settings.latency, settings.volume, settings.muted
        );
        self.volume.apply(&settings);
        self.settings = Some(settings.clone());
        self.emit(SessionEvent::ServerSettings(settings));
    }

    fn on_codec_header(&mut self, header: CodecHeader) {
        info!(
            "🎼 Codec header: {} ({} init bytes)",
            header.codec,
            header.payload.len()
        );

        // A later header starts a new stream; bytes of the previous one are
        // useless to the next decoder
        if let Some(previous) = self.codec.replace(header.codec.clone()) {
            info!("🔁 Codec change from {} to {}", previous, header.codec);
            if self.playing.take().is_some() {
                self.sink.stop();
            }
            self.buffer.detach_readers();
            self.buffer.reset();
        }

        self.stats.set_codec(&header.codec);
        self.trigger.arm(&header.codec);

        let stored = self.buffer.write(&header.payload);
        if stored < header.payload.len() {
            warn!(
                "Codec header truncated by full buffer: {} of {} bytes stored",
                stored,
                header.payload.len()
            );
        }

        self.emit(SessionEvent::CodecChanged {
            codec: header.codec,
        });
    }

    fn on_wire_chunk(&mut self, chunk: WireChunk) {
        let stored = self.buffer.write(&chunk.payload);
        self.stats.record_audio(chunk.payload.len(), stored);
        if stored < chunk.payload.len() {
            debug!(
                "Buffer full, dropped {} bytes",
                chunk.payload.len() - stored
            );
        }

        self.check_trigger();
    }

    fn check_trigger(&mut self) {
        let buffer = Arc::clone(&self.buffer);
        let decoders = &self.decoders;
        let sink = &mut self.sink;
        let volume = &self.volume;
        let mut started = None;

        let result = self.trigger.check(&buffer, |codec| {
            let opened = {
                // Header parsing runs on this thread, which is also the only
                // writer: running out of bytes here must fail, not wait
                let _opening = buffer.non_blocking_reads();
                decoders.open(codec, buffer.reader())
            };
            let (samples, format) = opened?;
            sink.play(format, volume.attach(samples))
                .map_err(|e| CodecInitError::Sink {
                    codec: codec.to_string(),
                    reason: e.to_string(),
                })?;
            started = Some((codec.to_string(), format));
            Ok(())
        });

        match result {
            Ok(false) => {}
            Ok(true) => {
                self.stats.record_handoff();
                if let Some((codec, format)) = started {
                    info!(
                        "▶️ Playing {} at {}Hz, {} channels",
                        codec, format.sample_rate, format.channels
                    );
                    self.playing = Some(codec.clone());
                    self.emit(SessionEvent::PlaybackStarted { codec, format });
                }
            }
            Err(e) => {
                self.stats.record_handoff_failure();
                warn!("⚠️ Playback not started: {}", e);
                // A decoder that failed mid-header may still hold a reader
                self.buffer.detach_readers();
                self.emit(SessionEvent::CodecInitFailed(e));
            }
        }
    }

    fn emit(&mut self, event: SessionEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    fn teardown(&mut self) {
        self.sink.stop();
        self.buffer.detach_readers();
        self.buffer.close();
        self.buffer.reset();
        self.playing = None;
    }
}
