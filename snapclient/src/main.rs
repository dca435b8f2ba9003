use anyhow::{Context, Result};
use clap::Parser;
use snapclient::{
    AudioSink, ClientConfig, ClientIdentity, Session, SessionEvent, StandardDecoders,
    StatsReporter,
};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Server URL, tcp://host[:port]
    #[arg(long, env = "SNAPCLIENT_SERVER", default_value = "tcp://127.0.0.1:1704")]
    server: String,

    /// Name reported in the hello message
    #[arg(long, env = "SNAPCLIENT_NAME", default_value = env!("CARGO_PKG_NAME"))]
    name: String,

    /// Instance number when several clients run on one host
    #[arg(long, env = "SNAPCLIENT_INSTANCE", default_value_t = 1)]
    instance: u32,

    /// MAC address reported in the hello message
    #[arg(long, env = "SNAPCLIENT_MAC")]
    mac: Option<String>,

    /// Stream buffer size in bytes
    #[arg(long, env = "SNAPCLIENT_BUFFER_BYTES", default_value_t = 1024 * 1024)]
    buffer_bytes: usize,

    /// Buffered bytes required before playback starts
    #[arg(long, env = "SNAPCLIENT_THRESHOLD_BYTES", default_value_t = 10 * 1024)]
    threshold_bytes: usize,

    /// Socket read timeout in seconds, 0 waits forever
    #[arg(long, env = "SNAPCLIENT_READ_TIMEOUT", default_value_t = 0)]
    read_timeout: u64,

    /// Seconds between statistics lines
    #[arg(long, env = "SNAPCLIENT_STATS_INTERVAL", default_value_t = 5)]
    stats_interval: u64,

    /// Output device name (playback feature only)
    #[arg(long, env = "SNAPCLIENT_DEVICE")]
    device: Option<String>,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let defaults = ClientConfig::from_url(&self.server).context("Invalid server URL")?;
        Ok(ClientConfig {
            client_name: self.name.clone(),
            instance: self.instance,
            mac: self.mac.clone(),
            buffer_capacity: self.buffer_bytes,
            playback_threshold: self.threshold_bytes,
            read_timeout: (self.read_timeout > 0).then(|| Duration::from_secs(self.read_timeout)),
            stats_interval: Duration::from_secs(self.stats_interval.max(1)),
            ..defaults
        })
    }
}

#[cfg(feature = "playback")]
fn output_sink(args: &Args) -> Box<dyn AudioSink> {
    use snapclient::{CpalConfig, CpalSink};
    Box::new(CpalSink::new(CpalConfig {
        device_name: args.device.clone(),
    }))
}

#[cfg(not(feature = "playback"))]
fn output_sink(args: &Args) -> Box<dyn AudioSink> {
    if args.device.is_some() {
        log::warn!("⚠️ Built without the playback feature, --device is ignored");
    }
    Box::new(snapclient::NullSink::new())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    log::info!("🚀 Starting snapclient with args: {:?}", args);

    let config = args.client_config()?;
    let identity = ClientIdentity::from_config(&config);

    let mut session = Session::connect(&config, Box::new(StandardDecoders), output_sink(&args))
        .with_context(|| format!("Failed to connect to {}", config.server_address()))?;

    let stop = session.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("🛑 Received Ctrl+C, shutting down...");
        stop.stop();
    })
    .context("Failed to install Ctrl+C handler")?;

    let events = session.subscribe();
    thread::spawn(move || {
        for event in events {
            match event {
                SessionEvent::PlaybackStarted { codec, format } => log::info!(
                    "🔊 Playback started: {} {}Hz {}ch",
                    codec,
                    format.sample_rate,
                    format.channels
                ),
                SessionEvent::CodecInitFailed(e) => log::warn!("⚠️ {}", e),
                other => log::debug!("Session event: {:?}", other),
            }
        }
    });

    let _reporter = StatsReporter::spawn(
        session.stats().clone(),
        session.buffer().clone(),
        config.stats_interval,
    );

    session
        .handshake(&identity)
        .context("Failed to send hello")?;
    session.receive_loop().context("Connection lost")?;

    log::info!("👋 Snapclient stopped");
    Ok(())
}
