use clap::Parser;
use log::info;
use snap_protocol::{ServerSettings, DEFAULT_PORT};
use snapclient::{MockServerConfig, MockSnapServer};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "mock_snapserver")]
#[command(about = "Mock snapserver that streams a wave file or test tone as pcm")]
struct Args {
    /// Address to bind the TCP server to
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    address: String,

    /// Wave file to stream, a 440Hz tone when omitted
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Loop the audio continuously
    #[arg(long)]
    loop_audio: bool,

    /// Playback speed multiplier (1.0 = real time, 2.0 = 2x speed)
    #[arg(long, default_value = "1.0")]
    speed: f32,

    /// Milliseconds of audio per wire chunk
    #[arg(long, default_value_t = 20)]
    chunk_ms: u32,

    /// Volume announced in the server settings
    #[arg(long, default_value_t = 100)]
    volume: i32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    info!("🚀 Starting mock snapserver with args: {:?}", args);

    let config = MockServerConfig {
        audio_file: args.file,
        bind_address: args.address,
        loop_audio: args.loop_audio,
        speed: args.speed,
        chunk_ms: args.chunk_ms,
        settings: ServerSettings {
            volume: args.volume,
            ..MockServerConfig::default().settings
        },
    };

    let mut server = MockSnapServer::new(config)?;

    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_clone = Arc::clone(&should_stop);
    ctrlc::set_handler(move || {
        info!("🛑 Received Ctrl+C, shutting down...");
        should_stop_clone.store(true, Ordering::Relaxed);
    })?;

    let port = server.start()?;
    info!("🎵 Mock snapserver started on port {}", port);

    while !should_stop.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }

    server.stop();
    info!("🛑 Mock snapserver stopped");

    Ok(())
}
