use std::{path::PathBuf, time::Duration};

use clap::{Parser, Subcommand};
use music_sanctuary_core::{
    AppConfig, EngineError, EngineEvent, EventLog, PlaybackPhase, PlaybackSynchronizer,
    SimulatedDevice, SwapMode, TrackCatalog, TrackId,
};
use tracing_subscriber::EnvFilter;

const DEMO_CATALOG: &str = r#"[
    { "id": "aurora", "source": "/music/aurora.mp3", "duration": 6, "title": "Aurora", "artist": "Sanctuary" },
    { "id": "tide", "source": "./music/tide.ogg", "duration": 5, "title": "Tide", "artist": "Sanctuary" },
    { "id": "stream", "source": "https://cdn.example.com/stream.mp3", "duration": 4, "title": "Remote Stream" }
]"#;

fn main() -> music_sanctuary_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            catalog,
            config,
            seconds,
            fail,
            replace_instances,
            json,
        } => {
            let options = SimulateOptions {
                seconds,
                fail,
                replace_instances,
                json,
            };
            run_simulation(catalog.as_ref(), config.as_ref(), &options)
        }
        Commands::Catalog { path } => run_catalog(path.as_ref()),
    }
}

struct SimulateOptions {
    seconds: f64,
    fail: Vec<String>,
    replace_instances: bool,
    json: bool,
}

fn run_simulation(
    catalog: Option<&PathBuf>,
    config: Option<&PathBuf>,
    options: &SimulateOptions,
) -> music_sanctuary_core::Result<()> {
    let config = match config {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::default(),
    };
    let catalog = load_catalog(catalog)?;
    let first = catalog
        .first()
        .cloned()
        .ok_or_else(|| EngineError::msg("catalog contains no tracks"))?;

    let swap_mode = if options.replace_instances {
        SwapMode::ReplaceInstance
    } else {
        SwapMode::InPlace
    };
    let device = SimulatedDevice::with_swap_mode(swap_mode);
    for track in catalog.tracks() {
        if let Some(seconds) = track.known_duration_seconds() {
            device.set_duration(track.source(), seconds);
        }
    }
    for id in &options.fail {
        match catalog.get(&TrackId::from(id.as_str())) {
            Some(track) => device.fail_source(track.source()),
            None => tracing::warn!(track = %id, "unknown track passed to --fail"),
        }
    }

    tracing::info!(
        tracks = catalog.len(),
        seconds = options.seconds,
        tick_rate_hz = config.engine.tick_rate_hz,
        "starting simulation"
    );

    let mut engine =
        PlaybackSynchronizer::new(&config, Box::new(device.factory()), EventLog::new())?;
    engine.load_track(first)?;
    engine.play();

    let interval = config.engine.tick_interval();
    let steps = (options.seconds.max(0.0) / interval.as_secs_f64()).ceil() as u64;
    let report_every = u64::from(config.engine.tick_rate_hz / 4).max(1);
    let mut frames = 0u64;
    let mut now = Duration::ZERO;

    for _ in 0..steps {
        now += interval;
        for (ticket, event) in device.advance(now) {
            engine.handle_resource_event(&ticket, event);
        }
        engine.tick(now);

        for event in engine.sink_mut().take() {
            if options.json {
                println!("{}", serde_json::to_string(&event)?);
                continue;
            }
            match event {
                EngineEvent::AnalysisFrame(frame) => {
                    frames += 1;
                    if frames % report_every == 0 {
                        tracing::info!(
                            bass = frame.bass,
                            mid = frame.mid,
                            treble = frame.treble,
                            energy = frame.energy,
                            centroid = frame.spectral_centroid,
                            "analysis"
                        );
                    }
                }
                EngineEvent::Error { message } => tracing::warn!(%message, "engine error"),
                other => tracing::info!(event = ?other, "engine event"),
            }
        }

        // Transport policy lives here, not in the engine: move on when the
        // current track finished or failed for good.
        let finished = engine.state().ended || matches!(engine.phase(), PlaybackPhase::Error(_));
        if finished {
            let next = engine
                .current_track()
                .and_then(|track| catalog.next_after(track.id()))
                .cloned();
            if let Some(next) = next {
                engine.load_track(next)?;
                engine.play();
            }
        }
    }

    tracing::info!(phase = %engine.phase(), position = engine.state().position_seconds, "simulation finished");
    engine.shutdown();
    Ok(())
}

fn run_catalog(path: Option<&PathBuf>) -> music_sanctuary_core::Result<()> {
    let catalog = load_catalog(path)?;
    for track in catalog.tracks() {
        let origin = if track.is_local_origin() {
            "local"
        } else {
            "remote"
        };
        let duration = track
            .known_duration_seconds()
            .map(|seconds| format!("{seconds:.1}s"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:<7} {:>8}  {}  {}",
            track.id(),
            origin,
            duration,
            track.source(),
            track.title().unwrap_or_default()
        );
    }
    Ok(())
}

fn load_catalog(path: Option<&PathBuf>) -> music_sanctuary_core::Result<TrackCatalog> {
    match path {
        Some(path) => {
            tracing::info!(?path, "loading catalog");
            TrackCatalog::from_json_file(path)
        }
        None => TrackCatalog::from_json_str(DEMO_CATALOG),
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Music Sanctuary playback and analysis engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a catalog on a simulated device and report analysis frames.
    Simulate {
        /// JSON catalog to play. A built-in demo catalog is used when omitted.
        #[arg(short, long)]
        catalog: Option<PathBuf>,
        /// JSON engine configuration.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Simulated wall-clock time to run for.
        #[arg(short, long, default_value_t = 10.0)]
        seconds: f64,
        /// Track ids whose source should always fail to load.
        #[arg(long)]
        fail: Vec<String>,
        /// Give every track a fresh playback resource instead of swapping the source.
        #[arg(long)]
        replace_instances: bool,
        /// Print engine events as JSON lines on stdout.
        #[arg(long)]
        json: bool,
    },
    /// List the tracks of a catalog with their origin policy.
    Catalog {
        /// JSON catalog to inspect. The built-in demo catalog is used when omitted.
        path: Option<PathBuf>,
    },
}
