use stickerplay::cli::Args;
use stickerplay::config::{self, EngineConfig};
use stickerplay::core::frame_cache::CacheStats;
use stickerplay::{AnimationSource, DecodedFrame, Engine, MountOptions, PlayerId, Surface};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Headless surface: counts paints and remembers the last frame index
#[derive(Default)]
struct PaintCounter {
    paints: Cell<usize>,
    last: Cell<Option<u32>>,
}

struct CountingSurface(Rc<PaintCounter>);

impl Surface for CountingSurface {
    fn paint(&mut self, frame: &DecodedFrame) {
        self.0.paints.set(self.0.paints.get() + 1);
        self.0.last.set(Some(frame.index()));
    }
}

struct Mounted {
    id: PlayerId,
    file: String,
    counter: Rc<PaintCounter>,
    first_frames: Arc<AtomicUsize>,
    laps: Arc<AtomicUsize>,
}

fn init_logging(args: &Args, paths: &config::PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .clone()
            .unwrap_or_else(|| config::data_file("stickerplay.log", paths));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = config::PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }
    init_logging(&args, &path_config)?;

    info!("stickerplay starting...");
    debug!("Command-line args: {:?}", args);
    info!(
        "Config path: {}",
        config::config_file(config::CONFIG_FILE, &path_config).display()
    );

    let mut settings = EngineConfig::load_from(&path_config)?;
    if let Some(workers) = args.workers {
        settings.worker_count = workers;
    }
    if args.no_transfer {
        settings.transfer_buffers = false;
    }

    let mut engine = Engine::with_swatch(settings);
    if !engine.is_supported() {
        anyhow::bail!("Animated playback not supported here: {:?}", engine.capabilities());
    }
    engine.initialize()?;

    let (width, height) = args.display_size();
    let mut mounted = Vec::new();
    for file in &args.files {
        for _ in 0..args.players.max(1) {
            let counter = Rc::new(PaintCounter::default());
            let options = MountOptions::new(AnimationSource::File(file.clone()), width, height)
                .looping(args.looping);
            let id = engine.mount(Box::new(CountingSurface(Rc::clone(&counter))), options)?;

            let first_frames = Arc::new(AtomicUsize::new(0));
            let laps = Arc::new(AtomicUsize::new(0));
            let f = Arc::clone(&first_frames);
            engine.on_first_frame(id, move |_| {
                f.fetch_add(1, Ordering::Relaxed);
            });
            let l = Arc::clone(&laps);
            engine.on_loop_complete(id, move |e| {
                debug!("Player {} completed a pass at frame {}", e.player, e.frame);
                l.fetch_add(1, Ordering::Relaxed);
            });
            if let Some((from, to)) = args.segment_bounds() {
                engine.play_segment(id, from, to);
            }
            mounted.push(Mounted {
                id,
                file: file.display().to_string(),
                counter,
                first_frames,
                laps,
            });
        }
    }
    info!(
        "Mounted {} players over {} animations, running {:.1}s",
        mounted.len(),
        args.files.len(),
        args.duration
    );

    let started = Instant::now();
    let ticks = engine.run_for(Duration::from_secs_f64(args.duration.max(0.0)));
    let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);

    for m in &mounted {
        let paints = m.counter.paints.get();
        if m.first_frames.load(Ordering::Relaxed) == 0 && paints == 0 {
            warn!("Player {} ({}) never painted", m.id, m.file);
        }
        println!(
            "{} {}: {} paints ({:.1}/s), {} passes, last frame {}, {}",
            m.id,
            m.file,
            paints,
            paints as f64 / elapsed,
            m.laps.load(Ordering::Relaxed),
            m.counter.last.get().map(|i| i.to_string()).unwrap_or_else(|| "-".into()),
            if engine.is_paused(m.id) { "paused" } else { "playing" },
        );
    }

    let (hits, misses) = engine
        .scheduler()
        .sessions()
        .map(|s| s.cache().stats())
        .fold((0, 0), |(h, m), s: &CacheStats| (h + s.hits(), m + s.misses()));
    let (used, limit) = engine.cache_manager().mem();
    println!(
        "{} ticks, {} sessions, cache {} hits / {} misses, {:.1} MB of {} MB",
        ticks,
        engine.scheduler().session_count(),
        hits,
        misses,
        used as f64 / 1024.0 / 1024.0,
        limit / 1024 / 1024
    );

    engine.shutdown();
    Ok(())
}
