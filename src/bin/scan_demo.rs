//! scan_demo - synthetic end-to-end detection session
//!
//! Drives a session controller with the synthetic camera and the scripted
//! detection engine on a virtual clock, printing every session event as one
//! JSON line on stdout.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scan_session::{
    EngineRegistry, EngineScript, InMemoryAnchors, ResolutionMode, ScriptedEngine,
    SessionCollaborators, SessionConfig, SessionController, SessionEvent, SessionState,
    StaticModelLoader, SyntheticCamera, SyntheticCameraConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Length of the run in seconds of virtual time.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Camera frame rate.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Model identifier (overrides config).
    #[arg(long, env = "SCAN_MODEL_ID")]
    model_id: Option<String>,
    /// Access key (overrides config).
    #[arg(long, env = "SCAN_ACCESS_KEY")]
    access_key: Option<String>,
    /// Keep tracking after the first detection.
    #[arg(long)]
    continuous: bool,
    /// Start scanning as soon as the engine is ready.
    #[arg(long)]
    auto_scan: bool,
    /// Forwarded frames before the scripted engine reports a detection.
    #[arg(long, default_value_t = 3)]
    detect_after: u32,
    /// Number of engine initializations that fail before one succeeds.
    #[arg(long, default_value_t = 0)]
    fail_init: u32,
    /// Number of intrinsics queries that fail before one succeeds.
    #[arg(long, default_value_t = 0)]
    intrinsics_failures: u32,
    /// Seed for camera pose jitter.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Sleep between frames instead of running as fast as possible.
    #[arg(long)]
    realtime: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let mut config = SessionConfig::load()?;
    if let Some(model_id) = &args.model_id {
        config.model_id = model_id.clone();
    }
    if let Some(access_key) = &args.access_key {
        config.access_key = access_key.clone();
    }
    if args.continuous {
        config.resolution = ResolutionMode::Continuous;
    }
    config.auto_scan |= args.auto_scan;

    let script = EngineScript {
        init_failures: args.fail_init,
        frames_until_detection: Some(args.detect_after.max(1)),
        continuous_updates: config.resolution == ResolutionMode::Continuous,
        ..EngineScript::default()
    };
    let (scripted, _probe) = ScriptedEngine::factory(script);
    let mut registry = EngineRegistry::new();
    registry.register("scripted", scripted);
    let engine_factory = registry.factory(config.engine.as_deref())?;

    let camera = SyntheticCamera::new(SyntheticCameraConfig {
        seed: args.seed,
        ..SyntheticCameraConfig::default()
    })
    .with_intrinsics_failures(args.intrinsics_failures);

    let collaborators = SessionCollaborators {
        engine_factory,
        frames: Box::new(camera.clone()),
        intrinsics: Box::new(camera.clone()),
        anchors: Box::new(InMemoryAnchors::new()),
        model_loader: Some(Box::new(StaticModelLoader::cube(0.8))),
    };

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "scan_demo: {}s at {} fps, {:?} resolution, engines [{}]",
        args.seconds,
        args.fps,
        config.resolution,
        registry.list().join(", ")
    );

    let mut session = SessionController::new(config, collaborators);
    session.activate()?;

    let frame_interval = Duration::from_secs(1) / args.fps;
    let total_frames = args.seconds * u64::from(args.fps);
    let mut retried = false;

    for i in 0..total_frames {
        if !running.load(Ordering::SeqCst) {
            log::info!("interrupted, stopping");
            break;
        }
        let now_micros = i * 1_000_000 / u64::from(args.fps);
        session.on_camera_frame(now_micros);
        session.tick(now_micros);

        for event in session.drain_events() {
            print_event(&event)?;
            if let SessionEvent::Controls {
                scan_enabled,
                retry_enabled,
            } = event
            {
                // Press the on-screen buttons the way a user would.
                if scan_enabled && session.state() == SessionState::Ready {
                    session.start_scan();
                }
                if retry_enabled && !retried {
                    retried = true;
                    session.retry()?;
                }
            }
        }

        if args.realtime {
            std::thread::sleep(frame_interval);
        }
    }

    session.teardown();
    for event in session.drain_events() {
        print_event(&event)?;
    }

    log::info!("session stats: {}", serde_json::to_string(session.stats())?);
    log::info!("camera stats: {:?}", camera.stats());
    Ok(())
}

fn print_event(event: &SessionEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}
