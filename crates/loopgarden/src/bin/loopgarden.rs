//! Loopgarden demo binary
//!
//! Runs a scripted performance against a synthetic input signal. The input
//! and output callbacks are simulated by two threads paced at the block rate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use loopgarden::{LooperConfig, LooperSession, TrackState, TransportController};
use portable_atomic::AtomicF32;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Loopgarden - multi-track looper core
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (otherwise the standard locations are searched)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Length of the master loop to record, in seconds
    #[arg(long, default_value_t = 2.0)]
    master_seconds: f32,

    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,
}

const CONTROL_INTERVAL: Duration = Duration::from_millis(10);

fn main() -> Result<()> {
    let args = Args::parse();

    let (config, sources) = LooperConfig::load_with_sources_from(args.config.as_deref())?;

    if args.dump_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("loopgarden {} starting", env!("CARGO_PKG_VERSION"));
    for file in &sources.files {
        info!("  config: {}", file.display());
    }
    for key in &sources.env_overrides {
        info!("  env override: {}", key);
    }

    if !(args.master_seconds.is_finite() && args.master_seconds > 0.0) {
        bail!("--master-seconds must be positive");
    }

    let session = LooperSession::new(&config)?;
    let (mut transport, mut capture, mut renderer) = session.into_parts();

    let sample_rate = config.audio.sample_rate;
    let block_size = config.audio.block_size;
    let block_period = Duration::from_secs_f64(block_size as f64 / sample_rate as f64);

    let running = Arc::new(AtomicBool::new(true));
    let frequency = Arc::new(AtomicF32::new(220.0));

    let input_thread = {
        let running = Arc::clone(&running);
        let frequency = Arc::clone(&frequency);
        thread::Builder::new()
            .name("loopgarden-input".into())
            .spawn(move || {
                let mut block = vec![0.0f32; block_size];
                let mut phase = 0.0f32;
                while running.load(Ordering::Relaxed) {
                    let step = frequency.load(Ordering::Relaxed) / sample_rate as f32;
                    for sample in block.iter_mut() {
                        *sample = (phase * std::f32::consts::TAU).sin() * 0.5;
                        phase = (phase + step).fract();
                    }
                    capture.process(&block);
                    thread::sleep(block_period);
                }
                capture
            })?
    };

    let output_thread = {
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("loopgarden-output".into())
            .spawn(move || {
                let mut block = vec![0.0f32; block_size];
                let mut peak = 0.0f32;
                while running.load(Ordering::Relaxed) {
                    renderer.render(&mut block);
                    peak = block.iter().fold(peak, |p, s| p.max(s.abs()));
                    thread::sleep(block_period);
                }
                peak
            })?
    };

    let loop_timeout = Duration::from_secs_f32(args.master_seconds * 4.0 + 1.0);
    let result = perform(&mut transport, &frequency, args.master_seconds, loop_timeout);

    running.store(false, Ordering::Relaxed);
    let capture = input_thread
        .join()
        .map_err(|_| anyhow!("input thread panicked"))?;
    let peak = output_thread
        .join()
        .map_err(|_| anyhow!("output thread panicked"))?;

    let capture_stats = capture.stats();
    let mixer_stats = transport.mixer().stats();
    info!(
        blocks = capture_stats.blocks.load(Ordering::Relaxed),
        events = capture_stats.events_emitted.load(Ordering::Relaxed),
        dropped = capture_stats.dropped_events.load(Ordering::Relaxed),
        renders = mixer_stats.renders.load(Ordering::Relaxed),
        frames = mixer_stats.frames.load(Ordering::Relaxed),
        retire_overflow = mixer_stats.retire_overflow.load(Ordering::Relaxed),
        output_peak = peak,
        "loopgarden shutdown complete"
    );
    if mixer_stats.retire_overflow.load(Ordering::Relaxed) > 0 {
        warn!("retire queue overflowed, voices were freed in the output callback");
    }

    result
}

/// The scripted performance
fn perform(
    transport: &mut TransportController,
    frequency: &AtomicF32,
    master_seconds: f32,
    loop_timeout: Duration,
) -> Result<()> {
    info!("recording master loop for {:.2}s", master_seconds);
    transport.record_toggle(0);
    wait_for(transport, Duration::from_secs_f32(master_seconds), |_| false);
    transport.record_toggle(0);
    wait_until(transport, loop_timeout, "master loop", |t| t.loop_length().is_some())?;
    report(transport);

    for (track, hz) in [(1, 330.0), (2, 440.0)] {
        frequency.store(hz, Ordering::Relaxed);
        transport.record_toggle(track);
        wait_until(transport, loop_timeout, "take", |t| {
            t.track_state(track) == TrackState::Playing
        })?;
        report(transport);
    }

    transport.toggle_mute(1);
    wait_until(transport, loop_timeout, "mute", |t| t.is_muted(1))?;
    report(transport);

    transport.toggle_solo(2);
    wait_until(transport, loop_timeout, "solo", |t| t.is_soloed(2))?;
    report(transport);

    transport.clear_track(1);
    report(transport);

    transport.stop_all();
    report(transport);
    Ok(())
}

/// Pump events until `done` holds, failing after `timeout`.
fn wait_until<F>(
    transport: &mut TransportController,
    timeout: Duration,
    what: &str,
    done: F,
) -> Result<()>
where
    F: Fn(&TransportController) -> bool,
{
    if wait_for(transport, timeout, done) {
        Ok(())
    } else {
        bail!("timed out waiting for {}", what)
    }
}

/// Pump events for up to `duration`; true if `done` held first.
fn wait_for<F>(transport: &mut TransportController, duration: Duration, done: F) -> bool
where
    F: Fn(&TransportController) -> bool,
{
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        transport.poll();
        transport.tick(Instant::now());
        if done(transport) {
            return true;
        }
        thread::sleep(CONTROL_INTERVAL);
    }
    false
}

fn report(transport: &TransportController) {
    let statuses: Vec<String> = (0..transport.num_tracks())
        .map(|i| format!("{}:{}", i, transport.track_status(i)))
        .collect();
    info!(
        transport = ?transport.transport_state(),
        phase = transport.loop_phase(),
        "{}",
        statuses.join(" ")
    );
}
