//! Run the full pipeline against synthetic targets.

use clap::{Parser, ValueEnum};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use sightline::sim::{LoggingActuator, Scene, SimConfig, SyntheticDetector, SyntheticSource};
use sightline::{PipelineBuilder, PipelineConfig, SightlineResult};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    Default,
    LowLatency,
}

/// Sightline pipeline simulator
#[derive(Parser, Debug)]
#[command(name = "sightline-sim")]
#[command(about = "Run the capture/detect/track/actuate pipeline on synthetic targets")]
#[command(version)]
struct Args {
    /// Pipeline configuration (YAML); overrides --preset
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in configuration when no file is given
    #[arg(long, value_enum, default_value = "default")]
    preset: Preset,

    /// How long to run
    #[arg(short, long, default_value_t = 5.0)]
    duration_secs: f64,

    /// Number of moving targets
    #[arg(short, long, default_value_t = 3)]
    targets: usize,

    /// Source frame rate
    #[arg(long, default_value_t = 240.0)]
    fps: f32,

    /// Probability the detector misses a target
    #[arg(long, default_value_t = 0.05)]
    miss_rate: f64,

    /// Simulated inference time (microseconds)
    #[arg(long, default_value_t = 2000)]
    inference_us: u64,

    /// RNG seed for the scene and the detector
    #[arg(long)]
    seed: Option<u64>,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    print_config: bool,

    /// Increase output verbosity (show debug messages)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Only show errors
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .format_target(false)
        .init();

    if let Err(e) = run(args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> SightlineResult<()> {
    let config = match &args.config {
        Some(path) => PipelineConfig::from_yaml_file(path)?,
        None => match args.preset {
            Preset::Default => PipelineConfig::default(),
            Preset::LowLatency => PipelineConfig::low_latency(),
        },
    };

    if args.print_config {
        print!("{}", config.to_yaml_string()?);
        return Ok(());
    }

    let defaults = SimConfig::default();
    let sim = SimConfig {
        targets: args.targets,
        fps: args.fps,
        miss_rate: args.miss_rate,
        inference_latency_us: args.inference_us,
        seed: args.seed.unwrap_or(defaults.seed),
        ..defaults
    };

    let mut rng = SmallRng::seed_from_u64(sim.seed);
    let scene = Scene::random(
        config.capture.width,
        config.capture.height,
        sim.targets,
        &mut rng,
    );
    let source = SyntheticSource::new(scene, sim.fps)
        .with_roi_offset(config.capture.roi_offset.0, config.capture.roi_offset.1)
        .with_channels(config.capture.channels);
    let actuator = LoggingActuator::new();
    let counts = actuator.counts();

    log::info!(
        "Simulating {} target(s) at {} fps for {:.1}s",
        sim.targets,
        sim.fps,
        args.duration_secs
    );

    let pipeline = PipelineBuilder::new(config)
        .source(source)
        .detector(SyntheticDetector::new(&sim))
        .actuator(actuator)
        .deadman_seed(sim.seed)
        .start()?;

    let deadline = Instant::now() + Duration::from_secs_f64(args.duration_secs.max(0.0));
    let mut next_report = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if pipeline.is_halted() {
            log::error!("Actuation halted, stopping pipeline");
            break;
        }
        if Instant::now() >= next_report {
            let aim = pipeline.aim_command();
            match aim.position() {
                Some((x, y)) => log::info!(
                    "aim ({:.1}, {:.1}) {:?} track {} | {} tracks",
                    x,
                    y,
                    aim.hitbox(),
                    aim.track_id,
                    pipeline.stats().track_count
                ),
                None => log::info!("no target | {} tracks", pipeline.stats().track_count),
            }
            next_report += Duration::from_secs(1);
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    let stats = pipeline.shutdown()?;
    println!("{}", stats);
    println!(
        "actuator: {} command(s), {} with a target",
        counts.commands(),
        counts.targeted()
    );
    Ok(())
}
