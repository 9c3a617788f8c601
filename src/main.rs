//! Tempera Remote CLI - sequence and automate a Tempera over MIDI

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempera::automation::{Automation, ControlTarget, Envelope, EnvelopePreset};
use tempera::config::TemperaConfig;
use tempera::midi_output::{self, RecordingSink};
use tempera::pool::EmitterPool;
use tempera::sequencer::{
    ColumnEngine, ColumnPattern, ColumnSequencer, GridEngine, GridPattern, GridSequencer,
    Sequencer, SequencerTiming, StepEngine,
};
use tempera::TemperaError;
use tracing::info;

#[derive(Parser)]
#[command(name = "tempera")]
#[command(about = "Tempera Remote: sequencing and automation over MIDI", long_about = None)]
struct Cli {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output port name (partial match), overrides the config
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Print the bytes instead of opening a MIDI port
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct TimingArgs {
    /// Tempo in BPM
    #[arg(short, long)]
    bpm: Option<f64>,

    /// Seconds per step (conflicts with --bpm)
    #[arg(short = 's', long)]
    step_duration: Option<f64>,

    /// Steps per beat when using --bpm
    #[arg(long)]
    steps_per_beat: Option<u32>,

    /// Loops to play, 0 = until Ctrl+C
    #[arg(short, long, default_value = "1")]
    loops: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// List MIDI output ports
    Ports,

    /// Run the 64-step grid sequencer
    Grid {
        /// Steps as `step:emitter` pairs, e.g. "0:1,9:2,18:3"
        pattern: String,

        #[command(flatten)]
        timing: TimingArgs,
    },

    /// Run the column sequencer
    Columns {
        /// Column patterns as `column=cell:emitter,...`, e.g. "1=1:1,5:1"
        #[arg(short = 'C', long = "column", required = true)]
        columns: Vec<String>,

        /// Mute patterns as `column=1,0,...` (1 plays)
        #[arg(short, long = "mute")]
        mutes: Vec<String>,

        #[command(flatten)]
        timing: TimingArgs,
    },

    /// Sound a note on one or more emitters
    Play {
        /// Emitters, e.g. "1,3"
        #[arg(default_value = "1")]
        emitters: String,

        /// Note length in seconds
        #[arg(short, long, default_value = "1.0")]
        duration: f64,

        /// MIDI note (default from config)
        #[arg(short, long)]
        note: Option<u8>,

        /// Velocity (default from config)
        #[arg(short, long)]
        velocity: Option<u8>,
    },

    /// Drive one control with an envelope preset
    Automate {
        /// Control, e.g. "emitter.1.volume" or "global.reverb.mix"
        target: String,

        /// ramp_up, ramp_down, triangle, s_curve, square or sawtooth
        #[arg(short = 'P', long, default_value = "triangle")]
        preset: String,

        /// Repeat the preset once per cell
        #[arg(long)]
        per_cell: bool,

        /// Unmodulated value the envelope scales
        #[arg(long, default_value = "127")]
        base: u8,

        /// Tempo in BPM (default from config)
        #[arg(short, long)]
        bpm: Option<f64>,

        /// How long to run, in seconds
        #[arg(short, long, default_value = "8.0")]
        seconds: f64,
    },

    /// Send one `{"method": ...}` command object
    Send {
        /// JSON command, e.g. '{"method": "volume", "emitter": 1, "value": 100}'
        command: String,
    },
}

fn parse_pairs(text: &str) -> Result<Vec<(u8, u8)>, TemperaError> {
    text.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (left, right) = pair
                .split_once(':')
                .ok_or_else(|| TemperaError::InvalidTarget(format!("expected a:b, got '{pair}'")))?;
            let number = |s: &str| {
                s.trim()
                    .parse::<u8>()
                    .map_err(|_| TemperaError::InvalidTarget(format!("bad number in '{pair}'")))
            };
            Ok((number(left)?, number(right)?))
        })
        .collect()
}

fn parse_column_spec(spec: &str) -> Result<(u8, &str), TemperaError> {
    let (column, rest) = spec
        .split_once('=')
        .ok_or_else(|| TemperaError::InvalidTarget(format!("expected column=..., got '{spec}'")))?;
    let column = column
        .trim()
        .parse::<u8>()
        .map_err(|_| TemperaError::InvalidTarget(format!("bad column in '{spec}'")))?;
    Ok((column, rest))
}

fn timing(config: &TemperaConfig, args: &TimingArgs) -> SequencerTiming {
    let mut timing = config.sequencer_timing();
    if args.bpm.is_some() || args.step_duration.is_some() {
        timing.bpm = args.bpm;
        timing.step_duration = args.step_duration;
    }
    if let Some(steps_per_beat) = args.steps_per_beat {
        timing.steps_per_beat = steps_per_beat;
    }
    timing
}

/// Run until the loop count is reached or Ctrl+C, then remove what was placed.
async fn run_sequencer<E: StepEngine + 'static>(
    sequencer: Arc<Sequencer<E>>,
    loops: usize,
) -> Result<(), TemperaError> {
    let mut handle = sequencer.spawn(loops);

    let result = tokio::select! {
        result = &mut handle => match result {
            Ok(result) => result,
            Err(e) => Err(TemperaError::Midi(format!("sequencer task failed: {e}"))),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping");
            sequencer.stop();
            sequencer.join(handle).await
        }
    };

    sequencer.cleanup()?;
    result
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = TemperaConfig::load_or_default(cli.config.as_deref())?;

    if let Commands::Ports = cli.command {
        let ports = midi_output::list_ports()?;
        if ports.is_empty() {
            println!("No MIDI output ports found");
        }
        for (i, port) in ports.iter().enumerate() {
            println!("  [{}] {}", i, port);
        }
        return Ok(());
    }

    let pool = Arc::new(EmitterPool::new(config.pool_config()));
    let recording = if cli.dry_run {
        let sink = RecordingSink::new();
        pool.start(Box::new(sink.clone()))?;
        Some(sink)
    } else {
        let port = cli.port.clone().unwrap_or_else(|| config.port.clone());
        pool.start_on_port(&port)?;
        None
    };

    let outcome = run_command(cli.command, &config, &pool).await;
    pool.stop().await;

    if let Some(sink) = recording {
        for bytes in sink.sent() {
            let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02X}")).collect();
            println!("{}", hex.join(" "));
        }
    }

    outcome?;
    Ok(())
}

async fn run_command(
    command: Commands,
    config: &TemperaConfig,
    pool: &Arc<EmitterPool>,
) -> Result<(), TemperaError> {
    match command {
        Commands::Ports => Ok(()),

        Commands::Grid { pattern, timing: args } => {
            let pattern: GridPattern = parse_pairs(&pattern)?.into_iter().collect();
            let engine = GridEngine::with_pattern(pattern)?;
            let sequencer = Arc::new(
                GridSequencer::new(pool.clone(), engine, timing(config, &args))?
                    .with_note(config.note, config.velocity),
            );
            info!(
                "Grid: {} steps at {:?} per step",
                sequencer.total_steps(),
                sequencer.step_duration()
            );
            run_sequencer(sequencer, args.loops).await
        }

        Commands::Columns {
            columns,
            mutes,
            timing: args,
        } => {
            let mut engine = ColumnEngine::new();
            for spec in &columns {
                let (column, cells) = parse_column_spec(spec)?;
                let pattern: ColumnPattern = parse_pairs(cells)?.into_iter().collect();
                engine.set_column_pattern(column, pattern, pool)?;
            }
            for spec in &mutes {
                let (column, flags) = parse_column_spec(spec)?;
                let flags = flags
                    .split(',')
                    .map(|flag| flag.trim() != "0" && flag.trim() != "false")
                    .collect();
                engine.set_mute_pattern(column, flags)?;
            }

            let sequencer = Arc::new(
                ColumnSequencer::new(pool.clone(), engine, timing(config, &args))?
                    .with_note(config.note, config.velocity),
            );
            run_sequencer(sequencer, args.loops).await
        }

        Commands::Play {
            emitters,
            duration,
            note,
            velocity,
        } => {
            let emitters = emitters
                .split(',')
                .map(|e| {
                    e.trim()
                        .parse::<u8>()
                        .map_err(|_| TemperaError::InvalidTarget(format!("bad emitter '{e}'")))
                })
                .collect::<Result<Vec<u8>, _>>()?;
            let duration = Duration::try_from_secs_f64(duration)
                .map_err(|e| TemperaError::InvalidTiming(e.to_string()))?;
            pool.play_all(
                &emitters,
                note.unwrap_or(config.note),
                velocity.unwrap_or(config.velocity),
                duration,
            )
            .await
        }

        Commands::Automate {
            target,
            preset,
            per_cell,
            base,
            bpm,
            seconds,
        } => {
            let target: ControlTarget = target.parse()?;
            let preset: EnvelopePreset = preset.parse()?;
            let run_for = Duration::try_from_secs_f64(seconds)
                .map_err(|e| TemperaError::InvalidTiming(e.to_string()))?;

            let automation = Automation::new(
                pool.clone(),
                bpm.unwrap_or(config.automation.bpm),
                Duration::from_millis(config.automation.tick_ms),
            );
            automation.set_lane(target, Envelope::from_preset(preset, per_cell), base);
            info!("Automating {} with {} for {:?}", target, preset, run_for);

            automation.start();
            tokio::select! {
                _ = tokio::time::sleep(run_for) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping"),
            }
            automation.stop().await;
            automation.restore_bases()
        }

        Commands::Send { command } => {
            let value: serde_json::Value = serde_json::from_str(&command)?;
            pool.dispatch_json(value).await
        }
    }
}
