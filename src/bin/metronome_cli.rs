use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use metronome_engine::audio::{
    generate_click_sample, synthesize, AudioDecoder, ClickAssetSet, ClickSound, WavDecoder,
};
use metronome_engine::engine::{tick_channel, ManualPlaybackEngine, MetronomeEngine, PlaybackEngine};
use metronome_engine::{AppConfig, WakeupMode};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "metronome_cli",
    about = "Play or render metronome clicks with pre-count"
)]
struct Cli {
    /// JSON configuration file (missing or invalid files fall back to defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play through the default output device and print ticks as JSON lines
    Play(PlayArgs),
    /// Write synthesized bars to a WAV file
    Render(RenderArgs),
}

#[derive(Args, Debug, Clone)]
struct SoundArgs {
    #[arg(long)]
    bpm: Option<u32>,
    #[arg(long)]
    time_signature: Option<u32>,
    /// Pre-count bars before tick 0
    #[arg(long)]
    pre_count: Option<u32>,
    /// Main click WAV (defaults to a generated noise burst)
    #[arg(long)]
    main: Option<PathBuf>,
    /// Accented click WAV (defaults to the main click)
    #[arg(long)]
    accented: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct PlayArgs {
    #[command(flatten)]
    sound: SoundArgs,
    #[arg(long)]
    volume: Option<f32>,
    /// Stop after this many seconds (runs until Ctrl-C otherwise)
    #[arg(long)]
    seconds: Option<f64>,
    /// Drive an in-memory renderer instead of the audio device
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug, Clone)]
struct RenderArgs {
    #[command(flatten)]
    sound: SoundArgs,
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Total bars written, pre-count bars included
    #[arg(long, default_value_t = 4)]
    bars: u32,
    #[arg(long)]
    output: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("metronome_cli error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::default(),
    };

    match cli.command {
        Command::Play(args) => {
            apply_sound_args(&mut config, &args.sound);
            if let Some(volume) = args.volume {
                config.metronome.volume = volume;
            }
            run_play(config, args)
        }
        Command::Render(args) => {
            apply_sound_args(&mut config, &args.sound);
            if let Some(sample_rate) = args.sample_rate {
                config.metronome.sample_rate = sample_rate;
            }
            run_render(config, args)
        }
    }
}

fn apply_sound_args(config: &mut AppConfig, args: &SoundArgs) {
    if let Some(bpm) = args.bpm {
        config.metronome.bpm = bpm;
    }
    if let Some(time_signature) = args.time_signature {
        config.metronome.time_signature = time_signature;
    }
    if let Some(pre_count) = args.pre_count {
        config.metronome.pre_count_bars = pre_count;
    }
}

fn load_click(path: &Path) -> Result<ClickSound> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    WavDecoder
        .decode(&bytes)
        .with_context(|| format!("decoding {}", path.display()))
}

fn load_assets(args: &SoundArgs, sample_rate: u32) -> Result<ClickAssetSet> {
    let main = match &args.main {
        Some(path) => load_click(path)?,
        None => generate_click_sample(sample_rate),
    };
    let accented = args.accented.as_deref().map(load_click).transpose()?;
    Ok(ClickAssetSet::new(main, accented, None, None))
}

#[cfg(not(target_os = "android"))]
fn device_engine(sample_rate: u32) -> Result<Arc<dyn PlaybackEngine>> {
    Ok(Arc::new(metronome_engine::engine::CpalPlaybackEngine::new(
        sample_rate,
    )))
}

#[cfg(target_os = "android")]
fn device_engine(_sample_rate: u32) -> Result<Arc<dyn PlaybackEngine>> {
    bail!("device playback is not available on this platform; use --dry-run")
}

fn run_play(mut config: AppConfig, args: PlayArgs) -> Result<()> {
    // poll() advances one beat per call, so the CLI always uses the wakeup thread
    config.scheduler.wakeup = WakeupMode::Thread;
    let sample_rate = config.metronome.sample_rate;
    let assets = load_assets(&args.sound, sample_rate)?;

    let manual = args.dry_run.then(|| Arc::new(ManualPlaybackEngine::new()));
    let engine: Arc<dyn PlaybackEngine> = match &manual {
        Some(manual) => manual.clone(),
        None => device_engine(sample_rate)?,
    };

    let metronome = MetronomeEngine::new(&config, assets, engine)?;
    let (sink, mut ticks) = tick_channel();
    metronome.enable_tick_callback(sink)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        if let Some(manual) = manual {
            // Stand-in for the device clock: advance in 10ms blocks.
            tokio::spawn(async move {
                let block = Duration::from_millis(10);
                let frames = (sample_rate / 100).max(1) as u64;
                let mut interval = tokio::time::interval(block);
                loop {
                    interval.tick().await;
                    manual.advance_frames(frames);
                }
            });
        }

        metronome.play(None)?;

        let deadline = async {
            match args.seconds {
                Some(seconds) => {
                    tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                Some(event) = ticks.recv() => {
                    println!("{}", serde_json::to_string(&event)?);
                }
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("[metronome_cli] Interrupted");
                    break;
                }
            }
        }

        metronome.destroy()?;
        Ok::<(), anyhow::Error>(())
    })
}

fn run_render(config: AppConfig, args: RenderArgs) -> Result<()> {
    config.metronome.validate()?;
    let metronome = &config.metronome;
    let assets = load_assets(&args.sound, metronome.sample_rate)?;

    if args.bars == 0 {
        bail!("--bars must be greater than 0");
    }

    let pre_count_bar = synthesize(
        &assets,
        metronome.bpm,
        metronome.time_signature,
        metronome.sample_rate,
        true,
    )?;
    let bar = synthesize(
        &assets,
        metronome.bpm,
        metronome.time_signature,
        metronome.sample_rate,
        false,
    )?;

    let spec = hound::WavSpec {
        channels: bar.channels(),
        sample_rate: metronome.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&args.output, spec)
        .with_context(|| format!("creating {}", args.output.display()))?;

    for index in 0..args.bars {
        let source = if index < metronome.pre_count_bars {
            &pre_count_bar
        } else {
            &bar
        };
        for &sample in source.samples() {
            writer.write_sample(sample)?;
        }
    }
    writer.finalize()?;

    tracing::info!(
        "[metronome_cli] Wrote {} bar(s) ({} frames each) to {}",
        args.bars,
        bar.frames(),
        args.output.display()
    );
    Ok(())
}
