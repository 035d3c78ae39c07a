//! earsynth - Render and cache ear-training audio from the command line.
//!
//! # Usage
//!
//! ```bash
//! earsynth --soundfont piano.sf2 render C4 E4 --mode melodic
//! earsynth --engine tone interval C4 perfect_fifth --mode harmonic
//! earsynth instruments
//! earsynth stats
//! earsynth clear
//! ```
//!
//! Configuration comes from an optional JSON, TOML or YAML file
//! (`--config`, format taken from the extension) and the environment (`SOUNDFONT_PATH`, `MEDIA_ROOT`, `AUDIO_CACHE_ENABLED`, ...).
//! Set `RUST_LOG=info` to see what the service is doing.

use anyhow::{bail, Context, Result};
use clap::{crate_version, Parser, Subcommand};
use earsynth::audio::{EngineKind, OutputFormat};
use earsynth::{AudioConfig, AudioRef, AudioService, Direction, Instrument, Interval, Pitch, Presentation, RenderOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    version = crate_version!(),
    about = "Renders and caches audio for ear-training exercises."
)]
struct Cli {
    /// Configuration file (JSON, TOML or YAML). Environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SoundFont file (.sf2) to render with.
    #[arg(short, long, global = true)]
    soundfont: Option<PathBuf>,

    /// Synthesis engine: soundfont or tone.
    #[arg(short, long, global = true)]
    engine: Option<EngineKind>,

    #[clap(subcommand)]
    command: Commands,
}

/// Rendering flags shared by the render commands.
#[derive(clap::Args)]
struct RenderArgs {
    /// Presentation: melodic, harmonic or staggered.
    #[arg(short, long, default_value = "melodic")]
    mode: String,

    /// Instrument name (e.g. piano, violin) or program:<n>.
    #[arg(short, long, default_value = "piano")]
    instrument: String,

    /// Note-on velocity (0-127).
    #[arg(short, long, default_value_t = 100)]
    velocity: u8,

    /// Output sample rate in Hz.
    #[arg(short = 'r', long)]
    sample_rate: Option<u32>,

    /// Write a single-channel file.
    #[arg(long)]
    mono: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Renders a sequence of notes.
    Render {
        /// Note names such as C4, F#3 or Bb5.
        #[arg(required = true)]
        notes: Vec<String>,

        #[command(flatten)]
        args: RenderArgs,
    },
    /// Renders an interval above (or below) a root note.
    Interval {
        /// Root note name.
        root: String,

        /// Interval name or notation (e.g. perfect_fifth, minor_third, 3M).
        interval: String,

        /// Build the interval downward.
        #[arg(short, long)]
        descending: bool,

        #[command(flatten)]
        args: RenderArgs,
    },
    /// Lists the presets in the configured SoundFont.
    Instruments {},
    /// Prints cache statistics.
    Stats {},
    /// Deletes all cached audio.
    Clear {},
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => AudioConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AudioConfig::from_env().context("Invalid audio configuration")?,
    };
    if let Some(soundfont) = cli.soundfont {
        config.soundfont_path = Some(soundfont);
        config.engine = EngineKind::SoundFont;
    }
    if let Some(engine) = cli.engine {
        config.engine = engine;
    }

    let service = AudioService::from_config(&config).context("Failed to start audio service")?;

    match cli.command {
        Commands::Render { notes, args } => {
            let notes = notes
                .iter()
                .map(|n| Pitch::parse(n))
                .collect::<Result<Vec<_>, _>>()?;
            let (instrument, presentation, options) = render_settings(&args)?;
            let audio = service.generate_audio_for(&notes, &instrument, &presentation, &options)?;
            print_audio(&audio);
        }
        Commands::Interval {
            root,
            interval,
            descending,
            args,
        } => {
            let root = Pitch::parse(&root)?;
            let interval: Interval = interval.parse()?;
            let direction = if descending {
                Direction::Descending
            } else {
                Direction::Ascending
            };
            let (instrument, presentation, options) = render_settings(&args)?;
            let audio =
                service.generate_interval(root, interval, direction, &instrument, &presentation, &options)?;
            print_audio(&audio);
        }
        Commands::Instruments {} => match service.instrument_names()? {
            Some(names) => {
                for (program, name) in names.iter().enumerate() {
                    println!("{:3}  {}", program, name);
                }
            }
            None => bail!("The {} engine has no instrument presets", service.bank().id()),
        },
        Commands::Stats {} => match service.stats() {
            Some(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
            None => println!("Caching is disabled"),
        },
        Commands::Clear {} => {
            let removed = service.clear_cache();
            println!("Removed {} cached files", removed);
        }
    }

    service.shutdown()?;
    Ok(())
}

fn render_settings(args: &RenderArgs) -> Result<(Instrument, Presentation, RenderOptions)> {
    let instrument = Instrument::from_name(&args.instrument)?;
    let presentation = Presentation::from_mode(&args.mode)?;
    let options = RenderOptions {
        velocity: args.velocity,
        sample_rate: args.sample_rate,
        format: if args.mono {
            OutputFormat::WavMono16
        } else {
            OutputFormat::WavStereo16
        },
    };
    Ok((instrument, presentation, options))
}

fn print_audio(audio: &AudioRef) {
    println!("{}", audio.path.display());
    println!("{}", audio.url);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_usage_parses() {
        let cli = Cli::try_parse_from([
            "earsynth",
            "--engine",
            "tone",
            "interval",
            "C4",
            "perfect_fifth",
            "--mode",
            "harmonic",
        ])
        .unwrap();
        assert_eq!(cli.engine, Some(EngineKind::Tone));
        match cli.command {
            Commands::Interval { root, interval, args, .. } => {
                assert_eq!(Pitch::parse(&root).unwrap(), Pitch::MIDDLE_C);
                assert_eq!(interval.parse::<Interval>().unwrap(), Interval::PerfectFifth);
                assert_eq!(Presentation::from_mode(&args.mode).unwrap(), Presentation::harmonic());
            }
            _ => panic!("expected the interval command"),
        }
        assert_eq!("5J".parse::<Interval>().unwrap(), Interval::PerfectFifth);
    }

    #[test]
    fn test_render_usage_parses() {
        let cli = Cli::try_parse_from(["earsynth", "--soundfont", "piano.sf2", "render", "C4", "E4", "--mode", "melodic"])
            .unwrap();
        assert_eq!(cli.soundfont, Some(PathBuf::from("piano.sf2")));
        match cli.command {
            Commands::Render { notes, args } => {
                assert_eq!(notes, ["C4", "E4"]);
                let (instrument, presentation, options) = render_settings(&args).unwrap();
                assert_eq!(instrument, Instrument::piano());
                assert_eq!(presentation, Presentation::melodic());
                assert_eq!(options.format, OutputFormat::WavStereo16);
            }
            _ => panic!("expected the render command"),
        }
    }
}
