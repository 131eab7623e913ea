//! tunesmith - JSON composition DSL to Standard MIDI File bridge
//!
//! Modes:
//! - `tunesmith json2midi <input.json> <output.mid>` - compile a document
//! - `tunesmith midi2json <input.mid> <output.json>` - decompile a file

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(name = "tunesmith")]
#[command(about = "Bidirectional bridge between Standard MIDI Files and a JSON composition DSL")]
#[command(version)]
struct Cli {
    /// Conversion direction
    mode: Mode,

    /// Input file
    input: PathBuf,

    /// Output file
    output: PathBuf,

    /// Seed for randomized directives (reproducible output)
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    #[value(name = "json2midi")]
    Json2Midi,
    #[value(name = "midi2json")]
    Midi2Json,
}

fn run(cli: &Cli) -> Result<()> {
    match cli.mode {
        Mode::Json2Midi => {
            let input = fs::read_to_string(&cli.input)
                .with_context(|| format!("unable to open input file: {}", cli.input.display()))?;
            let midi = tunesmith::compile_str(&input, cli.seed)?;
            fs::write(&cli.output, midi)
                .with_context(|| format!("unable to write output file: {}", cli.output.display()))?;
            println!("MIDI file created successfully.");
        }
        Mode::Midi2Json => {
            let input = fs::read(&cli.input)
                .with_context(|| format!("unable to open input file: {}", cli.input.display()))?;
            let doc = tunesmith::decompile(&input)?;
            let json = serde_json::to_string_pretty(&doc)?;
            fs::write(&cli.output, json)
                .with_context(|| format!("unable to write output file: {}", cli.output.display()))?;
            println!("JSON file created successfully.");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Exit 1 on bad arguments, matching the error contract of the tool.
    // Help and version output still exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { ExitCode::from(1) } else { ExitCode::SUCCESS };
            let _ = err.print();
            return code;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}
