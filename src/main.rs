use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dcc_decoder::{Dcc, DecodeOptions, DecodedDirection};

#[derive(Parser)]
#[command(name = "dcc_decoder")]
#[command(about = "Inspect and decode DCC sprite animations")]
#[command(version)]
struct Cli {
    /// Trust the direction offset table and only warn on non-zero reserved bytes
    #[arg(long, global = true)]
    lenient: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the file header, direction headers and pixel code tables
    Info {
        /// Input .dcc file
        input: PathBuf,
    },

    /// Reconstruct the cell entries of one or all directions
    Decode {
        /// Input .dcc file
        input: PathBuf,

        /// Only decode this direction
        #[arg(short, long)]
        direction: Option<usize>,

        /// Print the whole entry log instead of a per-frame summary
        #[arg(long)]
        full: bool,
    },
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open(input: &Path, lenient: bool) -> Result<Dcc> {
    let options = if lenient {
        DecodeOptions::lenient()
    } else {
        DecodeOptions::default()
    };
    Dcc::open_with(input, options).with_context(|| format!("Failed to open {:?}", input))
}

fn info(dcc: &Dcc) -> Value {
    let directions: Vec<Value> = (0..dcc.direction_count())
        .map(|index| match dcc.read_direction(index) {
            Ok(info) => json!(info),
            Err(e) => json!({ "index": index, "error": e.to_string() }),
        })
        .collect();

    json!({
        "header": dcc.header(),
        "directions": directions,
    })
}

fn summarise(decoded: &DecodedDirection) -> Value {
    let frames: Vec<Value> = decoded
        .frames
        .iter()
        .map(|frame| {
            json!({
                "frame": frame.frame,
                "cells": frame.cells.len(),
                "reused": frame.reused_count(),
            })
        })
        .collect();

    json!({
        "index": decoded.index,
        "extents": decoded.direction.extents,
        "grid": decoded.grid,
        "pixel_codes": decoded.pixel_codes.len(),
        "entries": decoded.entries.len(),
        "frames": frames,
    })
}

fn decode(dcc: &Dcc, direction: Option<usize>, full: bool) -> Result<()> {
    let results = match direction {
        Some(index) => vec![dcc.decode_direction(index)],
        None => dcc.decode_all(),
    };

    let mut failures = 0;
    let output: Vec<Value> = results
        .iter()
        .enumerate()
        .map(|(position, result)| match result {
            Ok(decoded) if full => json!(decoded),
            Ok(decoded) => summarise(decoded),
            Err(e) => {
                failures += 1;
                json!({
                    "index": direction.unwrap_or(position),
                    "error": e.to_string(),
                })
            }
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&output)?);

    if failures > 0 {
        bail!("{} of {} directions failed to decode", failures, results.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Info { input } => {
            let dcc = open(&input, cli.lenient)?;
            println!("{}", serde_json::to_string_pretty(&info(&dcc))?);
        }
        Commands::Decode {
            input,
            direction,
            full,
        } => {
            let dcc = open(&input, cli.lenient)?;
            info!(
                directions = dcc.direction_count(),
                frames = dcc.frames_per_direction(),
                "decoding"
            );
            decode(&dcc, direction, full)?;
        }
    }

    Ok(())
}
