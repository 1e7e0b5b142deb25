//! slidewarp - Rectify photographed presentation slides
//!
//! Finds the projector screen or monitor in a photo, warps it to a flat
//! landscape rectangle and optionally cleans up color, contrast and noise.
//! When no screen outline can be found a centered crop is written instead.

mod batch;
mod color;
mod config;
mod detect;
mod enhance;
mod error;
mod geometry;
mod pipeline;
mod rectify;
mod transform;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::batch::BatchJob;
use crate::config::Config;
use crate::pipeline::SlidePipeline;

/// slidewarp - turn photos of slides into flat, readable images
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Photo of the slide (JPEG or PNG)
    input: Option<PathBuf>,

    /// Output image path; the format follows the extension
    output: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Skip white balance, contrast, denoise and sharpening
    #[arg(long, global = true)]
    no_enhance: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a numbered range of photos, e.g. IMG_2600.JPG .. IMG_2699.JPG
    Batch {
        /// Directory holding the photos
        #[arg(long)]
        input_dir: PathBuf,

        /// Directory for the rectified slides (created if missing)
        #[arg(long)]
        output_dir: PathBuf,

        /// First file number (inclusive)
        #[arg(long)]
        start: u32,

        /// Last file number (exclusive)
        #[arg(long)]
        end: u32,

        /// File name prefix [default: from config, IMG_]
        #[arg(long)]
        prefix: Option<String>,

        /// Input file extension [default: from config, JPG]
        #[arg(long)]
        input_ext: Option<String>,

        /// Output file extension [default: from config, PNG]
        #[arg(long)]
        output_ext: Option<String>,
    },
}

/// Positional paths for single-image mode, or a usage error
fn single_paths(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
) -> std::result::Result<(PathBuf, PathBuf), clap::Error> {
    match (input, output) {
        (Some(input), Some(output)) => Ok((input, output)),
        _ => Err(Args::command().error(
            ErrorKind::MissingRequiredArgument,
            "<INPUT> and <OUTPUT> are required unless a subcommand is given",
        )),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("slidewarp v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let pipeline = SlidePipeline::new(&config, !args.no_enhance);

    match args.command {
        Some(Command::Batch {
            input_dir,
            output_dir,
            start,
            end,
            prefix,
            input_ext,
            output_ext,
        }) => {
            let mut naming = config.batch.clone();
            if let Some(prefix) = prefix {
                naming.prefix = prefix;
            }
            if let Some(ext) = input_ext {
                naming.input_ext = ext;
            }
            if let Some(ext) = output_ext {
                naming.output_ext = ext;
            }

            let job = BatchJob {
                input_dir,
                output_dir,
                start,
                end,
                naming,
            };
            let report = batch::run_batch(&pipeline, &job)
                .with_context(|| format!("Failed to prepare output directory {:?}", job.output_dir))?;

            let missing = report.missing_indices();
            if !missing.is_empty() {
                warn!("Skipped missing indices: {:?}", missing);
            }
            for (input, reason) in report.failures() {
                warn!("Not processed: {} ({})", input.display(), reason);
            }
        }
        None => {
            let (input, output) = single_paths(args.input, args.output).unwrap_or_else(|e| e.exit());

            let outcome = pipeline
                .process_file(&input, &output)
                .with_context(|| format!("Failed to rectify {:?}", input))?;
            info!(
                "Saved: {} ({}x{}{})",
                outcome.output.display(),
                outcome.width,
                outcome.height,
                if outcome.method.is_fallback() { ", fallback crop" } else { "" }
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_mode_arguments() {
        let args = Args::try_parse_from(["slidewarp", "-v", "photo.jpg", "slide.png"]).unwrap();
        assert!(args.verbose);
        assert!(args.command.is_none());

        let (input, output) = single_paths(args.input, args.output).unwrap();
        assert_eq!(input, PathBuf::from("photo.jpg"));
        assert_eq!(output, PathBuf::from("slide.png"));
    }

    #[test]
    fn test_missing_paths_is_usage_error() {
        let args = Args::try_parse_from(["slidewarp", "photo.jpg"]).unwrap();
        let err = single_paths(args.input, args.output).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_ne!(err.exit_code(), 0);

        let args = Args::try_parse_from(["slidewarp"]).unwrap();
        assert!(single_paths(args.input, args.output).is_err());
    }

    #[test]
    fn test_batch_subcommand_parses() {
        let args = Args::try_parse_from([
            "slidewarp",
            "batch",
            "--input-dir",
            "photos",
            "--output-dir",
            "slides",
            "--start",
            "2600",
            "--end",
            "2700",
            "--output-ext",
            "jpg",
            "--no-enhance",
        ])
        .unwrap();

        assert!(args.no_enhance);
        assert!(args.input.is_none());
        match args.command {
            Some(Command::Batch {
                input_dir,
                start,
                end,
                prefix,
                output_ext,
                ..
            }) => {
                assert_eq!(input_dir, PathBuf::from("photos"));
                assert_eq!((start, end), (2600, 2700));
                assert_eq!(prefix, None);
                assert_eq!(output_ext.as_deref(), Some("jpg"));
            }
            None => panic!("batch subcommand not parsed"),
        }
    }

    #[test]
    fn test_batch_requires_range() {
        let err = Args::try_parse_from([
            "slidewarp",
            "batch",
            "--input-dir",
            "photos",
            "--output-dir",
            "slides",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }
}
