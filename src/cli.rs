use crate::config::load_config;
use crate::engine::LabelEngine;
use crate::host::{MapHost, Scene};
use crate::layout_dump::{PlacementDump, write_placement_dump};
use crate::persist::FileStore;
use crate::render::{overlay_svg, write_output_svg};
use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "maplabel", version, about = "Place and de-clutter labels for a map scene")]
pub struct Args {
    /// Scene file (.json) or '-' for stdin
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Output file. Defaults to stdout for JSON/SVG if omitted.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short = 'e', long = "outputFormat", value_enum, default_value = "json")]
    pub output_format: OutputFormat,

    /// Engine config file (JSON5)
    #[arg(short = 'c', long = "configFile")]
    pub config: Option<PathBuf>,

    /// Directory holding saved label positions
    #[arg(short = 'p', long = "positions")]
    pub positions: Option<PathBuf>,

    /// Layer kind preset: pointPipeline, comparison or default
    #[arg(short = 'k', long = "kind")]
    pub kind: Option<String>,

    /// Layout algorithm: directional, force or annealing
    #[arg(short = 'a', long = "algorithm")]
    pub algorithm: Option<String>,

    /// Seed for priority jitter and annealing
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Write edited positions back to the positions directory
    #[arg(long = "save")]
    pub save: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Svg,
    Png,
}

pub fn run() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    if let Some(algorithm) = args.algorithm.as_deref() {
        config.layout.algorithm = algorithm.to_string();
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let input = read_input(args.input.as_deref())?;
    let scene: Scene = serde_json::from_str(&input)
        .map_err(|err| anyhow::anyhow!("Invalid scene JSON: {err}"))?;

    let mut engine = LabelEngine::new(scene, config, Instant::now());
    if let Some(dir) = args.positions.as_deref() {
        std::fs::create_dir_all(dir)?;
        engine = engine.with_store(Box::new(FileStore::new(dir)));
    }
    if let Some(kind) = args.kind.as_deref() {
        check(engine.configure_for_layer_kind(kind))?;
    }

    let mut report = engine.relayout(None, true)?;
    if args.positions.is_some() {
        check(engine.load_positions(true, false, true))?;
        report = engine.relayout(None, true)?;
    }
    if args.save {
        if args.positions.is_none() {
            return Err(anyhow::anyhow!("--save requires --positions"));
        }
        check(engine.save_positions(None, true))?;
    }

    let viewport = engine.host().viewport();
    match args.output_format {
        OutputFormat::Json => {
            let dump = PlacementDump::from_engine(&engine, Some(report));
            match args.output.as_deref() {
                Some(path) => write_placement_dump(path, &dump)?,
                None => println!("{}", serde_json::to_string_pretty(&dump)?),
            }
        }
        OutputFormat::Svg => {
            let svg = overlay_svg(viewport, engine.last_boxes());
            write_output_svg(&svg, args.output.as_deref())?;
        }
        OutputFormat::Png => {
            let output = ensure_output(&args.output, "png")?;
            write_png(&overlay_svg(viewport, engine.last_boxes()), &output, viewport)?;
        }
    }
    engine.destroy();
    Ok(())
}

fn check(result: crate::engine::OpResult) -> Result<()> {
    if result.success {
        Ok(())
    } else {
        Err(anyhow::anyhow!(result.message))
    }
}

#[cfg(feature = "png")]
fn write_png(svg: &str, output: &Path, viewport: crate::ir::Viewport) -> Result<()> {
    crate::render::write_overlay_png(svg, output, viewport)
}

#[cfg(not(feature = "png"))]
fn write_png(_svg: &str, _output: &Path, _viewport: crate::ir::Viewport) -> Result<()> {
    Err(anyhow::anyhow!("PNG output requires the `png` feature"))
}

fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path {
        if path != Path::new("-") {
            return Ok(std::fs::read_to_string(path)?);
        }
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn ensure_output(output: &Option<PathBuf>, ext: &str) -> Result<PathBuf> {
    if let Some(path) = output {
        return Ok(path.clone());
    }
    Err(anyhow::anyhow!("Output path required for {} output", ext))
}
