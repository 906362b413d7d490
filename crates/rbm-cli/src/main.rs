#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use asupersync::Cx;
use clap::{Parser, Subcommand};
use rbm::{MkfsConfig, RandomBlockManager};
use rbm_device::FileByteDevice;
use rbm_types::BlockAddr;
use serde::Serialize;
use std::path::PathBuf;

// ── Production Cx acquisition ───────────────────────────────────────────────

fn cli_cx() -> Cx {
    Cx::for_request()
}

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "rbm", about = "Random-block manager image toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format an image file as a block-manager device.
    Mkfs {
        /// Path to the image file (must already exist at its final size).
        image: PathBuf,
        /// Allocation unit in bytes.
        #[arg(long, default_value_t = 4096)]
        block_size: u32,
    },
    /// Inspect the superblock of a formatted image.
    Inspect {
        /// Path to the image file.
        image: PathBuf,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Print the recorded free-block count.
    Free {
        /// Path to the image file.
        image: PathBuf,
    },
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InspectOutput {
    size: u64,
    block_size: u32,
    free_block_count: u64,
    alloc_area_size: u64,
    start_alloc_area: u64,
    start_data_area: u64,
    feature: u32,
    uuid: String,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Mkfs { image, block_size } => mkfs(&image, block_size),
        Command::Inspect { image, json } => inspect(&image, json),
        Command::Free { image } => free_count(&image),
    }
}

fn open_manager(image: &PathBuf) -> Result<RandomBlockManager<FileByteDevice>> {
    let cx = cli_cx();
    let mut mgr = RandomBlockManager::new(FileByteDevice::new(), image);
    mgr.open(&cx, image, BlockAddr(0))
        .with_context(|| format!("failed to open block-manager image {}", image.display()))?;
    Ok(mgr)
}

fn mkfs(image: &PathBuf, block_size: u32) -> Result<()> {
    let cx = cli_cx();
    let total_size = std::fs::metadata(image)
        .with_context(|| format!("failed to stat {}", image.display()))?
        .len();

    let mut mgr = RandomBlockManager::new(FileByteDevice::new(), image);
    mgr.mkfs(
        &cx,
        MkfsConfig {
            start: 0,
            end: total_size,
            block_size,
            total_size,
        },
    )
    .with_context(|| format!("failed to format {}", image.display()))?;

    let sb = mgr.superblock().context("superblock missing after mkfs")?;
    println!(
        "formatted {}: {} blocks of {} bytes, {} free",
        image.display(),
        sb.size / u64::from(sb.block_size),
        sb.block_size,
        sb.free_block_count
    );
    Ok(())
}

fn inspect(image: &PathBuf, json: bool) -> Result<()> {
    let mut mgr = open_manager(image)?;
    let sb = mgr.superblock().context("superblock missing")?;

    let uuid = sb
        .uuid
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    let output = InspectOutput {
        size: sb.size,
        block_size: sb.block_size,
        free_block_count: sb.free_block_count,
        alloc_area_size: sb.alloc_area_size,
        start_alloc_area: sb.start_alloc_area,
        start_data_area: sb.start_data_area,
        feature: sb.feature,
        uuid,
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("{}", sb);
    }
    mgr.close().context("close image")?;
    Ok(())
}

fn free_count(image: &PathBuf) -> Result<()> {
    let mut mgr = open_manager(image)?;
    println!("{}", mgr.free_block_count());
    mgr.close().context("close image")?;
    Ok(())
}
