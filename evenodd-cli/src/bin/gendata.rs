use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Stand-alone deterministic test-data generator:
/// `gendata <bytes> <path> <seed>`.
#[derive(Parser)]
#[command(name = "gendata", version, about = "Deterministic pseudo-random file generator")]
struct Args {
    bytes: u64,
    path: PathBuf,
    seed: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    evenodd_core::gendata::generate(&args.path, args.bytes, args.seed)
}
