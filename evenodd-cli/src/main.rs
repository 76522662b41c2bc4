use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use evenodd_core::decode;
use evenodd_core::encode::Encoder;
use evenodd_core::gendata;
use evenodd_core::repair;
use evenodd_core::store::UnitStore;

/// Cell size used for files written through the CLI. The library takes it as
/// a parameter; the on-disk headers record whatever was used.
const DEFAULT_CELL: usize = 4096;

#[derive(Parser)]
#[command(name = "evenodd", version, about = "EVEN-ODD erasure-coded file store")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Stripe a file across p+2 unit directories (p data, row parity, diagonal parity)
    Write { path: PathBuf, p: usize },
    /// Reassemble a stored file, tolerating up to two lost units
    Read { logical: PathBuf, out: PathBuf },
    /// Rebuild one or two lost units from the survivors: repair <k> <u1> .. <uk>
    Repair { count: usize, units: Vec<usize> },
    /// Write deterministic pseudo-random test data: gendata <bytes> <path> <seed>
    Gendata { bytes: u64, path: PathBuf, seed: u64 },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = UnitStore::new(".");
    match cli.cmd {
        Cmd::Write { path, p } => {
            let report = Encoder::encode(&store, &path, p, DEFAULT_CELL)?;
            eprintln!(
                "Wrote {:?}: {} bytes over {} units ({} stripes, p={})",
                path, report.file_len, report.units, report.stripes, report.prime
            );
        }
        Cmd::Read { logical, out } => {
            let report = decode::read_file(&store, &logical, &out)?;
            if !report.missing_units.is_empty() {
                eprintln!(
                    "Read {:?}: {} bytes, reconstructed around lost units {:?}",
                    logical, report.file_len, report.missing_units
                );
            }
        }
        Cmd::Repair { count, units } => {
            if !(1..=2).contains(&count) {
                bail!("repair count must be 1 or 2, got {count}");
            }
            if units.len() != count {
                bail!("repair count is {count} but {} unit indices were given", units.len());
            }
            let report = repair::repair(&store, &units)?;
            eprintln!(
                "Repaired units {:?}: {} column(s) across {} file(s)",
                units, report.columns_rebuilt, report.files_repaired
            );
        }
        Cmd::Gendata { bytes, path, seed } => gendata::generate(&path, bytes, seed)?,
    }
    Ok(())
}
