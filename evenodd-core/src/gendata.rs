use anyhow::{Context, Result};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

const GEN_BUF: usize = 64 * 1024;

/// Write exactly `bytes` pseudo-random bytes to `path`, deterministic in
/// `seed`. Parent directories are created as needed.
pub fn generate(path: &Path, bytes: u64, seed: u64) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("create dir {:?}", parent))?;
        }
    }
    let f = File::create(path).with_context(|| format!("create {:?}", path))?;
    let mut w = BufWriter::new(f);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut buf = vec![0u8; GEN_BUF];
    let mut remaining = bytes;
    while remaining > 0 {
        let n = remaining.min(GEN_BUF as u64) as usize;
        rng.fill_bytes(&mut buf[..n]);
        w.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    w.flush().with_context(|| format!("write {:?}", path))?;
    Ok(())
}
