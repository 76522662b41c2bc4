use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::codec::EvenOdd;
use crate::header::ColumnHeader;
use crate::layout::Layout;
use crate::path_safety::validate_logical;
use crate::store::{ColumnState, LoadedColumn, UnitStore};

/// Stripes decoded together per rayon batch; bounds peak memory on big files.
const STRIPE_BATCH: u64 = 64;

#[derive(Debug, Clone)]
pub struct ReadReport {
    pub file_len: u64,
    pub missing_units: Vec<usize>,
}

/// Every column of one logical file, classified. `columns[u]` is `None` for
/// erased units; `missing` lists them.
pub struct FileColumns {
    pub header: ColumnHeader,
    pub layout: Layout,
    pub columns: Vec<Option<LoadedColumn>>,
    pub missing: Vec<usize>,
}

/// Locate `logical` across the unit directories. The reference header may
/// come from any surviving unit; columns disagreeing with it count as erased.
/// Fails when the file is unknown to every unit, when no surviving header
/// parses, or when more than two of the file's units are gone.
pub fn open_file_columns(store: &UnitStore, logical: &Path) -> Result<FileColumns> {
    let mut probed: BTreeMap<usize, ColumnState> = BTreeMap::new();
    let mut reference: Option<ColumnHeader> = None;
    let mut saw_file = false;
    for u in store.existing_units()? {
        let state = store.load_column(u, logical)?;
        match &state {
            ColumnState::Loaded(col) => {
                saw_file = true;
                if reference.is_none() {
                    reference = Some(col.header.clone());
                }
            }
            ColumnState::Unreadable => saw_file = true,
            ColumnState::Missing => {}
        }
        probed.insert(u, state);
    }
    let Some(header) = reference else {
        if saw_file {
            bail!("column header unreadable on every surviving unit for {:?}", logical);
        }
        bail!("{:?} not found on any unit", logical);
    };

    let layout =
        Layout::new(header.prime as usize, header.cell_size as usize, header.file_len)?;
    let mut columns: Vec<Option<LoadedColumn>> = Vec::with_capacity(layout.unit_count());
    let mut missing = Vec::new();
    for u in 0..layout.unit_count() {
        let state = probed.remove(&u).unwrap_or(ColumnState::Missing);
        match state {
            ColumnState::Loaded(col) if col.header.same_file(&header) => {
                columns.push(Some(col));
            }
            _ => {
                missing.push(u);
                columns.push(None);
            }
        }
    }
    if missing.len() > 2 {
        bail!(
            "too many failures: {} of {} units unavailable for {:?}",
            missing.len(),
            layout.unit_count(),
            logical
        );
    }
    Ok(FileColumns { header, layout, columns, missing })
}

/// Reassemble `logical` into `out`, reconstructing up to two erased columns.
/// A relative `out` resolves against the store root.
pub fn read_file(store: &UnitStore, logical: &Path, out: &Path) -> Result<ReadReport> {
    validate_logical(logical)?;
    let fc = open_file_columns(store, logical)?;
    let layout = fc.layout;
    let codec = EvenOdd::new(layout.prime, layout.cell_size)?;
    // Data columns are enough for assembly; parity only matters when one of
    // the data columns is gone.
    let needs_decode = fc.missing.iter().any(|&u| u < layout.prime);

    let out = store.root().join(out);
    let out = out.as_path();
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| format!("create dir {:?}", parent))?;
        }
    }
    let f = File::create(out).with_context(|| format!("create {:?}", out))?;
    let mut w = BufWriter::new(f);

    let stripes = layout.stripes();
    let mut remaining = layout.file_len;
    let mut s = 0u64;
    while s < stripes {
        let end = (s + STRIPE_BATCH).min(stripes);
        let decoded: Vec<Vec<u8>> = (s..end)
            .into_par_iter()
            .map(|si| decode_stripe(&fc, &codec, &layout, si, needs_decode))
            .collect::<Result<Vec<_>>>()?;
        for buf in decoded {
            let take = remaining.min(buf.len() as u64) as usize;
            w.write_all(&buf[..take])?;
            remaining -= take as u64;
        }
        s = end;
    }
    w.flush().with_context(|| format!("write {:?}", out))?;

    Ok(ReadReport { file_len: layout.file_len, missing_units: fc.missing })
}

/// One stripe back in file byte order: consecutive cells rotate across the
/// data units, row by row.
fn decode_stripe(
    fc: &FileColumns,
    codec: &EvenOdd,
    layout: &Layout,
    stripe: u64,
    needs_decode: bool,
) -> Result<Vec<u8>> {
    let p = layout.prime;
    let b = layout.cell_size;
    let mut shards: Vec<Option<Vec<u8>>> = fc
        .columns
        .iter()
        .enumerate()
        .map(|(u, col)| {
            if !needs_decode && u >= p {
                return None;
            }
            col.as_ref().map(|c| c.stripe_column(stripe).to_vec())
        })
        .collect();
    if needs_decode {
        codec.reconstruct(&mut shards)?;
    }
    let mut out = vec![0u8; layout.stripe_bytes() as usize];
    for r in 0..layout.rows() {
        for (j, shard) in shards.iter().take(p).enumerate() {
            let col = shard.as_ref().expect("data column present after reconstruct");
            let off = (r * p + j) * b;
            out[off..off + b].copy_from_slice(&col[r * b..(r + 1) * b]);
        }
    }
    Ok(out)
}
