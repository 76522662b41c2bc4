use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::codec::EvenOdd;
use crate::decode::{open_file_columns, FileColumns};
use crate::header::write_header;
use crate::store::UnitStore;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RepairReport {
    pub files_scanned: u64,
    pub files_repaired: u64,
    pub columns_rebuilt: u64,
}

/// Rebuild every file the listed units should hold. The logical-file set is
/// the union of the surviving directories' listings, so a wiped unit is
/// repopulated without ever being consulted. Surviving columns are never
/// rewritten, which makes a second run over the same indices a no-op.
pub fn repair(store: &UnitStore, units: &[usize]) -> Result<RepairReport> {
    if units.is_empty() || units.len() > 2 {
        bail!("repair takes 1 or 2 unit indices, got {}", units.len());
    }
    if units.len() == 2 && units[0] == units[1] {
        bail!("repair unit indices must be distinct");
    }

    let _lock = store.lock()?;
    let mut report = RepairReport { files_scanned: 0, files_repaired: 0, columns_rebuilt: 0 };
    for logical in store.enumerate_logical()? {
        report.files_scanned += 1;
        let fc = open_file_columns(store, &logical)?;
        // A unit index past this file's p+2 holds nothing for it.
        let targets: Vec<usize> = units
            .iter()
            .copied()
            .filter(|&u| u < fc.layout.unit_count() && fc.missing.contains(&u))
            .collect();
        if targets.is_empty() {
            continue;
        }
        rebuild_columns(store, &fc, &logical, &targets)?;
        report.files_repaired += 1;
        report.columns_rebuilt += targets.len() as u64;
    }
    Ok(report)
}

/// Re-derive the target columns of one file and stage them into place. The
/// header is the survivor's with only the unit index rewritten, so the
/// rebuilt object is byte-identical to the lost one.
fn rebuild_columns(
    store: &UnitStore,
    fc: &FileColumns,
    logical: &Path,
    targets: &[usize],
) -> Result<()> {
    let layout = fc.layout;
    let codec = EvenOdd::new(layout.prime, layout.cell_size)?;
    let mut staged: Vec<Arc<Mutex<File>>> = Vec::with_capacity(targets.len());
    let mut tmp_paths = Vec::with_capacity(targets.len());

    let result = (|| -> Result<()> {
        let mut base = 0u64;
        for &u in targets {
            let (mut f, tmp) = store.stage_column(u, logical)?;
            base = write_header(&mut f, &fc.header.for_unit(u))?;
            staged.push(Arc::new(Mutex::new(f)));
            tmp_paths.push(tmp);
        }

        let csb = layout.column_stripe_bytes();
        (0..layout.stripes()).into_par_iter().try_for_each(|s| -> Result<()> {
            let mut shards: Vec<Option<Vec<u8>>> = fc
                .columns
                .iter()
                .map(|col| col.as_ref().map(|c| c.stripe_column(s).to_vec()))
                .collect();
            codec.reconstruct(&mut shards)?;
            for (i, &u) in targets.iter().enumerate() {
                let col = shards[u].as_ref().expect("column rebuilt");
                let mut f = staged[i].lock().map_err(|e| anyhow::anyhow!("poisoned lock: {e}"))?;
                f.seek(SeekFrom::Start(base + s * csb as u64))?;
                f.write_all(col)?;
            }
            Ok(())
        })?;

        for (i, &u) in targets.iter().enumerate() {
            let f = staged[i].lock().map_err(|e| anyhow::anyhow!("poisoned lock: {e}"))?;
            f.sync_all().context("sync rebuilt column")?;
            drop(f);
            store.commit_column(&tmp_paths[i], u, logical)?;
        }
        Ok(())
    })();

    if result.is_err() {
        for tmp in &tmp_paths {
            let _ = std::fs::remove_file(tmp);
        }
    }
    result
}
