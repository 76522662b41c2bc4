use anyhow::{bail, Context, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::codec::EvenOdd;
use crate::header::{write_header, ColumnHeader, HEADER_VERSION};
use crate::layout::Layout;
use crate::path_safety::validate_logical;
use crate::store::UnitStore;

#[derive(Debug, Clone)]
pub struct WriteReport {
    pub prime: usize,
    pub cell_size: usize,
    pub file_len: u64,
    pub stripes: u64,
    pub units: usize,
}

pub struct Encoder;

impl Encoder {
    /// Stripes `path` across `p+2` unit directories under `store`. The
    /// source path doubles as the logical name mirrored on every unit, so it
    /// is relative and resolves against the store root.
    pub fn encode(
        store: &UnitStore,
        path: &Path,
        prime: usize,
        cell_size: usize,
    ) -> Result<WriteReport> {
        let codec = EvenOdd::new(prime, cell_size)?;
        validate_logical(path)?;

        let _lock = store.lock()?;
        if store.column_exists_anywhere(path)? {
            bail!("{:?} already exists in the store", path);
        }

        let source = store.root().join(path);
        let src = File::open(&source).with_context(|| format!("open {:?}", source))?;
        let file_len = src.metadata()?.len();
        let layout = Layout::new(prime, cell_size, file_len)?;
        // Empty files have no stripes and nothing to map.
        let src_map = if file_len > 0 {
            Some(unsafe { Mmap::map(&src).with_context(|| format!("map {:?}", source))? })
        } else {
            None
        };

        let header = ColumnHeader {
            version: HEADER_VERSION,
            prime: prime as u32,
            cell_size: cell_size as u32,
            file_len,
            stripes: layout.stripes(),
            unit: 0,
            created_utc: chrono::Utc::now().to_rfc3339(),
        };

        let unit_count = layout.unit_count();
        let mut staged: Vec<Arc<Mutex<File>>> = Vec::with_capacity(unit_count);
        let mut tmp_paths = Vec::with_capacity(unit_count);

        let result = (|| -> Result<()> {
            let mut base = 0u64;
            for u in 0..unit_count {
                let (mut f, tmp) = store.stage_column(u, path)?;
                base = write_header(&mut f, &header.for_unit(u))?;
                staged.push(Arc::new(Mutex::new(f)));
                tmp_paths.push(tmp);
            }

            let rows = layout.rows();
            let csb = layout.column_stripe_bytes();
            (0..layout.stripes()).into_par_iter().try_for_each(|s| -> Result<()> {
                let mut cols: Vec<Vec<u8>> = (0..unit_count).map(|_| vec![0u8; csb]).collect();
                if let Some(src) = &src_map {
                    for (j, col) in cols.iter_mut().take(prime).enumerate() {
                        for r in 0..rows {
                            let off = layout.source_offset(s, r, j);
                            if off >= file_len {
                                continue;
                            }
                            let take = ((file_len - off) as usize).min(cell_size);
                            col[r * cell_size..r * cell_size + take]
                                .copy_from_slice(&src[off as usize..off as usize + take]);
                        }
                    }
                }
                let mut refs: Vec<&mut [u8]> = cols.iter_mut().map(|c| c.as_mut_slice()).collect();
                codec.encode(&mut refs)?;
                for (u, col) in cols.iter().enumerate() {
                    let mut f =
                        staged[u].lock().map_err(|e| anyhow::anyhow!("poisoned lock: {e}"))?;
                    f.seek(SeekFrom::Start(base + s * csb as u64))?;
                    f.write_all(col)?;
                }
                Ok(())
            })?;

            for (u, f) in staged.iter().enumerate() {
                let f = f.lock().map_err(|e| anyhow::anyhow!("poisoned lock: {e}"))?;
                f.sync_all().context("sync staged column")?;
                drop(f);
                store.commit_column(&tmp_paths[u], u, path)?;
            }
            Ok(())
        })();

        if result.is_err() {
            for tmp in &tmp_paths {
                let _ = std::fs::remove_file(tmp);
            }
        }
        result?;

        Ok(WriteReport {
            prime,
            cell_size,
            file_len,
            stripes: layout.stripes(),
            units: unit_count,
        })
    }
}
