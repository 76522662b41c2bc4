use anyhow::{Context, Result};
use fs2::FileExt;
use memmap2::Mmap;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::header::{read_header, ColumnHeader};
use crate::layout::Layout;

/// Unit `u` lives in directory `disk{u}` under the store root.
pub const UNIT_PREFIX: &str = "disk";
/// Staged writes carry this suffix until renamed into place.
pub const TMP_SUFFIX: &str = ".eo-tmp";
const LOCK_FILE: &str = ".evenodd.lock";

/// Catalog and byte I/O over the per-unit directories. A unit whose
/// directory is absent is lost; a present directory without the column file
/// is file-lost. Both are erasures of that column.
pub struct UnitStore {
    root: PathBuf,
}

/// What a unit holds for one logical file.
pub enum ColumnState {
    /// Unit directory or column file absent.
    Missing,
    /// File present but header or length checks failed.
    Unreadable,
    Loaded(LoadedColumn),
}

/// A memory-mapped column object with its parsed header.
pub struct LoadedColumn {
    pub header: ColumnHeader,
    map: Mmap,
    data_offset: usize,
    column_stripe_bytes: usize,
}

impl LoadedColumn {
    /// This unit's cells for one stripe.
    pub fn stripe_column(&self, stripe: u64) -> &[u8] {
        let start = self.data_offset + stripe as usize * self.column_stripe_bytes;
        &self.map[start..start + self.column_stripe_bytes]
    }
}

impl UnitStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unit_dir(&self, unit: usize) -> PathBuf {
        self.root.join(format!("{UNIT_PREFIX}{unit}"))
    }

    pub fn unit_present(&self, unit: usize) -> bool {
        self.unit_dir(unit).is_dir()
    }

    pub fn column_path(&self, unit: usize, logical: &Path) -> PathBuf {
        self.unit_dir(unit).join(logical)
    }

    /// Advisory whole-store lock held for the duration of write/repair.
    pub fn lock(&self) -> Result<File> {
        let f = File::create(self.root.join(LOCK_FILE)).context("create store lock")?;
        f.try_lock_exclusive().context("acquire store lock")?;
        Ok(f)
    }

    /// Indices of the unit directories that exist right now, ascending.
    pub fn existing_units(&self) -> Result<Vec<usize>> {
        let mut units = Vec::new();
        for ent in fs::read_dir(&self.root).with_context(|| format!("list {:?}", self.root))? {
            let ent = ent?;
            if !ent.file_type()?.is_dir() {
                continue;
            }
            let name = ent.file_name();
            let Some(idx) = name.to_str().and_then(|n| n.strip_prefix(UNIT_PREFIX)) else {
                continue;
            };
            if let Ok(u) = idx.parse::<usize>() {
                units.push(u);
            }
        }
        units.sort_unstable();
        Ok(units)
    }

    /// True if any existing unit already holds `logical`.
    pub fn column_exists_anywhere(&self, logical: &Path) -> Result<bool> {
        for u in self.existing_units()? {
            if self.column_path(u, logical).is_file() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Open and validate one column. Header failures, geometry mismatches and
    /// truncation all classify as `Unreadable` rather than erroring: the
    /// caller decides whether enough columns survive.
    pub fn load_column(&self, unit: usize, logical: &Path) -> Result<ColumnState> {
        if !self.unit_present(unit) {
            return Ok(ColumnState::Missing);
        }
        let path = self.column_path(unit, logical);
        let f = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ColumnState::Missing)
            }
            Err(e) => return Err(e).with_context(|| format!("open {:?}", path)),
        };
        let mut rdr = &f;
        let header = match read_header(&mut rdr) {
            Ok(h) => h,
            Err(_) => return Ok(ColumnState::Unreadable),
        };
        if header.unit as usize != unit {
            return Ok(ColumnState::Unreadable);
        }
        let Ok(layout) =
            Layout::new(header.prime as usize, header.cell_size as usize, header.file_len)
        else {
            return Ok(ColumnState::Unreadable);
        };
        if layout.stripes() != header.stripes {
            return Ok(ColumnState::Unreadable);
        }
        let data_offset = header.data_offset()?;
        let expected = data_offset + layout.column_bytes();
        let map = unsafe { Mmap::map(&f).with_context(|| format!("map {:?}", path))? };
        if map.len() as u64 != expected {
            return Ok(ColumnState::Unreadable);
        }
        Ok(ColumnState::Loaded(LoadedColumn {
            header,
            map,
            data_offset: data_offset as usize,
            column_stripe_bytes: layout.column_stripe_bytes(),
        }))
    }

    /// Create the temp file a column write stages into. Parent directories
    /// (the unit directory included) appear here, lazily.
    pub fn stage_column(&self, unit: usize, logical: &Path) -> Result<(File, PathBuf)> {
        let target = self.column_path(unit, logical);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create dir {:?}", parent))?;
        }
        let tmp = tmp_path(&target);
        let f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("create {:?}", tmp))?;
        Ok((f, tmp))
    }

    /// Rename a staged column into place.
    pub fn commit_column(&self, tmp: &Path, unit: usize, logical: &Path) -> Result<()> {
        let target = self.column_path(unit, logical);
        fs::rename(tmp, &target).with_context(|| format!("rename {:?} -> {:?}", tmp, target))
    }

    /// Union of logical paths across every existing unit directory, sorted.
    /// Staged temp files are not part of the namespace.
    pub fn enumerate_logical(&self) -> Result<Vec<PathBuf>> {
        let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
        for u in self.existing_units()? {
            let dir = self.unit_dir(u);
            for ent in walkdir::WalkDir::new(&dir).min_depth(1) {
                let ent = ent?;
                if !ent.file_type().is_file() {
                    continue;
                }
                let name = ent.file_name().to_string_lossy();
                if name.ends_with(TMP_SUFFIX) {
                    continue;
                }
                let rel = ent
                    .path()
                    .strip_prefix(&dir)
                    .with_context(|| format!("walked path not under {:?}", dir))?;
                seen.insert(rel.to_path_buf());
            }
        }
        Ok(seen.into_iter().collect())
    }
}

fn tmp_path(target: &Path) -> PathBuf {
    let name = target.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    target.with_file_name(format!("{name}{TMP_SUFFIX}"))
}
