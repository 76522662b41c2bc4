use anyhow::{bail, Result};
use std::path::{Component, Path};

/// Logical names are mirrored verbatim under every unit directory, so they
/// must stay relative and must not traverse out of the unit root.
pub fn validate_logical(rel: &Path) -> Result<()> {
    if rel.as_os_str().is_empty() {
        bail!("empty logical path");
    }
    if rel.is_absolute() {
        bail!("absolute logical paths are not allowed: {:?}", rel);
    }
    for comp in rel.components() {
        match comp {
            Component::ParentDir => bail!("parent traversal not allowed: {:?}", rel),
            Component::Prefix(_) | Component::RootDir => {
                bail!("absolute logical paths are not allowed: {:?}", rel)
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}
