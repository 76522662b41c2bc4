use evenodd_core::encode::Encoder;
use evenodd_core::gendata;
use evenodd_core::repair::repair;
use evenodd_core::store::UnitStore;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Stable digest of a directory tree: file names and contents, recursively.
fn hash_tree(dir: &Path) -> blake3::Hash {
    let mut h = blake3::Hasher::new();
    let mut entries: Vec<PathBuf> =
        fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    entries.sort();
    for p in entries {
        h.update(p.file_name().unwrap().to_string_lossy().as_bytes());
        if p.is_dir() {
            h.update(hash_tree(&p).as_bytes());
        } else {
            h.update(blake3::hash(&fs::read(&p).unwrap()).as_bytes());
        }
    }
    h.finalize()
}

fn snapshot_units(root: &Path) -> BTreeMap<String, blake3::Hash> {
    let mut map = BTreeMap::new();
    for ent in fs::read_dir(root).unwrap() {
        let p = ent.unwrap().path();
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        if p.is_dir() && name.starts_with("disk") {
            map.insert(name, hash_tree(&p));
        }
    }
    map
}

fn seed_store(root: &Path, files: &[(&str, usize)]) -> UnitStore {
    let store = UnitStore::new(root);
    for (i, &(name, p)) in files.iter().enumerate() {
        gendata::generate(&root.join(name), 4_000 + 137 * i as u64, 900 + i as u64).unwrap();
        Encoder::encode(&store, Path::new(name), p, 32).unwrap();
    }
    store
}

#[test]
fn repair_restores_two_wiped_units_byte_identical() {
    let td = tempfile::tempdir().unwrap();
    let files: Vec<(String, usize)> = [3usize, 5, 7, 11, 5, 3, 13, 7]
        .iter()
        .enumerate()
        .map(|(i, &p)| (format!("testfile/test{i}"), p))
        .collect();
    let files_ref: Vec<(&str, usize)> = files.iter().map(|(n, p)| (n.as_str(), *p)).collect();
    let store = seed_store(td.path(), &files_ref);

    let before0 = hash_tree(&td.path().join("disk0"));
    let before1 = hash_tree(&td.path().join("disk1"));
    fs::remove_dir_all(td.path().join("disk0")).unwrap();
    fs::remove_dir_all(td.path().join("disk1")).unwrap();

    let report = repair(&store, &[0, 1]).unwrap();
    assert_eq!(report.files_repaired, files.len() as u64);
    assert_eq!(report.columns_rebuilt, 2 * files.len() as u64);
    assert_eq!(hash_tree(&td.path().join("disk0")), before0);
    assert_eq!(hash_tree(&td.path().join("disk1")), before1);
}

#[test]
fn repair_restores_parity_units() {
    let p = 5;
    for lost in [vec![p], vec![p + 1], vec![p, p + 1], vec![2, p + 1]] {
        let td = tempfile::tempdir().unwrap();
        let store = seed_store(td.path(), &[("t", p)]);
        let before: Vec<blake3::Hash> =
            lost.iter().map(|&u| hash_tree(&td.path().join(format!("disk{u}")))).collect();
        for &u in &lost {
            fs::remove_dir_all(td.path().join(format!("disk{u}"))).unwrap();
        }
        repair(&store, &lost).unwrap();
        for (i, &u) in lost.iter().enumerate() {
            assert_eq!(
                hash_tree(&td.path().join(format!("disk{u}"))),
                before[i],
                "unit {u} not restored (lost={lost:?})"
            );
        }
    }
}

#[test]
fn repair_restores_a_single_deleted_file() {
    let td = tempfile::tempdir().unwrap();
    let store = seed_store(td.path(), &[("a", 5), ("b", 5)]);
    let before = fs::read(td.path().join("disk3/a")).unwrap();
    fs::remove_file(td.path().join("disk3/a")).unwrap();

    let report = repair(&store, &[3]).unwrap();
    assert_eq!(report.files_repaired, 1); // "b" survived on disk3 untouched
    assert_eq!(fs::read(td.path().join("disk3/a")).unwrap(), before);
}

#[test]
fn repair_twice_is_a_no_op() {
    let td = tempfile::tempdir().unwrap();
    let store = seed_store(td.path(), &[("t1", 3), ("t2", 7)]);
    fs::remove_dir_all(td.path().join("disk1")).unwrap();
    fs::remove_dir_all(td.path().join("disk2")).unwrap();

    repair(&store, &[1, 2]).unwrap();
    let after_first = snapshot_units(td.path());
    let report = repair(&store, &[1, 2]).unwrap();
    assert_eq!(report.columns_rebuilt, 0);
    assert_eq!(snapshot_units(td.path()), after_first);
}

#[test]
fn repair_skips_units_no_file_uses() {
    let td = tempfile::tempdir().unwrap();
    let store = seed_store(td.path(), &[("t", 3)]); // units 0..=4
    let report = repair(&store, &[7]).unwrap();
    assert_eq!(report.columns_rebuilt, 0);
    assert!(!td.path().join("disk7").exists());
}

#[test]
fn repair_fails_when_a_file_lost_three_units() {
    let td = tempfile::tempdir().unwrap();
    let store = seed_store(td.path(), &[("t", 5)]);
    for u in [0, 1, 2] {
        fs::remove_dir_all(td.path().join(format!("disk{u}"))).unwrap();
    }
    let err = repair(&store, &[0, 1]).unwrap_err();
    assert!(err.to_string().contains("too many failures"), "unexpected error: {err}");
}

#[test]
fn repair_validates_its_arguments() {
    let td = tempfile::tempdir().unwrap();
    let store = UnitStore::new(td.path());
    assert!(repair(&store, &[]).is_err());
    assert!(repair(&store, &[0, 1, 2]).is_err());
    assert!(repair(&store, &[4, 4]).is_err());
}
