//! Integration tests for bundle extraction and file placement.

mod common;

use std::fs;
use std::io::Cursor;
use std::path::PathBuf;

use tempfile::TempDir;

use common::{build_zip, tree};
use dbtr_core::Error;
use dbtr_core::artifact::{PlacementOptions, extract, place, unpack_and_persist};

fn three_file_bundle() -> Vec<u8> {
    build_zip(&[
        ("a.sql", "select 1 as a"),
        ("b.sql", "select 2 as b"),
        ("sub/c.sql", "select 3 as c"),
    ])
}

#[test]
fn test_extract_then_place_three_files() {
    let scratch = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();

    let unpacked = extract(Cursor::new(three_file_bundle()), "project.zip", scratch.path()).unwrap();
    let options = PlacementOptions {
        max_workers: 2,
        ..Default::default()
    };
    let report = place(&unpacked, dest.path(), &options).unwrap();

    assert!(report.is_complete());
    assert_eq!(tree(dest.path()), vec!["a.sql", "b.sql", "sub/c.sql"]);
    assert_eq!(
        fs::read_to_string(dest.path().join("sub/c.sql")).unwrap(),
        "select 3 as c"
    );
}

#[test]
fn test_unpack_and_persist_leaves_only_project_files() {
    let root = TempDir::new().unwrap();
    let dest = root.path().join("projects").join("run-1");

    let report = unpack_and_persist(
        Cursor::new(three_file_bundle()),
        "project.zip",
        &dest,
        &PlacementOptions::default(),
    )
    .unwrap();

    assert_eq!(report.destination, dest);
    assert_eq!(report.placed.len(), 3);
    assert_eq!(tree(&dest), vec!["a.sql", "b.sql", "sub/c.sql"]);
}

#[test]
fn test_unpack_and_persist_rejects_corrupt_bundle() {
    let root = TempDir::new().unwrap();
    let dest = root.path().join("run-2");

    let result = unpack_and_persist(
        Cursor::new(b"<html>not a bundle</html>".to_vec()),
        "project.zip",
        &dest,
        &PlacementOptions::default(),
    );

    assert!(matches!(result, Err(Error::CorruptArchive { .. })));
    assert!(!dest.exists());
}

#[test]
fn test_copy_placement_is_repeatable() {
    let source = TempDir::new().unwrap();
    extract(Cursor::new(three_file_bundle()), "project.zip", source.path()).unwrap();

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let dest = TempDir::new().unwrap();
        place(source.path(), dest.path(), &PlacementOptions::default()).unwrap();

        let contents: Vec<(String, String)> = tree(dest.path())
            .into_iter()
            .map(|path| {
                let body = fs::read_to_string(dest.path().join(&path)).unwrap();
                (path, body)
            })
            .collect();
        snapshots.push(contents);
    }

    assert_eq!(snapshots[0], snapshots[1]);
    assert_eq!(snapshots[0].len(), 3);
    // Copy keeps the source intact.
    assert_eq!(tree(source.path()), vec!["a.sql", "b.sql", "sub/c.sql"]);
}

#[test]
fn test_unwritable_files_are_collected() {
    let source = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    let names: Vec<String> = (0..10).map(|i| format!("models/m{}.sql", i)).collect();
    let entries: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "select 1")).collect();
    extract(Cursor::new(build_zip(&entries)), "many.zip", source.path()).unwrap();

    // Three targets are blocked by directories of the same name.
    for blocked in ["models/m1.sql", "models/m4.sql", "models/m7.sql"] {
        fs::create_dir_all(dest.path().join(blocked)).unwrap();
    }

    let options = PlacementOptions {
        max_workers: 4,
        fail_fast: false,
        ..Default::default()
    };
    let report = place(source.path(), dest.path(), &options).unwrap();

    assert_eq!(report.placed.len(), 7);
    assert_eq!(report.failures.len(), 3);
    let failed: Vec<PathBuf> = report.failures.iter().map(|f| f.path.clone()).collect();
    assert_eq!(
        failed,
        vec![
            PathBuf::from("models/m1.sql"),
            PathBuf::from("models/m4.sql"),
            PathBuf::from("models/m7.sql"),
        ]
    );
    assert!(report.failures.iter().all(|f| !f.message.is_empty()));
}

#[test]
fn test_fail_fast_raises_after_all_workers_finish() {
    let source = TempDir::new().unwrap();
    let dest = TempDir::new().unwrap();
    extract(Cursor::new(three_file_bundle()), "project.zip", source.path()).unwrap();
    fs::create_dir_all(dest.path().join("a.sql")).unwrap();

    let options = PlacementOptions {
        max_workers: 1,
        fail_fast: true,
        ..Default::default()
    };
    let err = place(source.path(), dest.path(), &options).unwrap_err();

    assert!(matches!(err, Error::Placement(ref f) if f.path == PathBuf::from("a.sql")));
    // The other files were still placed before the error surfaced.
    assert!(dest.path().join("b.sql").is_file());
    assert!(dest.path().join("sub/c.sql").is_file());
}
