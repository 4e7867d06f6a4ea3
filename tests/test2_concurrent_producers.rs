mod common;

use std::thread;

use common::{connection, file};
use sandbox_store::prelude::*;
use tempfile::tempdir;

const PRODUCERS: usize = 8;
const ACTIONS: usize = 60;

/// Every producer rewrites its own key `ACTIONS` times; the last write must win.
fn hammer(files: &FileSystemDatabase) {
    thread::scope(|scope| {
        for producer in 0..PRODUCERS {
            scope.spawn(move || {
                for step in 0..ACTIONS {
                    let mut entry = file(&format!("p{producer}/latest"), FileKind::File);
                    entry.value = format!("step-{step:03}");
                    files.enqueue_action(Action::insert(entry));
                    files.enqueue_action(Action::insert(file(
                        &format!("p{producer}/n{step:03}"),
                        FileKind::File,
                    )));
                }
            });
        }
    });
}

fn assert_complete(entries: &[FileEntry]) {
    assert_eq!(entries.len(), PRODUCERS * (ACTIONS + 1));
    for producer in 0..PRODUCERS {
        let latest = entries
            .iter()
            .find(|e| e.key == format!("p{producer}/latest"))
            .expect("latest entry for every producer");
        assert_eq!(latest.value, format!("step-{:03}", ACTIONS - 1));
    }
}

fn run_mode(mode: FlushMode) -> Result<(), StoreError> {
    let dir = tempdir().unwrap();
    let conn = connection(&dir.path().join("overlay.db"));
    let options = DatabaseOptions::builder().flush_mode(mode).finish()?;

    let files = FileSystemDatabase::open(&conn, &options)?;
    files.initialize(false)?;
    hammer(&files);
    files.close()?;

    let files = FileSystemDatabase::open(&conn, &options)?;
    assert_complete(&files.read_all()?);
    Ok(())
}

#[test]
fn inline_producers_lose_and_duplicate_nothing() -> Result<(), StoreError> {
    run_mode(FlushMode::Inline)
}

#[test]
fn background_producers_lose_and_duplicate_nothing() -> Result<(), StoreError> {
    run_mode(FlushMode::Background)
}

#[test]
fn readers_never_see_a_partial_batch() -> Result<(), StoreError> {
    let files = FileSystemDatabase::open("data source=:memory:", &DatabaseOptions::default())?;
    files.initialize(false)?;

    thread::scope(|scope| {
        scope.spawn(|| {
            for batch in 0..40 {
                let actions = (0..10)
                    .map(|idx| Action::insert(file(&format!("b{batch:02}/{idx}"), FileKind::File)))
                    .collect();
                files.enqueue_actions(actions);
            }
        });
        scope.spawn(|| {
            for _ in 0..40 {
                let count = files.read_all().unwrap().len();
                assert_eq!(count % 10, 0, "observed {count} rows");
            }
        });
    });

    files.database().flush_pending()?;
    assert_eq!(files.read_all()?.len(), 400);
    Ok(())
}
