mod common;

use common::{connection, file, keys};
use sandbox_store::prelude::*;
use tempfile::tempdir;

fn options_for(mode: FlushMode) -> Result<DatabaseOptions, StoreError> {
    DatabaseOptions::builder().flush_mode(mode).finish()
}

#[test]
fn drop_flushes_what_is_still_queued() -> Result<(), StoreError> {
    let dir = tempdir().unwrap();
    let conn = connection(&dir.path().join("overlay.db"));

    {
        let registry = RegistryDatabase::open(&conn, &options_for(FlushMode::Background)?)?;
        registry.initialize(false)?;
        for idx in 0..25u32 {
            registry.enqueue_action(Action::insert(RegistryEntry::dword(
                r"HKEY_LOCAL_MACHINE\Software\Vendor",
                format!("v{idx}"),
                idx,
            )));
        }
    }

    let registry = RegistryDatabase::open(&conn, &DatabaseOptions::default())?;
    assert_eq!(
        registry
            .values_under(r"HKEY_LOCAL_MACHINE\Software\Vendor")?
            .len(),
        25
    );
    Ok(())
}

#[test]
fn close_reports_success_and_persists() -> Result<(), StoreError> {
    let dir = tempdir().unwrap();
    let conn = connection(&dir.path().join("overlay.db"));

    let files = FileSystemDatabase::open(&conn, &options_for(FlushMode::Background)?)?;
    files.initialize(false)?;
    files.enqueue_action(Action::insert(file(r"C:\Tools\app.exe", FileKind::Executable)));
    files.close()?;

    let files = FileSystemDatabase::open(&conn, &DatabaseOptions::default())?;
    assert_eq!(files.executable_paths()?, vec![r"C:\Tools\app.exe"]);
    Ok(())
}

#[test]
fn close_reports_a_failed_final_flush() -> Result<(), StoreError> {
    // No table: every commit fails, so close must surface the error.
    let files = FileSystemDatabase::open("data source=:memory:", &DatabaseOptions::default())?;
    files.enqueue_action(Action::insert(file("lost", FileKind::File)));
    assert_eq!(files.database().pending(), 1);
    assert!(files.close().is_err());
    Ok(())
}

#[test]
fn failed_flush_is_retried_by_the_next_trigger() -> Result<(), StoreError> {
    let files = FileSystemDatabase::open("data source=:memory:", &DatabaseOptions::default())?;
    files.enqueue_action(Action::insert(file("early", FileKind::File)));
    assert_eq!(files.database().pending(), 1);

    files.initialize(false)?;
    files.enqueue_action(Action::insert(file("late", FileKind::File)));
    assert_eq!(files.database().pending(), 0);
    assert_eq!(keys(&files.read_all()?), vec!["early", "late"]);
    Ok(())
}
