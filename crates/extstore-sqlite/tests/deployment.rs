//! End-to-end deployment passes against real SQLite files.
//!
//! Each test builds an external source directory (payload, version
//! declaration, update scripts) in a temp dir and drives a `Deployer`
//! backed by `SqliteEngine` through it, asserting on the resulting store
//! file and version stamp.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use extstore_core::{
    DeployError, Deployer, DeploymentOutcome, DirAssetStore, OpenMode, ReconciliationHooks,
    StoreError, StoreHandle, VERSION_INFO_FILE,
};
use extstore_sqlite::SqliteEngine;
use rusqlite::Connection;
use tempfile::TempDir;

struct Fixture {
    root: TempDir,
    source_dir: PathBuf,
    destination: PathBuf,
}

fn fixture(name: &str) -> Fixture {
    let root = TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"));
    let source_dir = root.path().join("external");
    fs::create_dir_all(&source_dir)
        .unwrap_or_else(|err| panic!("failed to create source dir: {err}"));
    let destination = root.path().join("databases").join(name);
    Fixture {
        root,
        source_dir,
        destination,
    }
}

/// Create a real SQLite store at `path` with the given version stamp and a
/// `people` table seeded with one row per name.
fn seed_store(path: &Path, version: i64, names: &[&str]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .unwrap_or_else(|err| panic!("failed to create store dir: {err}"));
    }
    let conn = Connection::open(path).unwrap_or_else(|err| panic!("failed to create store: {err}"));
    conn.execute_batch("CREATE TABLE people (name TEXT NOT NULL);")
        .unwrap_or_else(|err| panic!("failed to create table: {err}"));
    for name in names {
        conn.execute("INSERT INTO people (name) VALUES (?1)", [name])
            .unwrap_or_else(|err| panic!("failed to seed row: {err}"));
    }
    conn.pragma_update(None, "user_version", version)
        .unwrap_or_else(|err| panic!("failed to stamp version: {err}"));
}

fn stamped_version(path: &Path) -> i64 {
    let conn = Connection::open(path).unwrap_or_else(|err| panic!("failed to open store: {err}"));
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or_else(|err| panic!("failed to read version: {err}"))
}

fn people_count(path: &Path) -> i64 {
    let conn = Connection::open(path).unwrap_or_else(|err| panic!("failed to open store: {err}"));
    conn.query_row("SELECT count(*) FROM people", [], |row| row.get(0))
        .unwrap_or_else(|err| panic!("failed to count rows: {err}"))
}

fn write_source_file(fx: &Fixture, name: &str, content: &str) {
    fs::write(fx.source_dir.join(name), content)
        .unwrap_or_else(|err| panic!("failed to write {name}: {err}"));
}

fn deployer(fx: &Fixture, name: &str) -> Deployer {
    Deployer::builder(name, &fx.source_dir, &fx.destination, SqliteEngine::new()).build()
}

fn deploy(deployer: &mut Deployer) -> DeploymentOutcome {
    deployer
        .ensure_deployed()
        .unwrap_or_else(|err| panic!("deployment should succeed: {err}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HookCall {
    kind: &'static str,
    from: i64,
    to: i64,
    live_version: i64,
    external_version: i64,
}

/// Records every invocation together with the versions both handles
/// actually report at hook time.
#[derive(Clone, Default)]
struct RecordingHooks {
    calls: Arc<Mutex<Vec<HookCall>>>,
}

impl RecordingHooks {
    fn calls(&self) -> Vec<HookCall> {
        self.calls
            .lock()
            .unwrap_or_else(|err| panic!("hook call log poisoned: {err}"))
            .clone()
    }

    fn record(
        &self,
        kind: &'static str,
        live: &mut dyn StoreHandle,
        external: &mut dyn StoreHandle,
        from: i64,
        to: i64,
    ) -> Result<(), StoreError> {
        let call = HookCall {
            kind,
            from,
            to,
            live_version: live.version()?,
            external_version: external.version()?,
        };
        self.calls
            .lock()
            .unwrap_or_else(|err| panic!("hook call log poisoned: {err}"))
            .push(call);
        Ok(())
    }
}

impl ReconciliationHooks for RecordingHooks {
    fn on_upgrade_externally(
        &mut self,
        live: &mut dyn StoreHandle,
        external: &mut dyn StoreHandle,
        _external_path: &Path,
        from_version: i64,
        to_version: i64,
    ) -> Result<(), StoreError> {
        self.record("upgrade", live, external, from_version, to_version)
    }

    fn on_downgrade_externally(
        &mut self,
        live: &mut dyn StoreHandle,
        external: &mut dyn StoreHandle,
        _external_path: &Path,
        from_version: i64,
        to_version: i64,
    ) -> Result<(), StoreError> {
        self.record("downgrade", live, external, from_version, to_version)
    }
}

#[test]
fn fresh_install_copies_payload_byte_identical() {
    let fx = fixture("fresh.db");
    seed_store(&fx.source_dir.join("fresh.db"), 3, &["ada", "grace"]);

    let mut deployer = deployer(&fx, "fresh.db");
    assert_eq!(deploy(&mut deployer), DeploymentOutcome::FreshInstalled);

    let payload =
        fs::read(fx.source_dir.join("fresh.db")).unwrap_or_else(|err| panic!("read: {err}"));
    let installed = fs::read(&fx.destination).unwrap_or_else(|err| panic!("read: {err}"));
    assert_eq!(installed, payload, "destination must be byte-identical");
    assert_eq!(stamped_version(&fx.destination), 3);

    // Second pass with an unchanged source is a no-op.
    assert_eq!(deploy(&mut deployer), DeploymentOutcome::NotNeeded);
}

#[test]
fn fresh_install_falls_back_to_bundled_asset() {
    let fx = fixture("asset.db");
    let assets_dir = fx.root.path().join("bundled");
    seed_store(&assets_dir.join("asset.db"), 1, &["seed"]);

    let mut deployer = Deployer::builder(
        "asset.db",
        &fx.source_dir,
        &fx.destination,
        SqliteEngine::new(),
    )
    .assets(DirAssetStore::new(&assets_dir))
    .build();

    assert_eq!(deploy(&mut deployer), DeploymentOutcome::FreshInstalled);
    assert_eq!(stamped_version(&fx.destination), 1);
    assert_eq!(people_count(&fx.destination), 1);
}

#[test]
fn live_handle_is_available_after_deployment() {
    let fx = fixture("live.db");
    seed_store(&fx.source_dir.join("live.db"), 2, &["ada"]);

    let mut deployer = deployer(&fx, "live.db");
    let mut handle = deployer
        .open_live(OpenMode::ReadWrite)
        .unwrap_or_else(|err| panic!("open_live failed: {err}"));
    let version = handle
        .version()
        .unwrap_or_else(|err| panic!("version failed: {err}"));
    assert_eq!(version, 2);
    handle
        .close()
        .unwrap_or_else(|err| panic!("close failed: {err}"));
}

#[test]
fn matching_declared_version_is_a_noop() {
    let fx = fixture("steady.db");
    seed_store(&fx.destination, 3, &["ada"]);
    write_source_file(&fx, VERSION_INFO_FILE, "3");

    let hooks = RecordingHooks::default();
    let mut deployer = Deployer::builder(
        "steady.db",
        &fx.source_dir,
        &fx.destination,
        SqliteEngine::new(),
    )
    .hooks(hooks.clone())
    .build();

    assert_eq!(deploy(&mut deployer), DeploymentOutcome::NotNeeded);
    assert_eq!(stamped_version(&fx.destination), 3);
    assert!(hooks.calls().is_empty());
}

#[test]
fn upgrade_with_script_only_executes_once_and_stamps() {
    let fx = fixture("scripted.db");
    seed_store(&fx.destination, 2, &["ada"]);
    write_source_file(&fx, VERSION_INFO_FILE, "3");
    write_source_file(
        &fx,
        "scripted.db_update_3.sql",
        "ALTER TABLE people ADD COLUMN email TEXT;",
    );

    let hooks = RecordingHooks::default();
    let mut deployer = Deployer::builder(
        "scripted.db",
        &fx.source_dir,
        &fx.destination,
        SqliteEngine::new(),
    )
    .hooks(hooks.clone())
    .build();

    assert_eq!(
        deploy(&mut deployer),
        DeploymentOutcome::Migrated { from: 2, to: 3 }
    );
    assert_eq!(stamped_version(&fx.destination), 3);
    assert!(hooks.calls().is_empty(), "no payload, so no hook");

    // The script's effect is visible.
    let conn =
        Connection::open(&fx.destination).unwrap_or_else(|err| panic!("open failed: {err}"));
    let columns: i64 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('people') WHERE name = 'email'",
            [],
            |row| row.get(0),
        )
        .unwrap_or_else(|err| panic!("query failed: {err}"));
    assert_eq!(columns, 1);
}

#[test]
fn upgrade_with_payload_invokes_upgrade_hook_before_stamp() {
    let fx = fixture("merged.db");
    seed_store(&fx.destination, 2, &["ada"]);
    seed_store(&fx.source_dir.join("merged.db"), 3, &["ada", "grace"]);
    write_source_file(&fx, VERSION_INFO_FILE, "3");

    let hooks = RecordingHooks::default();
    let mut deployer = Deployer::builder(
        "merged.db",
        &fx.source_dir,
        &fx.destination,
        SqliteEngine::new(),
    )
    .hooks(hooks.clone())
    .build();

    assert_eq!(
        deploy(&mut deployer),
        DeploymentOutcome::Migrated { from: 2, to: 3 }
    );
    assert_eq!(stamped_version(&fx.destination), 3);
    assert_eq!(
        hooks.calls(),
        vec![HookCall {
            kind: "upgrade",
            from: 2,
            to: 3,
            // The live store is stamped only after the hook returns.
            live_version: 2,
            external_version: 3,
        }]
    );
    // The payload was opened in place, never copied over the live store.
    assert_eq!(people_count(&fx.destination), 1);
}

#[test]
fn downgrade_selects_the_downgrade_hook() {
    let fx = fixture("rollback.db");
    seed_store(&fx.destination, 5, &["ada", "grace", "edsger"]);
    seed_store(&fx.source_dir.join("rollback.db"), 2, &["ada"]);
    write_source_file(&fx, VERSION_INFO_FILE, "2");

    let hooks = RecordingHooks::default();
    let mut deployer = Deployer::builder(
        "rollback.db",
        &fx.source_dir,
        &fx.destination,
        SqliteEngine::new(),
    )
    .hooks(hooks.clone())
    .build();

    assert_eq!(
        deploy(&mut deployer),
        DeploymentOutcome::Migrated { from: 5, to: 2 }
    );
    let calls = hooks.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, "downgrade");
    assert_eq!(calls[0].from, 5);
    assert_eq!(calls[0].to, 2);
    assert_eq!(stamped_version(&fx.destination), 2);
}

#[test]
fn version_bump_without_script_or_payload_fails() {
    let fx = fixture("stranded.db");
    seed_store(&fx.destination, 2, &["ada"]);
    write_source_file(&fx, VERSION_INFO_FILE, "5");

    let mut deployer = deployer(&fx, "stranded.db");
    match deployer.ensure_deployed() {
        Err(DeployError::NoMigrationPathAvailable { from: 2, to: 5 }) => {}
        other => panic!("expected NoMigrationPathAvailable, got {other:?}"),
    }
    assert_eq!(stamped_version(&fx.destination), 2);
}

#[test]
fn failing_script_leaves_no_partial_effects_and_is_retried() {
    let fx = fixture("atomic.db");
    seed_store(&fx.destination, 2, &["ada"]);
    write_source_file(&fx, VERSION_INFO_FILE, "3");
    // First statement succeeds, second fails; the transaction must take
    // the first down with it.
    write_source_file(
        &fx,
        "atomic.db_update_3.sql",
        "INSERT INTO people (name) VALUES ('grace'); INSERT INTO nonexistent VALUES (1);",
    );

    let mut deployer = deployer(&fx, "atomic.db");
    for _ in 0..2 {
        match deployer.ensure_deployed() {
            Err(DeployError::MigrationScriptFailed { version: 3, .. }) => {}
            other => panic!("expected MigrationScriptFailed, got {other:?}"),
        }
        assert_eq!(stamped_version(&fx.destination), 2);
        assert_eq!(people_count(&fx.destination), 1, "insert must be rolled back");
    }
}

#[test]
fn corrupt_payload_fails_without_touching_the_store() {
    let fx = fixture("corrupt.db");
    seed_store(&fx.destination, 2, &["ada"]);
    write_source_file(&fx, VERSION_INFO_FILE, "3");
    write_source_file(&fx, "corrupt.db", "this is not an sqlite file");

    let mut deployer = deployer(&fx, "corrupt.db");
    match deployer.ensure_deployed() {
        Err(DeployError::CorruptExternalSource { .. }) => {}
        other => panic!("expected CorruptExternalSource, got {other:?}"),
    }
    assert_eq!(stamped_version(&fx.destination), 2);
    assert_eq!(people_count(&fx.destination), 1);
}

#[test]
fn malformed_declaration_fails_the_pass() {
    let fx = fixture("badversion.db");
    seed_store(&fx.destination, 2, &["ada"]);
    write_source_file(&fx, VERSION_INFO_FILE, "two");

    let mut deployer = deployer(&fx, "badversion.db");
    match deployer.ensure_deployed() {
        Err(DeployError::MalformedVersionDeclaration { .. }) => {}
        other => panic!("expected MalformedVersionDeclaration, got {other:?}"),
    }
    assert_eq!(stamped_version(&fx.destination), 2);
}

#[test]
fn script_and_payload_together_run_script_then_hook() {
    let fx = fixture("combined.db");
    seed_store(&fx.destination, 2, &["ada"]);
    seed_store(&fx.source_dir.join("combined.db"), 3, &["ada", "grace"]);
    write_source_file(&fx, VERSION_INFO_FILE, "3");
    write_source_file(
        &fx,
        "combined.db_update_3.sql",
        "INSERT INTO people (name) VALUES ('edsger');",
    );

    let hooks = RecordingHooks::default();
    let mut deployer = Deployer::builder(
        "combined.db",
        &fx.source_dir,
        &fx.destination,
        SqliteEngine::new(),
    )
    .hooks(hooks.clone())
    .build();

    assert_eq!(
        deploy(&mut deployer),
        DeploymentOutcome::Migrated { from: 2, to: 3 }
    );
    // The hook saw the live store after the script had committed.
    assert_eq!(people_count(&fx.destination), 2);
    assert_eq!(hooks.calls().len(), 1);
    assert_eq!(hooks.calls()[0].live_version, 2);
    assert_eq!(stamped_version(&fx.destination), 3);
}
