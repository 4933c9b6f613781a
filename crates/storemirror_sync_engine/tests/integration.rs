//! Integration tests for listing, change enumeration, staging and transfers.

use proptest::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use storemirror_protocol::{DirectoryChanges, RemoteItem, TaskId};
use storemirror_store::{DownloadState, MetadataStore, UploadState, ROOT_ITEM_ID};
use storemirror_sync_engine::{
    CompletionStatus, MockRemote, PageToken, RecordingHost, SyncConfig, SyncEngine, SyncError,
    TransferDirection, TransferJobs, TransferOutcome, TransferSuccess, INTERRUPTED,
};
use tempfile::TempDir;

type Engine = SyncEngine<MockRemote, RecordingHost>;

struct Fixture {
    dir: TempDir,
    engine: Arc<Engine>,
    jobs: TransferJobs,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture() -> Fixture {
    fixture_with(|config| config)
}

fn fixture_with(configure: impl FnOnce(SyncConfig) -> SyncConfig) -> Fixture {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MetadataStore::open(&dir.path().join("store")).unwrap());
    let remote = MockRemote::with_download_dir(dir.path().join("incoming"));
    let config = configure(SyncConfig::new(dir.path().join("state")));

    let (engine, jobs) = SyncEngine::new(
        config,
        storemirror_store::DomainRegistry::standard(),
        store,
        remote,
        RecordingHost::new(),
    )
    .unwrap();

    Fixture {
        dir,
        engine: Arc::new(engine),
        jobs,
    }
}

fn files_id(engine: &Engine) -> storemirror_store::DomainId {
    engine.registry().get("files").unwrap().id
}

fn write_source(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let outside = dir.join("outside");
    std::fs::create_dir_all(&outside).unwrap();
    let path = outside.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn remote_item(id: i64, name: &str, ctype: &str) -> RemoteItem {
    RemoteItem {
        id,
        name: name.to_string(),
        ctype: ctype.to_string(),
        size: 0,
        mdate: 1_700_000_000,
        cdate: 1_700_000_000,
    }
}

/// Enumerates `parent_id` until the remote reports nothing remaining.
fn drain(engine: &Engine, parent_id: &str) {
    loop {
        let token = engine.current_anchor(parent_id, "files").unwrap();
        let changes = engine
            .enumerate_changes(parent_id, "files", Some(&token))
            .unwrap();
        if !changes.more_remaining {
            break;
        }
    }
}

#[test]
fn change_batch_sets_anchor_and_inserts_items() {
    let fx = fixture();
    fx.engine.remote().push_changes(DirectoryChanges {
        new: vec![
            remote_item(10, "A", "application/pdf"),
            remote_item(11, "B", "folder"),
        ],
        erase: vec![],
        anchor: 5,
        remain: 0,
        size: 2,
    });

    let changes = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();

    assert_eq!(changes.next_anchor(), 5);
    assert!(!changes.more_remaining);
    assert_eq!(changes.updated.len(), 2);
    assert!(changes
        .updated
        .iter()
        .all(|item| item.upload_state == UploadState::Uploaded));

    let domain = files_id(&fx.engine);
    let store = fx.engine.store();
    assert_eq!(store.anchor_of(domain, ROOT_ITEM_ID).unwrap(), Some(5));
    assert_eq!(store.get(domain, ROOT_ITEM_ID).unwrap().unwrap().size, 2);

    let a = store.get(domain, "10").unwrap().unwrap();
    assert_eq!(a.name, "A");
    assert_eq!(a.download_state, DownloadState::NotStarted);
    let b = store.get(domain, "11").unwrap().unwrap();
    assert!(b.is_directory());
    assert_eq!(b.download_state, DownloadState::Downloaded);
}

#[test]
fn repeated_enumeration_is_empty() {
    let fx = fixture();
    let remote = fx.engine.remote();
    remote.add_file(ROOT_ITEM_ID, "one.txt", b"1").unwrap();
    remote.add_file(ROOT_ITEM_ID, "two.txt", b"2").unwrap();

    let first = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();
    assert_eq!(first.updated.len(), 2);

    let second = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", Some(&first.next_anchor_token))
        .unwrap();
    assert!(second.is_empty());
    assert!(!second.more_remaining);
    assert_eq!(second.next_anchor(), first.next_anchor());

    // a batch that does not advance past the caller's anchor changes nothing
    remote.push_changes(DirectoryChanges {
        new: vec![remote_item(1, "one.txt", "")],
        anchor: first.next_anchor(),
        ..DirectoryChanges::default()
    });
    let replay = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", Some(&first.next_anchor_token))
        .unwrap();
    assert!(replay.is_empty());
    assert_eq!(replay.next_anchor(), first.next_anchor());
    assert_eq!(fx.engine.stats().batches_applied, 1);
}

#[test]
fn lagging_observer_catches_up_without_rewinding_anchor() {
    let fx = fixture_with(|config| config.with_change_batch_size(1));
    let remote = fx.engine.remote();
    for name in ["a.txt", "b.txt", "c.txt"] {
        remote.add_file(ROOT_ITEM_ID, name, b"x").unwrap();
    }
    let domain = files_id(&fx.engine);
    let store = fx.engine.store();

    // the first observer drains the directory with its own tokens
    drain(&fx.engine, ROOT_ITEM_ID);
    let latest = remote.latest_anchor(ROOT_ITEM_ID);
    assert_eq!(store.anchor_of(domain, ROOT_ITEM_ID).unwrap(), Some(latest));

    // a second observer starting from scratch still sees every item
    let mut seen = Vec::new();
    let mut token: Option<Vec<u8>> = None;
    loop {
        let changes = fx
            .engine
            .enumerate_changes(ROOT_ITEM_ID, "files", token.as_deref())
            .unwrap();
        seen.extend(changes.updated.iter().map(|item| item.name.clone()));
        assert_eq!(store.anchor_of(domain, ROOT_ITEM_ID).unwrap(), Some(latest));
        if !changes.more_remaining {
            assert_eq!(changes.next_anchor(), latest);
            break;
        }
        assert!(changes.next_anchor() < latest);
        token = Some(changes.next_anchor_token);
    }
    assert_eq!(seen, ["a.txt", "b.txt", "c.txt"]);
    assert_eq!(store.children(domain, ROOT_ITEM_ID).unwrap().len(), 3);
    assert_eq!(store.get(domain, ROOT_ITEM_ID).unwrap().unwrap().size, 3);
}

#[test]
fn staged_directory_is_absorbed_by_remote_item() {
    let fx = fixture();
    let staged = fx
        .engine
        .stage_directory(ROOT_ITEM_ID, "files", "Reports")
        .unwrap();
    assert_eq!(staged.upload_state, UploadState::Uploading);
    assert!(staged.is_provisional());

    fx.engine.remote().push_changes(DirectoryChanges {
        new: vec![remote_item(42, "Reports", "folder")],
        anchor: 1,
        size: 1,
        ..DirectoryChanges::default()
    });
    let changes = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();

    assert_eq!(changes.erased, vec![staged.id.clone()]);
    assert_eq!(changes.updated.len(), 1);
    assert_eq!(changes.updated[0].id, "42");

    let domain = files_id(&fx.engine);
    let store = fx.engine.store();
    assert!(store.get(domain, &staged.id).unwrap().is_none());
    let reports: Vec<_> = store
        .children(domain, ROOT_ITEM_ID)
        .unwrap()
        .into_iter()
        .filter(|item| item.name == "Reports")
        .collect();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].id, "42");
    assert_eq!(reports[0].origin_id.as_deref(), Some(staged.id.as_str()));
    assert_eq!(reports[0].download_state, DownloadState::PendingLocalDelete);
    assert_eq!(fx.engine.stats().items_reconciled, 1);
}

#[tokio::test]
async fn confirmation_after_absorption_settles_row() {
    let mut fx = fixture();
    let staged = fx
        .engine
        .stage_directory(ROOT_ITEM_ID, "files", "Projects")
        .unwrap();

    // remote call finishes, but its completion is applied after enumeration
    let job = fx.jobs.try_recv().unwrap();
    let outcome = fx.engine.execute(job).await;
    assert!(outcome.result.is_ok());

    let changes = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();
    assert_eq!(changes.erased, vec![staged.id.clone()]);
    let absorbed_id = changes.updated[0].id.clone();

    let report = fx.engine.complete_transfer(outcome).unwrap();
    assert_eq!(report.status, CompletionStatus::Completed);

    let domain = files_id(&fx.engine);
    let row = fx.engine.store().get(domain, &absorbed_id).unwrap().unwrap();
    assert_eq!(row.upload_state, UploadState::Uploaded);
    assert_eq!(row.download_state, DownloadState::Downloaded);
    assert!(!row.is_provisional());
    assert_eq!(fx.engine.store().item_count(), 3);
    assert!(fx.engine.store().verify(fx.engine.registry()).unwrap().is_ok());
}

#[test]
fn page_of_exactly_batch_size_needs_one_more_call() {
    let fx = fixture_with(|config| config.with_page_batch_size(3));
    for name in ["file10", "file2", "File1"] {
        fx.engine
            .stage_directory(ROOT_ITEM_ID, "files", name)
            .unwrap();
    }

    let first = fx.engine.list_page(ROOT_ITEM_ID, "files", None).unwrap();
    let names: Vec<_> = first.items.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, ["File1", "file2", "file10"]);
    assert!(!first.is_complete());

    let second = fx
        .engine
        .list_page(ROOT_ITEM_ID, "files", first.next_token.as_deref())
        .unwrap();
    assert!(second.items.is_empty());
    assert!(second.is_complete());
}

#[test]
fn date_ordered_listing_pages_through_children() {
    let fx = fixture();
    let dated = |id, name: &str, cdate| RemoteItem {
        cdate,
        ..remote_item(id, name, "text/plain")
    };
    fx.engine.remote().push_changes(DirectoryChanges {
        new: vec![
            dated(1, "b", 300),
            dated(2, "file10", 100),
            dated(3, "a", 200),
            dated(4, "file2", 100),
        ],
        anchor: 1,
        size: 4,
        ..DirectoryChanges::default()
    });
    fx.engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();

    let token = PageToken::initial_by_date(2).encode().unwrap();
    let first = fx
        .engine
        .list_page(ROOT_ITEM_ID, "files", Some(&token))
        .unwrap();
    let names: Vec<_> = first.items.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, ["file2", "file10"]);

    let second = fx
        .engine
        .list_page(ROOT_ITEM_ID, "files", first.next_token.as_deref())
        .unwrap();
    let names: Vec<_> = second.items.iter().map(|item| item.name.as_str()).collect();
    assert_eq!(names, ["a", "b"]);

    let by_name = fx.engine.list_page(ROOT_ITEM_ID, "files", None).unwrap();
    assert_eq!(by_name.items[0].name, "a");
}

#[test]
fn malformed_page_token_starts_over() {
    let fx = fixture_with(|config| config.with_page_batch_size(2));
    for name in ["a", "b", "c"] {
        fx.engine
            .stage_directory(ROOT_ITEM_ID, "files", name)
            .unwrap();
    }

    let page = fx
        .engine
        .list_page(ROOT_ITEM_ID, "files", Some(&b"not a token"[..]))
        .unwrap();
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].name, "a");

    let rest = fx
        .engine
        .list_page(ROOT_ITEM_ID, "files", page.next_token.as_deref())
        .unwrap();
    assert_eq!(rest.items.len(), 1);
    assert!(rest.is_complete());
}

#[tokio::test]
async fn import_uploads_and_reconciles() {
    let mut fx = fixture();
    let source = write_source(fx.dir.path(), "notes.txt", b"hello mirror");

    let staged = fx
        .engine
        .stage_import(ROOT_ITEM_ID, "files", &source)
        .unwrap();
    assert_eq!(staged.size, 12);
    assert_eq!(staged.upload_state, UploadState::Uploading);
    assert!(!source.exists());
    let artifact = fx.engine.config().artifact_root.join(&staged.id);
    assert!(artifact.join("notes.txt").is_file());

    let report = fx
        .engine
        .process_next_transfer(&mut fx.jobs)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, CompletionStatus::Completed);
    assert!(!artifact.exists());

    let domain = files_id(&fx.engine);
    let row = fx.engine.store().get(domain, &staged.id).unwrap().unwrap();
    assert_eq!(row.upload_state, UploadState::Uploaded);
    assert_eq!(row.download_state, DownloadState::PendingLocalDelete);
    assert_eq!(
        fx.engine.host().signals(),
        vec![("files".to_string(), ROOT_ITEM_ID.to_string())]
    );

    let remote = fx.engine.remote().child_named(ROOT_ITEM_ID, "notes.txt").unwrap();
    assert_eq!(
        fx.engine.remote().content(&remote.identifier()).unwrap(),
        b"hello mirror"
    );

    let changes = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();
    assert_eq!(changes.erased, vec![staged.id.clone()]);
    let row = fx
        .engine
        .store()
        .get(domain, &remote.identifier())
        .unwrap()
        .unwrap();
    assert_eq!(row.download_state, DownloadState::NotStarted);
    assert_eq!(row.origin_id.as_deref(), Some(staged.id.as_str()));
    assert_eq!(fx.engine.stats().uploads_completed, 1);
}

#[tokio::test]
async fn failed_upload_is_recorded_and_retried() {
    let mut fx = fixture();
    fx.engine.remote().fail_next_transfers(1);
    let staged = fx
        .engine
        .stage_directory(ROOT_ITEM_ID, "files", "Drafts")
        .unwrap();

    let report = fx
        .engine
        .process_next_transfer(&mut fx.jobs)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(report.status, CompletionStatus::Failed(_)));

    let domain = files_id(&fx.engine);
    let row = fx.engine.store().get(domain, &staged.id).unwrap().unwrap();
    assert_eq!(row.upload_state, UploadState::NotStarted);
    assert!(row.upload_error.is_some());
    assert_eq!(fx.engine.stats().uploads_failed, 1);

    let retried = fx.engine.retry_upload(&staged.id, "files").unwrap();
    assert_eq!(retried.upload_state, UploadState::Uploading);
    assert!(retried.upload_error.is_none());
    assert!(matches!(
        fx.engine.retry_upload(&staged.id, "files"),
        Err(SyncError::State(_))
    ));

    let report = fx
        .engine
        .process_next_transfer(&mut fx.jobs)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, CompletionStatus::Completed);
    assert!(fx
        .engine
        .remote()
        .child_named(ROOT_ITEM_ID, "Drafts")
        .is_some());
}

#[test]
fn failure_after_absorption_settles_row() {
    let fx = fixture();
    let source = write_source(fx.dir.path(), "a.txt", b"abc");
    let staged = fx
        .engine
        .stage_import(ROOT_ITEM_ID, "files", &source)
        .unwrap();
    let artifact = fx.engine.config().artifact_root.join(&staged.id);
    assert!(artifact.is_dir());

    // the remote committed the upload but the client saw an error
    let remote = fx
        .engine
        .remote()
        .add_file(ROOT_ITEM_ID, "a.txt", b"abc")
        .unwrap();
    fx.engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();
    let domain = files_id(&fx.engine);
    let id = remote.identifier();
    let row = fx.engine.store().get(domain, &id).unwrap().unwrap();
    assert_eq!(row.download_state, DownloadState::PendingLocalDelete);

    let outcome = TransferOutcome {
        task: TaskId::new("files", staged.id.as_str()).unwrap(),
        direction: TransferDirection::Upload,
        result: Err(SyncError::transport_retryable("connection reset")),
    };
    let report = fx.engine.complete_transfer(outcome).unwrap();
    assert_eq!(report.status, CompletionStatus::Ignored);

    let row = fx.engine.store().get(domain, &id).unwrap().unwrap();
    assert_eq!(row.download_state, DownloadState::NotStarted);
    assert_eq!(row.upload_state, UploadState::Uploaded);
    assert!(row.upload_error.is_none());
    assert!(!artifact.exists());

    let requested = fx.engine.request_download(&id, "files").unwrap();
    assert_eq!(requested.download_state, DownloadState::Downloading);
}

#[tokio::test]
async fn completion_after_discard_is_a_noop() {
    let mut fx = fixture();
    let source = write_source(fx.dir.path(), "draft.md", b"# draft");
    let staged = fx
        .engine
        .stage_import(ROOT_ITEM_ID, "files", &source)
        .unwrap();

    let removed = fx.engine.discard_staged(&staged.id, "files").unwrap();
    assert_eq!(removed, vec![staged.id.clone()]);
    assert!(!fx.engine.config().artifact_root.join(&staged.id).exists());

    let domain = files_id(&fx.engine);
    let root = fx.engine.store().get(domain, ROOT_ITEM_ID).unwrap().unwrap();
    assert_eq!(root.size, 0);

    // the queued upload can no longer read its content
    let report = fx
        .engine
        .process_next_transfer(&mut fx.jobs)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, CompletionStatus::Ignored);

    // a successful confirmation for a vanished row is ignored as well
    let outcome = TransferOutcome {
        task: TaskId::new("files", staged.id.as_str()).unwrap(),
        direction: TransferDirection::Upload,
        result: Ok(TransferSuccess::Created(remote_item(7, "draft.md", ""))),
    };
    let report = fx.engine.complete_transfer(outcome).unwrap();
    assert_eq!(report.status, CompletionStatus::Ignored);
    assert!(fx.engine.host().signals().is_empty());
}

#[tokio::test]
async fn download_places_content() {
    let mut fx = fixture();
    let remote = fx
        .engine
        .remote()
        .add_file(ROOT_ITEM_ID, "song.ogg", b"la la la")
        .unwrap();
    fx.engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();
    let id = remote.identifier();

    let requested = fx.engine.request_download(&id, "files").unwrap();
    assert_eq!(requested.download_state, DownloadState::Downloading);
    assert!(matches!(
        fx.engine.request_download(&id, "files"),
        Err(SyncError::State(_))
    ));

    let report = fx
        .engine
        .process_next_transfer(&mut fx.jobs)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, CompletionStatus::Completed);

    let path = fx.engine.content_path(&id, "files").unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"la la la");
    let domain = files_id(&fx.engine);
    let row = fx.engine.store().get(domain, &id).unwrap().unwrap();
    assert_eq!(row.download_state, DownloadState::Downloaded);

    let again = fx.engine.request_download(&id, "files").unwrap();
    assert_eq!(again.download_state, DownloadState::Downloaded);
    assert!(fx.jobs.try_recv().is_none());
}

#[tokio::test]
async fn failed_download_is_recorded() {
    let mut fx = fixture();
    let remote = fx
        .engine
        .remote()
        .add_file(ROOT_ITEM_ID, "big.iso", b"0000")
        .unwrap();
    fx.engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();
    let id = remote.identifier();

    fx.engine.request_download(&id, "files").unwrap();
    fx.engine.remote().set_connected(false);
    let report = fx
        .engine
        .process_next_transfer(&mut fx.jobs)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(report.status, CompletionStatus::Failed(_)));

    let domain = files_id(&fx.engine);
    let row = fx.engine.store().get(domain, &id).unwrap().unwrap();
    assert_eq!(row.download_state, DownloadState::NotStarted);
    assert!(row.download_error.is_some());
    assert_eq!(fx.engine.stats().downloads_failed, 1);
}

#[test]
fn staging_errors_leave_no_rows() {
    let fx = fixture();
    let domain = files_id(&fx.engine);
    let docs = fx
        .engine
        .stage_directory(ROOT_ITEM_ID, "files", "Docs")
        .unwrap();
    let before = fx.engine.store().item_count();

    let err = fx
        .engine
        .stage_directory(ROOT_ITEM_ID, "files", "docs")
        .unwrap_err();
    match err {
        SyncError::Collision { existing_id, .. } => assert_eq!(existing_id, docs.id),
        other => panic!("expected collision, got {other:?}"),
    }

    assert!(matches!(
        fx.engine.stage_directory("missing", "files", "x"),
        Err(SyncError::NotFound { .. })
    ));
    assert!(matches!(
        fx.engine.stage_directory(ROOT_ITEM_ID, "music", "x"),
        Err(SyncError::UnknownDomain(_))
    ));
    assert!(matches!(
        fx.engine.stage_directory(ROOT_ITEM_ID, "files", "a/b"),
        Err(SyncError::State(_))
    ));

    let source = write_source(fx.dir.path(), "DOCS", b"clash");
    assert!(matches!(
        fx.engine.stage_import(ROOT_ITEM_ID, "files", &source),
        Err(SyncError::Collision { .. })
    ));
    assert!(source.exists());

    assert_eq!(fx.engine.store().item_count(), before);
    assert_eq!(
        fx.engine
            .store()
            .get(domain, ROOT_ITEM_ID)
            .unwrap()
            .unwrap()
            .size,
        1
    );
}

#[tokio::test]
async fn import_into_a_file_is_rejected() {
    let mut fx = fixture();
    let source = write_source(fx.dir.path(), "a.txt", b"a");
    let file = fx
        .engine
        .stage_import(ROOT_ITEM_ID, "files", &source)
        .unwrap();
    fx.engine
        .process_next_transfer(&mut fx.jobs)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(
        fx.engine.stage_directory(&file.id, "files", "inner"),
        Err(SyncError::State(_))
    ));
    assert!(matches!(
        fx.engine.refresh_item(ROOT_ITEM_ID, "files"),
        Err(SyncError::State(_))
    ));
    assert!(matches!(
        fx.engine.refresh_item(&file.id, "files"),
        Err(SyncError::State(_))
    ));
}

#[test]
fn unreachable_remote_changes_nothing() {
    let fx = fixture();
    fx.engine
        .remote()
        .add_file(ROOT_ITEM_ID, "report.pdf", b"%PDF")
        .unwrap();
    fx.engine.remote().set_connected(false);

    let changes = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();
    assert!(changes.is_empty());
    assert!(!changes.more_remaining);
    assert_eq!(changes.next_anchor(), 0);
    assert!(fx.engine.stats().last_error.is_some());

    let domain = files_id(&fx.engine);
    assert_eq!(
        fx.engine.store().anchor_of(domain, ROOT_ITEM_ID).unwrap(),
        Some(0)
    );

    fx.engine.remote().set_connected(true);
    let changes = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();
    assert_eq!(changes.updated.len(), 1);
}

#[test]
fn remote_erasure_removes_local_subtree() {
    let fx = fixture();
    let remote = fx.engine.remote();
    let docs = remote.add_directory(ROOT_ITEM_ID, "docs").unwrap();
    let inner = remote.add_file(&docs.identifier(), "inner.txt", b"x").unwrap();

    drain(&fx.engine, ROOT_ITEM_ID);
    drain(&fx.engine, &docs.identifier());

    let domain = files_id(&fx.engine);
    assert!(fx
        .engine
        .store()
        .get(domain, &inner.identifier())
        .unwrap()
        .is_some());

    assert!(remote.erase(&docs.identifier()));
    let token = fx.engine.current_anchor(ROOT_ITEM_ID, "files").unwrap();
    let changes = fx
        .engine
        .enumerate_changes(ROOT_ITEM_ID, "files", Some(&token))
        .unwrap();
    assert_eq!(changes.erased, vec![docs.identifier()]);

    let store = fx.engine.store();
    assert!(store.get(domain, &docs.identifier()).unwrap().is_none());
    assert!(store.get(domain, &inner.identifier()).unwrap().is_none());
    assert_eq!(store.get(domain, ROOT_ITEM_ID).unwrap().unwrap().size, 0);
}

#[test]
fn refresh_reads_current_remote_metadata() {
    let fx = fixture();
    let remote = fx
        .engine
        .remote()
        .add_file(ROOT_ITEM_ID, "a.txt", b"abc")
        .unwrap();
    fx.engine
        .enumerate_changes(ROOT_ITEM_ID, "files", None)
        .unwrap();

    let item = fx
        .engine
        .refresh_item(&remote.identifier(), "files")
        .unwrap();
    assert_eq!(item.size, 3);
    assert_eq!(item.upload_state, UploadState::Uploaded);

    fx.engine.remote().erase(&remote.identifier());
    assert!(matches!(
        fx.engine.refresh_item(&remote.identifier(), "files"),
        Err(SyncError::Rejected { status: 404, .. })
    ));
}

#[tokio::test]
async fn driver_runs_jobs_until_shutdown() {
    let fx = fixture();
    let Fixture { dir: _dir, engine, jobs } = fx;
    let driver = tokio::spawn(Arc::clone(&engine).run_transfers(jobs));

    let staged = engine
        .stage_directory(ROOT_ITEM_ID, "files", "Inbox")
        .unwrap();
    let domain = files_id(&engine);

    let mut uploaded = false;
    for _ in 0..200 {
        let row = engine.store().get(domain, &staged.id).unwrap().unwrap();
        if row.upload_state == UploadState::Uploaded {
            uploaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(uploaded);

    engine.shutdown_transfers();
    driver.await.unwrap();

    let late = engine
        .stage_directory(ROOT_ITEM_ID, "files", "Outbox")
        .unwrap();
    let row = engine.store().get(domain, &late.id).unwrap().unwrap();
    assert_eq!(row.upload_state, UploadState::NotStarted);
    assert!(row.upload_error.is_some());
}

#[test]
fn store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");
    let remote_id;
    {
        let store = Arc::new(MetadataStore::open(&path).unwrap());
        let remote = MockRemote::new();
        remote_id = remote
            .add_file(ROOT_ITEM_ID, "kept.txt", b"k")
            .unwrap()
            .identifier();
        let (engine, _jobs) = SyncEngine::new(
            SyncConfig::new(dir.path().join("state")),
            storemirror_store::DomainRegistry::standard(),
            store,
            remote,
            RecordingHost::new(),
        )
        .unwrap();
        engine
            .enumerate_changes(ROOT_ITEM_ID, "files", None)
            .unwrap();
    }

    let store = MetadataStore::open(&path).unwrap();
    let registry = storemirror_store::DomainRegistry::standard();
    let domain = registry.get("files").unwrap().id;
    let row = store.get(domain, &remote_id).unwrap().unwrap();
    assert_eq!(row.name, "kept.txt");
    assert_eq!(store.anchor_of(domain, ROOT_ITEM_ID).unwrap(), Some(1));
    assert!(store.verify(&registry).unwrap().is_ok());
}

#[test]
fn interrupted_transfers_are_retryable_after_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");
    let open_engine = |store: Arc<MetadataStore>| {
        SyncEngine::new(
            SyncConfig::new(dir.path().join("state")),
            storemirror_store::DomainRegistry::standard(),
            store,
            MockRemote::new(),
            RecordingHost::new(),
        )
        .unwrap()
    };

    let (reports_id, notes_id, absorbed_id, absorbed_origin) = {
        let (engine, _jobs) = open_engine(Arc::new(MetadataStore::open(&path).unwrap()));
        let reports = engine
            .stage_directory(ROOT_ITEM_ID, "files", "Reports")
            .unwrap();
        let source = write_source(dir.path(), "notes.txt", b"notes");
        let notes = engine.stage_import(ROOT_ITEM_ID, "files", &source).unwrap();

        // an import whose upload the remote committed before the process died
        let source = write_source(dir.path(), "sent.txt", b"sent");
        let sent = engine.stage_import(ROOT_ITEM_ID, "files", &source).unwrap();
        let remote = engine
            .remote()
            .add_file(ROOT_ITEM_ID, "sent.txt", b"sent")
            .unwrap();
        engine
            .enumerate_changes(ROOT_ITEM_ID, "files", None)
            .unwrap();
        engine.shutdown_transfers();
        (reports.id, notes.id, remote.identifier(), sent.id)
    };

    let (engine, mut jobs) = open_engine(Arc::new(MetadataStore::open(&path).unwrap()));
    let domain = files_id(&engine);
    let store = engine.store();

    for id in [&reports_id, &notes_id] {
        let row = store.get(domain, id).unwrap().unwrap();
        assert_eq!(row.upload_state, UploadState::NotStarted);
        assert_eq!(row.upload_error.as_deref(), Some(INTERRUPTED));
    }
    let absorbed = store.get(domain, &absorbed_id).unwrap().unwrap();
    assert_eq!(absorbed.download_state, DownloadState::NotStarted);
    let artifacts = engine.config().artifact_root.clone();
    assert!(!artifacts.join(&absorbed_origin).exists());
    assert!(artifacts.join(&notes_id).is_dir());

    let retried = engine.retry_upload(&reports_id, "files").unwrap();
    assert_eq!(retried.upload_state, UploadState::Uploading);
    engine.retry_upload(&notes_id, "files").unwrap();
    let queued: Vec<String> = std::iter::from_fn(|| jobs.try_recv())
        .map(|job| job.task.item_id().to_string())
        .collect();
    assert_eq!(queued, vec![reports_id, notes_id]);
    assert!(engine.request_download(&absorbed_id, "files").is_ok());
}

#[derive(Debug, Clone)]
enum RemoteOp {
    Add(u8),
    Erase(u8),
    Enumerate,
}

fn remote_op() -> impl Strategy<Value = RemoteOp> {
    prop_oneof![
        (0u8..6).prop_map(RemoteOp::Add),
        any::<u8>().prop_map(RemoteOp::Erase),
        Just(RemoteOp::Enumerate),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn anchor_tracks_last_applied_batch(ops in prop::collection::vec(remote_op(), 1..40)) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetadataStore::open_in_memory().unwrap());
        let (engine, _jobs) = SyncEngine::new(
            SyncConfig::new(dir.path()).with_change_batch_size(2),
            storemirror_store::DomainRegistry::standard(),
            store,
            MockRemote::new(),
            RecordingHost::new(),
        )
        .unwrap();
        let domain = engine.registry().get("files").unwrap().id;

        for op in ops {
            match op {
                RemoteOp::Add(n) => {
                    // name clashes are rejected by the remote
                    let _ = engine.remote().add_file(ROOT_ITEM_ID, &format!("f{n}"), b"x");
                }
                RemoteOp::Erase(index) => {
                    let children = engine.remote().children(ROOT_ITEM_ID);
                    if !children.is_empty() {
                        let victim = &children[usize::from(index) % children.len()];
                        engine.remote().erase(&victim.identifier());
                    }
                }
                RemoteOp::Enumerate => {
                    let before = engine.store().anchor_of(domain, ROOT_ITEM_ID).unwrap().unwrap();
                    let token = engine.current_anchor(ROOT_ITEM_ID, "files").unwrap();
                    let changes = engine
                        .enumerate_changes(ROOT_ITEM_ID, "files", Some(&token))
                        .unwrap();
                    let after = engine.store().anchor_of(domain, ROOT_ITEM_ID).unwrap().unwrap();
                    prop_assert!(after >= before);
                    prop_assert_eq!(after, changes.next_anchor());
                }
            }
        }

        drain(&engine, ROOT_ITEM_ID);
        prop_assert_eq!(
            engine.store().anchor_of(domain, ROOT_ITEM_ID).unwrap().unwrap(),
            engine.remote().latest_anchor(ROOT_ITEM_ID)
        );

        let mut local: Vec<String> = engine
            .store()
            .children(domain, ROOT_ITEM_ID)
            .unwrap()
            .into_iter()
            .map(|item| item.id)
            .collect();
        let mut remote: Vec<String> = engine
            .remote()
            .children(ROOT_ITEM_ID)
            .into_iter()
            .map(|item| item.identifier())
            .collect();
        local.sort();
        remote.sort();
        prop_assert_eq!(local, remote);
    }
}
