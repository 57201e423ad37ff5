//! Integration tests for the sync engine against an in-process metadata API.

use metasync_archive::{crc32, ExportArchive};
use metasync_engine::{
    ClientConfig, Credentials, EntrySource, MemoryWorkingTree, PathMapping, PollConfig,
    Reconciler, SoapTransport, SyncEngine, SyncError, SyncState, WorkingTree,
};
use metasync_protocol::ExecuteAnonymousResult;
use metasync_testkit::prelude::*;
use proptest::prelude::*;
use std::path::Path;
use std::time::Duration;

fn config() -> ClientConfig {
    ClientConfig::new()
        .with_export_types(["ApexClass", "ApexPage"])
        .with_poll(PollConfig::new(Duration::ZERO, 20))
}

fn credentials() -> Credentials {
    Credentials::new("dev@example.com", "password", "TOKEN")
}

fn engine_with(
    config: ClientConfig,
    server: FakeMetadataServer,
    fixture: &WorkingTreeFixture,
) -> SyncEngine<SoapTransport<FakeMetadataServer>, metasync_engine::FsWorkingTree> {
    let transport = SoapTransport::new(&config, server);
    SyncEngine::new(config, transport, fixture.tree())
}

fn server(engine: &SyncEngine<SoapTransport<FakeMetadataServer>, impl WorkingTree>) -> &FakeMetadataServer {
    engine.transport().client()
}

#[test]
fn full_sync_cycle() {
    let archive = ArchiveBuilder::new()
        .entry("unpackaged/classes/Foo.cls", "public class Foo {}")
        .entry("unpackaged/pages/Bar.page", "<apex:page/>")
        .build();
    let fixture = WorkingTreeFixture::new();
    fixture
        .write("src/classes/Foo.cls", "public class Foo {}")
        .write("src/pages/Bar.page", "<apex:page>edited</apex:page>");

    let engine = engine_with(
        config(),
        FakeMetadataServer::new()
            .with_archive(archive)
            .with_pending_polls(3),
        &fixture,
    );

    engine.login(&credentials()).unwrap();
    let result = engine.synchronize().unwrap();

    assert_eq!(engine.state(), SyncState::Synced);
    assert_eq!(result.job_id, FAKE_JOB_ID);
    assert_eq!(result.poll_attempts, 4);
    assert_eq!(server(&engine).polls(), 4);
    assert_eq!(
        server(&engine).operations(),
        vec![
            "login",
            "retrieve",
            "checkRetrieveStatus",
            "checkRetrieveStatus",
            "checkRetrieveStatus",
            "checkRetrieveStatus",
        ]
    );

    let entries = result.archive.entries();
    assert_eq!(entries[0].source, EntrySource::Remote);
    assert_eq!(entries[1].source, EntrySource::Local);
    assert_eq!(entries[1].entry.path(), "unpackaged/pages/Bar.page");
    assert_eq!(entries[1].entry.content(), b"<apex:page>edited</apex:page>");

    let decoded = ExportArchive::from_base64(&result.archive.to_base64().unwrap()).unwrap();
    assert_eq!(decoded, result.archive.to_archive());
}

#[test]
fn authenticated_requests_carry_the_session() {
    let fixture = WorkingTreeFixture::new();
    let engine = engine_with(config(), FakeMetadataServer::new(), &fixture);

    engine.login(&credentials()).unwrap();
    engine.synchronize().unwrap();

    let requests = server(&engine).requests();
    assert_eq!(requests[0].session_id, None);
    assert!(requests[0].body.contains("<password>passwordTOKEN</password>"));
    for request in &requests[1..] {
        assert_eq!(request.session_id.as_deref(), Some(FAKE_SESSION_ID));
        assert_eq!(
            request.url,
            "https://na1.salesforce.com/services/Soap/m/28.0/00D000000000001"
        );
    }
    assert!(requests[1].body.contains("<name>ApexClass</name>"));
    assert!(requests[1].body.contains("<name>ApexPage</name>"));
}

#[test]
fn checksum_divergence_takes_local_content() {
    let (archive, fixture) = scenarios::one_unchanged_one_edited();
    let remote_foo = archive.entries()[0].clone();

    let engine = engine_with(
        config().with_mapping(PathMapping::new("src/", "src")),
        FakeMetadataServer::new().with_archive(archive),
        &fixture,
    );
    engine.login(&credentials()).unwrap();
    let result = engine.synchronize().unwrap();

    assert_eq!(
        result.archive.paths(),
        vec!["src/classes/Foo.cls", "src/pages/Bar.page"]
    );
    assert_eq!(result.archive.entries()[0].entry.content(), remote_foo.content());
    assert_eq!(result.archive.entries()[1].entry.content(), b"B");
    assert_eq!(result.archive.entries()[1].entry.checksum(), crc32(b"B"));
    assert_eq!(result.local_entries, 1);
    assert_eq!(result.remote_entries, 1);
}

#[test]
fn rejected_login_stops_everything() {
    let fixture = WorkingTreeFixture::new();
    let engine = engine_with(
        config(),
        FakeMetadataServer::new().with_login_fault(
            "sf:INVALID_LOGIN",
            "INVALID_LOGIN: Invalid username, password, security token; or user locked out.",
        ),
        &fixture,
    );

    let err = engine.login(&credentials()).unwrap_err();
    assert!(matches!(err, SyncError::AuthenticationFailed(_)));
    assert_eq!(engine.state(), SyncState::Error);

    assert!(matches!(engine.synchronize(), Err(SyncError::NotAuthenticated)));
    assert_eq!(server(&engine).operations(), vec!["login"]);
}

#[test]
fn missing_local_file_aborts_without_output() {
    let (archive, fixture) = scenarios::clean_checkout(3);
    fixture.remove("src/classes/C1.cls");

    let engine = engine_with(
        config(),
        FakeMetadataServer::new().with_archive(archive),
        &fixture,
    );
    engine.login(&credentials()).unwrap();

    match engine.synchronize().unwrap_err() {
        SyncError::LocalFileMissing { path, .. } => {
            assert_eq!(path, Path::new("src").join("classes").join("C1.cls"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(engine.state(), SyncState::Error);
    assert_eq!(engine.stats().cycles_completed, 0);
}

#[test]
fn dead_job_is_bounded() {
    let fixture = WorkingTreeFixture::new();
    let engine = engine_with(
        config().with_poll(PollConfig::new(Duration::ZERO, 5)),
        FakeMetadataServer::new().with_pending_polls(usize::MAX),
        &fixture,
    );
    engine.login(&credentials()).unwrap();

    let err = engine.synchronize().unwrap_err();
    assert!(matches!(err, SyncError::PollTimeout { attempts: 5, .. }));
    assert_eq!(server(&engine).polls(), 5);
    assert_eq!(engine.stats().poll_attempts, 5);
}

#[test]
fn transport_failure_on_submit_is_wrapped() {
    let fixture = WorkingTreeFixture::new();
    let engine = engine_with(config(), FakeMetadataServer::new(), &fixture);
    engine.login(&credentials()).unwrap();
    server(&engine).inject(Err("connection reset by peer".into()));

    let err = engine.synchronize().unwrap_err();
    assert!(matches!(err, SyncError::ExportSubmit(_)));
    assert!(err.is_retryable());
    assert_eq!(server(&engine).polls(), 0);
}

#[test]
fn execute_anonymous_round_trip() {
    let fixture = WorkingTreeFixture::new();
    let engine = engine_with(
        config(),
        FakeMetadataServer::new().with_execute_result(ExecuteAnonymousResult {
            compiled: true,
            compile_problem: None,
            success: Some(false),
            exception_message: Some("System.NullPointerException".into()),
            debug_log: Some("28.0 APEX_CODE,FINEST\nEXCEPTION_THROWN".into()),
        }),
        &fixture,
    );
    engine.login(&credentials()).unwrap();

    let result = engine.execute_anonymous("String s; s.length();").unwrap();
    assert!(result.compiled);
    assert_eq!(result.success, Some(false));
    assert_eq!(
        result.exception_message.as_deref(),
        Some("System.NullPointerException")
    );
    assert!(result.debug_log.unwrap().contains("EXCEPTION_THROWN"));

    let request = server(&engine).requests().pop().unwrap();
    assert_eq!(request.operation, "executeAnonymous");
    assert!(request.url.contains("/Soap/s/28.0/"));
    assert!(request.body.contains("<debugLevel>Detail</debugLevel>"));
}

#[test]
fn listing_configured_types() {
    let fixture = WorkingTreeFixture::new();
    let engine = engine_with(
        config(),
        FakeMetadataServer::new().with_listing(
            "ApexClass",
            vec![metadata_item(
                "01p000000000001",
                "classes/Foo.cls",
                "2013-05-01T10:00:00.000Z",
                "2013-06-02T08:30:00.000Z",
            )],
        ),
        &fixture,
    );
    engine.login(&credentials()).unwrap();

    let listings = engine.list_configured_metadata().unwrap();
    assert_eq!(listings.len(), 2);
    assert_eq!(listings[0].0, "ApexClass");
    assert_eq!(listings[0].1[0].file_name, "classes/Foo.cls");
    assert_eq!(
        listings[0].1[0].last_modified_date.to_rfc3339(),
        "2013-06-02T08:30:00+00:00"
    );
    assert_eq!(listings[1].0, "ApexPage");
    assert!(listings[1].1.is_empty());
}

proptest! {
    #[test]
    fn reconciliation_follows_checksums((archive, edits) in sync_case_strategy(10)) {
        let tree = MemoryWorkingTree::new();
        for (entry, edit) in archive.entries().iter().zip(&edits) {
            let local = match edit {
                LocalEdit::Unchanged => entry.content().to_vec(),
                LocalEdit::Edited(bytes) => bytes.clone(),
            };
            let relative = entry.path().trim_start_matches("unpackaged/");
            tree.insert(Path::new("src").join(relative), local);
        }

        let result = Reconciler::default().reconcile(&archive, &tree).unwrap();
        prop_assert_eq!(result.paths(), archive.paths());

        for (remote, out) in archive.entries().iter().zip(result.entries()) {
            let local = tree.read(&out.local_path).unwrap();
            if crc32(&local) == remote.checksum() {
                prop_assert_eq!(&out.entry, remote);
            } else {
                prop_assert_eq!(out.entry.content(), local.as_slice());
            }
        }

        prop_assert_eq!(Reconciler::default().reconcile(&archive, &tree).unwrap(), result);
    }
}
