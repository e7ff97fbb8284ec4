// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use httpmock::MockRef;
use serde_json::json;
use stormgen::{Client, Error, OperationState, PendingOperation, PollOptions, Submission};
use tempdir::TempDir;

use stormgen_mock::rest::{Method, Server, ServerBuilder};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_poll() -> PollOptions {
    PollOptions {
        interval: Duration::from_millis(20),
        backoff: Duration::from_millis(20),
        // turns a misbehaving test into a failure instead of a hang
        deadline: Some(Duration::from_secs(10)),
    }
}

fn connect(server: &Server) -> Client {
    Client::new(&server.base_url(), &server.username, &server.password)
        .expect("client creation failed")
}

async fn logged_in(server: &Server) -> Client {
    server.expect_login();
    let client = connect(server);
    client.login().await.expect("login failed");
    client
}

async fn start_backup(client: &Client, server: &Server, status_path: &str) -> PendingOperation {
    server.accept_operation(Method::POST, "/api/v2/admin/backup", status_path);
    client
        .admin()
        .backup("nightly")
        .await
        .expect("backup failed")
        .accepted()
        .expect("expected a deferred operation")
}

async fn wait_for_hits(mock: &MockRef<'_>, hits: usize) {
    for _ in 0..500 {
        if mock.hits() >= hits {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("mock was not hit {} times", hits);
}

#[tokio::test]
async fn login() {
    init();

    let server = ServerBuilder::default().build();
    let login = server.expect_login();
    let client = connect(&server);

    client.login().await.expect("login failed");
    assert_eq!(login.hits(), 1);

    // the session key is attached to subsequent requests
    let op = server.complete_operation(
        Method::POST,
        "/api/v2/admin/backup",
        json!({ "name": "nightly", "size": 1234 }),
    );
    let reply = client.admin().backup("nightly").await.expect("backup failed");
    let result = reply.completed().expect("expected a synchronous result");
    assert_eq!(result["name"], "nightly");
    assert_eq!(op.hits(), 1);
}

#[tokio::test]
async fn first_request_logs_in() {
    init();

    let server = ServerBuilder::default().build();
    let login = server.expect_login();
    let client = connect(&server);

    let op = server.complete_operation(Method::POST, "/api/v2/admin/reboot", json!({}));
    client.admin().reboot().await.expect("reboot failed");

    assert_eq!(login.hits(), 1);
    assert_eq!(op.hits(), 1);
}

#[tokio::test]
async fn backup_polls_until_completed() {
    init();

    let server = ServerBuilder::default().build();
    let client = logged_in(&server).await;
    let mut pending = start_backup(&client, &server, "/api/v2/operations/1").await;

    let reports = Arc::new(Mutex::new(Vec::new()));
    let seen = reports.clone();
    pending.on_progress(move |status| {
        seen.lock()
            .unwrap()
            .push((status.state().clone(), status.progress()));
    });

    let mut in_progress = server.status_in_progress("/api/v2/operations/1", "BACKUP", 10, "archiving");

    let driver = async {
        wait_for_hits(&in_progress, 1).await;
        in_progress.delete();
        server.status_completed("/api/v2/operations/1", "BACKUP")
    };

    let (status, completed) = tokio::join!(pending.wait_with(fast_poll()), driver);
    let status = status.expect("operation failed");

    assert_eq!(status.state(), &OperationState::Completed);
    assert_eq!(status.progress(), Some(100.0));
    assert!(completed.hits() >= 1);

    // no fetch happens once the operation settled
    let hits = completed.hits();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(completed.hits(), hits);

    let reports = reports.lock().unwrap();
    assert!(reports
        .iter()
        .any(|(state, _)| state == &OperationState::InProgress));
    assert_eq!(reports.last().unwrap().0, OperationState::Completed);
}

#[tokio::test]
async fn polling_rides_through_an_outage() {
    init();

    let server = ServerBuilder::default().build();
    let client = logged_in(&server).await;
    let mut pending = start_backup(&client, &server, "/api/v2/operations/2").await;

    // the appliance reports itself unavailable, as it does while rebooting
    let mut unavailable =
        server.status_error("/api/v2/operations/2", 503, json!({ "error": "rebooting" }));

    let driver = async {
        wait_for_hits(&unavailable, 2).await;
        unavailable.delete();
        server.status_completed("/api/v2/operations/2", "BACKUP")
    };

    let (status, _completed) = tokio::join!(pending.wait_with(fast_poll()), driver);
    let status = status.expect("operation failed");

    assert_eq!(status.state(), &OperationState::Completed);
}

#[tokio::test]
async fn expired_session_is_reopened() {
    init();

    let server = ServerBuilder::default().api_key("Key1").build();
    let mut login = server.expect_login();
    let client = connect(&server);
    client.login().await.expect("login failed");
    assert_eq!(login.hits(), 1);

    server.accept_operation(Method::POST, "/api/v2/admin/restore", "/api/v2/operations/3");
    let mut pending = client
        .admin()
        .restore("nightly")
        .await
        .expect("restore failed")
        .accepted()
        .expect("expected a deferred operation");
    login.delete();

    // the appliance invalidated the session: Key1 is now rejected, a new
    // login hands out Key2 which the status handle accepts
    let rejected = server.reject_key("/api/v2/operations/3", "Key1");
    let relogin = server.expect_login_with_key("Key2");
    let completed = server.status_with_key(
        "Key2",
        "/api/v2/operations/3",
        json!({
            "state": "COMPLETED",
            "type": "RESTORE",
            "progress": 100,
            "progressMessage": null,
        }),
    );

    let status = pending.wait_with(fast_poll()).await.expect("wait failed");

    assert_eq!(status.state(), &OperationState::Completed);
    assert_eq!(status.kind(), Some("RESTORE"));
    assert_eq!(rejected.hits(), 1);
    assert_eq!(relogin.hits(), 1);
    assert_eq!(completed.hits(), 1);
}

#[tokio::test]
async fn fatal_reply_aborts_polling() {
    init();

    let server = ServerBuilder::default().build();
    let client = logged_in(&server).await;
    let mut pending = start_backup(&client, &server, "/api/v2/operations/4").await;

    let broken = server.status_error("/api/v2/operations/4", 500, json!({ "error": "internal" }));

    let err = pending.wait_with(fast_poll()).await.unwrap_err();
    match err {
        Error::Api { status, body } => {
            assert_eq!(status.as_u16(), 500);
            assert!(body.contains("internal"));
        }
        other => panic!("unexpected error: {}", other),
    }

    // the failure short-circuits: no further fetch
    assert_eq!(broken.hits(), 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broken.hits(), 1);
}

#[tokio::test]
async fn success_without_state_is_fatal() {
    init();

    let server = ServerBuilder::default().build();
    let client = logged_in(&server).await;
    let mut pending = start_backup(&client, &server, "/api/v2/operations/5").await;

    let empty = server.status_body("/api/v2/operations/5", json!({ "progress": 50 }));

    let err = pending.wait_with(fast_poll()).await.unwrap_err();
    assert_matches!(err, Error::ContractViolation { .. });
    assert_eq!(empty.hits(), 1);
}

#[tokio::test]
async fn failed_operation_surfaces_and_stays_settled() {
    init();

    let server = ServerBuilder::default().build();
    let client = logged_in(&server).await;
    let mut pending = start_backup(&client, &server, "/api/v2/operations/6").await;

    let failed = server.status_failed("/api/v2/operations/6", "BACKUP", "disk full");

    let err = pending.wait_with(fast_poll()).await.unwrap_err();
    let status = assert_matches!(err, Error::OperationFailed(status) => status);
    assert_eq!(status.state(), &OperationState::Failed);
    assert_eq!(status.progress_message(), Some("disk full"));

    // a settled handle answers from memory
    let hits = failed.hits();
    let err = pending.wait_with(fast_poll()).await.unwrap_err();
    assert_matches!(err, Error::OperationFailed(_));
    assert_eq!(failed.hits(), hits);
}

#[tokio::test]
async fn unknown_state_is_terminal() {
    init();

    let server = ServerBuilder::default().build();
    let client = logged_in(&server).await;
    let mut pending = start_backup(&client, &server, "/api/v2/operations/7").await;

    let cancelled = server.status_body(
        "/api/v2/operations/7",
        json!({
            "state": "CANCELLED",
            "type": "BACKUP",
            "progress": 40,
            "progressMessage": "stopped by operator",
        }),
    );

    let status = pending.wait_with(fast_poll()).await.expect("wait failed");
    assert_eq!(
        status.state(),
        &OperationState::Other("CANCELLED".to_string())
    );
    assert_eq!(cancelled.hits(), 1);
}

#[tokio::test]
async fn deadline_bounds_an_endless_outage() {
    init();

    let server = ServerBuilder::default().build();
    let client = logged_in(&server).await;
    let mut pending = start_backup(&client, &server, "/api/v2/operations/8").await;

    let unavailable =
        server.status_error("/api/v2/operations/8", 503, json!({ "error": "rebooting" }));

    let options = PollOptions {
        interval: Duration::from_millis(20),
        backoff: Duration::from_millis(20),
        deadline: Some(Duration::from_millis(200)),
    };
    let err = pending.wait_with(options).await.unwrap_err();

    assert_matches!(err, Error::DeadlineExceeded);
    assert!(unavailable.hits() >= 1);
}

#[tokio::test]
async fn upload_defers_the_import() {
    init();

    let server = ServerBuilder::default().build();
    let client = logged_in(&server).await;

    let dir = TempDir::new("stormgen-upload").expect("failed to create temp dir");
    let path = dir.path().join("update.img");
    std::fs::write(&path, b"image-bytes").expect("failed to write image");

    let upload = server.expect_upload("/api/v2/storage/upload", "/api/v2/operations/9");

    let reply = client.upload(&path).await.expect("upload failed");
    assert_matches!(reply, Submission::Accepted(_));
    assert_eq!(upload.hits(), 1);

    // the uploaded image can then be installed
    let install = server.accept_operation(
        Method::POST,
        "/api/v2/admin/update/install",
        "/api/v2/operations/10",
    );
    let reply = client
        .admin()
        .install_update("update.img")
        .await
        .expect("install failed");
    assert_matches!(reply, Submission::Accepted(_));
    assert_eq!(install.hits(), 1);
}

#[tokio::test]
async fn report_download() {
    init();

    let server = ServerBuilder::default().build();
    let client = logged_in(&server).await;

    let content = "frames,loss\n100,0\n";
    let file = server.serve_file("/api/v2/reports/run-12.csv", content);

    let report = client.report("reports/run-12.csv").expect("bad report path");
    let dir = TempDir::new("stormgen-report").expect("failed to create temp dir");
    let path = report.download(dir.path()).await.expect("download failed");

    assert_eq!(path.file_name().unwrap(), "run-12.csv");
    assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
    assert_eq!(file.hits(), 1);
}
