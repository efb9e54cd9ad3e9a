mod common;

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

use hangar_core::bridge::install_router::InstallRouter;
use hangar_core::bus::message_bus::MessageBus;
use hangar_core::fragmenter::events::{EventKind, FragmenterEvent};
use hangar_core::fragmenter::http_fragmenter::HttpFragmenter;
use hangar_core::fragmenter::package_fragmenter::FragmenterError;
use hangar_core::types::types::{InstallError, InstallId, InstallOutcome, InstallRequest};

use common::{drain, events_for};

/// Builds a small addon archive: a manifest plus one nested file.
fn build_package() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer.start_file("manifest.json", options).unwrap();
    writer
        .write_all(br#"{"package_version":"0.12.0","title":"A32NX"}"#)
        .unwrap();
    writer.add_directory("SimObjects/", options).unwrap();
    writer.start_file("SimObjects/aircraft.cfg", options).unwrap();
    writer.write_all(b"[VERSION]\nmajor = 1\n").unwrap();

    writer.finish().unwrap().into_inner()
}

fn fast_fragmenter(max_retries: u32) -> Arc<HttpFragmenter> {
    Arc::new(
        HttpFragmenter::builder()
            .with_max_retries(max_retries)
            .with_retry_base_delay(Duration::from_millis(10))
            .build()
            .unwrap(),
    )
}

fn kinds(events: &[FragmenterEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind()).collect()
}

fn is_empty_dir(dir: &std::path::Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

// ---------------------------------------------------------------
// Successful install
// ---------------------------------------------------------------

#[tokio::test]
async fn test_install_downloads_extracts_and_copies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/packages/a32nx.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(build_package()))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let (bus, mut rx) = MessageBus::new();
    let router = InstallRouter::new(fast_fragmenter(3), bus);

    let req = InstallRequest::new(
        InstallId(1),
        format!("{}/packages/a32nx.zip", server.uri()),
        temp.path(),
        dest.path().join("flybywire-aircraft-a320-neo"),
    );
    let outcome = router.handle_install_request(req).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Completed);

    let installed = dest.path().join("flybywire-aircraft-a320-neo");
    let manifest = std::fs::read_to_string(installed.join("manifest.json")).unwrap();
    assert!(manifest.contains("A32NX"));
    assert!(installed.join("SimObjects/aircraft.cfg").exists());

    // The per-install work dir is gone.
    assert!(is_empty_dir(temp.path()));

    let events = events_for(&drain(&mut rx), 1);
    let mut seen = kinds(&events);
    seen.dedup();
    assert_eq!(
        seen,
        vec![
            EventKind::FullDownload,
            EventKind::DownloadStarted,
            EventKind::DownloadProgress,
            EventKind::DownloadFinished,
            EventKind::UnzipStarted,
            EventKind::UnzipFinished,
            EventKind::CopyStarted,
            EventKind::CopyFinished,
            EventKind::LogInfo,
        ]
    );
    assert_eq!(
        events[1],
        FragmenterEvent::DownloadStarted { module: "a32nx".into() }
    );

    let last_progress = events
        .iter()
        .rev()
        .find_map(|e| match e {
            FragmenterEvent::DownloadProgress { progress, .. } => Some(*progress),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_progress.percent, Some(100));
}

// ---------------------------------------------------------------
// Failures and retries
// ---------------------------------------------------------------

#[tokio::test]
async fn test_missing_package_fails_with_one_error_event() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let (bus, mut rx) = MessageBus::new();
    let router = InstallRouter::new(fast_fragmenter(3), bus);

    let req = InstallRequest::new(InstallId(2), format!("{}/missing.zip", server.uri()), temp.path(), dest.path());
    let result = router.handle_install_request(req).await;
    assert!(matches!(
        result,
        Err(InstallError::Fragmenter(FragmenterError::Status(404)))
    ));

    let events = events_for(&drain(&mut rx), 2);
    let errors: Vec<_> = events.iter().filter(|e| e.kind() == EventKind::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(events.last().map(|e| e.kind()), Some(EventKind::Error));
    assert!(!kinds(&events).contains(&EventKind::RetryScheduled));
    assert!(is_empty_dir(temp.path()));
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(build_package()))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let (bus, mut rx) = MessageBus::new();
    let router = InstallRouter::new(fast_fragmenter(3), bus);

    let req = InstallRequest::new(InstallId(3), format!("{}/kfbw.zip", server.uri()), temp.path(), dest.path());
    let outcome = router.handle_install_request(req).await.unwrap();
    assert_eq!(outcome, InstallOutcome::Completed);

    let events = events_for(&drain(&mut rx), 3);
    assert!(events.contains(&FragmenterEvent::RetryScheduled {
        module: "kfbw".into(),
        retry_count: 1,
        wait_secs: 0,
    }));
    assert!(events.contains(&FragmenterEvent::RetryStarted {
        module: "kfbw".into(),
        retry_count: 1,
    }));
    assert!(!kinds(&events).contains(&EventKind::Error));
    assert!(dest.path().join("manifest.json").exists());
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let (bus, mut rx) = MessageBus::new();
    let router = InstallRouter::new(fast_fragmenter(2), bus);

    let req = InstallRequest::new(InstallId(4), format!("{}/m.zip", server.uri()), temp.path(), dest.path());
    let result = router.handle_install_request(req).await;
    assert!(matches!(
        result,
        Err(InstallError::Fragmenter(FragmenterError::Status(503)))
    ));

    let events = events_for(&drain(&mut rx), 4);
    let scheduled = kinds(&events)
        .into_iter()
        .filter(|k| *k == EventKind::RetryScheduled)
        .count();
    assert_eq!(scheduled, 2);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_large_retry_budget_backs_off_without_overflow() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let (bus, mut rx) = MessageBus::new();
    let fragmenter = Arc::new(
        HttpFragmenter::builder()
            .with_max_retries(40)
            .with_retry_base_delay(Duration::ZERO)
            .build()
            .unwrap(),
    );
    let router = InstallRouter::new(fragmenter, bus);

    let req = InstallRequest::new(InstallId(7), format!("{}/m.zip", server.uri()), temp.path(), dest.path());
    let result = router.handle_install_request(req).await;
    assert!(matches!(
        result,
        Err(InstallError::Fragmenter(FragmenterError::Status(503)))
    ));

    let events = events_for(&drain(&mut rx), 7);
    let scheduled: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            FragmenterEvent::RetryScheduled { retry_count, wait_secs, .. } => {
                assert_eq!(*wait_secs, 0);
                Some(*retry_count)
            }
            _ => None,
        })
        .collect();
    assert_eq!(scheduled, (1..=40).collect::<Vec<u32>>());
    assert_eq!(server.received_requests().await.unwrap().len(), 41);
}

#[tokio::test]
async fn test_corrupt_archive_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"definitely not a zip".to_vec()))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let (bus, mut rx) = MessageBus::new();
    let router = InstallRouter::new(fast_fragmenter(0), bus);

    let req = InstallRequest::new(InstallId(5), format!("{}/broken.zip", server.uri()), temp.path(), dest.path());
    let result = router.handle_install_request(req).await;
    assert!(matches!(
        result,
        Err(InstallError::Fragmenter(FragmenterError::Archive(_)))
    ));

    let events = events_for(&drain(&mut rx), 5);
    assert!(kinds(&events).contains(&EventKind::UnzipStarted));
    assert!(!kinds(&events).contains(&EventKind::CopyStarted));
    assert_eq!(events.last().map(|e| e.kind()), Some(EventKind::Error));
}

// ---------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------

#[tokio::test]
async fn test_cancel_during_download_aborts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(build_package())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    let (bus, mut rx) = MessageBus::new();
    let router = Arc::new(InstallRouter::new(fast_fragmenter(3), bus));

    let req = InstallRequest::new(InstallId(6), format!("{}/slow.zip", server.uri()), temp.path(), dest.path());
    let r = Arc::clone(&router);
    let handle = tokio::spawn(async move { r.handle_install_request(req).await });

    // Wait for the download to start before cancelling.
    loop {
        let ev = rx.recv().await.unwrap();
        if ev.kind() == EventKind::DownloadStarted {
            break;
        }
    }
    router.handle_cancel_request(InstallId(6));

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancel was not observed")
        .unwrap()
        .unwrap();
    assert_eq!(outcome, InstallOutcome::Aborted);

    assert!(events_for(&drain(&mut rx), 6).is_empty());
    assert_eq!(router.bus().cancel_listener_count(), 0);
    assert!(is_empty_dir(temp.path()));
    assert!(is_empty_dir(dest.path()));
}
