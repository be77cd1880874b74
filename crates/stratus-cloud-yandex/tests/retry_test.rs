mod common;

use common::{FakeApi, done, provider, running};
use serde_json::json;
use stratus_cloud::{CloudError, ResourceData, StatusCode};
use tokio_test::assert_ok;

const DISK: &str = "yandex_compute_disk";

fn remote_disk() -> serde_json::Value {
    json!({
        "id": "fhm1",
        "folderId": "b1gfolder",
        "name": "data",
        "typeId": "network-hdd",
        "zoneId": "ru-central1-a",
        "size": "21474836480",
        "status": "READY"
    })
}

/// UNAVAILABLE は再試行され、利用者には遅延としてしか見えないことを確認
#[tokio::test(start_paused = true)]
async fn test_unavailable_is_retried() {
    let api = FakeApi::new();
    api.fail("GET compute/v1/disks/fhm1", StatusCode::Unavailable, "upstream connect error")
        .fail("GET compute/v1/disks/fhm1", StatusCode::Unavailable, "upstream connect error")
        .expect("GET compute/v1/disks/fhm1", remote_disk());

    let mut data = ResourceData::stored("fhm1", json!({ "name": "data" })).unwrap();
    assert_ok!(provider(&api).read(DISK, &mut data).await);

    assert_eq!(api.requests().len(), 3);
    assert_eq!(data.state()["size"], 20);
}

#[tokio::test(start_paused = true)]
async fn test_other_errors_are_terminal() {
    for status in [
        StatusCode::PermissionDenied,
        StatusCode::InvalidArgument,
        StatusCode::Internal,
        StatusCode::DeadlineExceeded,
    ] {
        let api = FakeApi::new();
        api.fail("GET compute/v1/disks/fhm1", status, "no");

        let mut data = ResourceData::stored("fhm1", json!({ "name": "data" })).unwrap();
        let err = provider(&api).read(DISK, &mut data).await.unwrap_err();

        assert_eq!(err.status(), Some(status));
        assert_eq!(api.requests().len(), 1, "{status:?} must not be retried");
        assert!(!data.is_gone());
    }
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_the_deadline() {
    let api = FakeApi::new();
    for _ in 0..10 {
        api.fail("GET compute/v1/disks/fhm1", StatusCode::Unavailable, "overloaded");
    }

    // Backoff starts at 0.5s and doubles, so only a few attempts fit in 2s.
    let state = json!({ "name": "data", "timeouts": { "read": "2s" } });
    let mut data = ResourceData::stored("fhm1", state).unwrap();
    let err = provider(&api).read(DISK, &mut data).await.unwrap_err();

    assert!(matches!(err, CloudError::Timeout(_)), "{err}");
    assert!(err.to_string().contains("overloaded"));
    let attempts = api.requests().len();
    assert!((2..=3).contains(&attempts), "{attempts} attempts");
}

#[tokio::test(start_paused = true)]
async fn test_operation_is_polled_until_done() {
    let api = FakeApi::new();
    api.expect("DELETE compute/v1/disks/fhm1", running())
        .expect("GET operations/op1", running())
        .fail("GET operations/op1", StatusCode::Unavailable, "try again")
        .expect("GET operations/op1", done(json!({ "diskId": "fhm1" })));

    let mut data = ResourceData::stored("fhm1", json!({ "name": "data" })).unwrap();
    assert_ok!(provider(&api).delete(DISK, &mut data).await);
    api.assert_finished();
}

#[tokio::test(start_paused = true)]
async fn test_operation_wait_times_out() {
    let api = FakeApi::new();
    api.expect("DELETE compute/v1/disks/fhm1", running());
    for _ in 0..20 {
        api.expect("GET operations/op1", running());
    }

    let state = json!({ "name": "data", "timeouts": { "delete": "1s" } });
    let mut data = ResourceData::stored("fhm1", state).unwrap();
    let err = provider(&api).delete(DISK, &mut data).await.unwrap_err();

    assert!(matches!(err, CloudError::Timeout(_)), "{err}");
    assert!(err.to_string().contains("did not finish within 1s"));
}
