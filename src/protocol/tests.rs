//! HTTP-level tests for the plugin protocol.

use axum::body::{Body, to_bytes};
use axum::http::Request;
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use super::*;
use crate::driver::{DriverParts, DriverSettings};
use crate::mount::MountExecutor;
use crate::mountpoint::MountpointManager;
use crate::storage::BucketLifecycle;
use crate::test_support::{MemoryBucketStore, ScriptedRunner};

struct Plugin {
    _tmp: TempDir,
    root: Utf8PathBuf,
    app: Router,
}

impl Plugin {
    async fn call(&self, endpoint: &str, body: &str) -> (StatusCode, Option<String>, Value) {
        let request = Request::post(endpoint)
            .header(header::CONTENT_TYPE, "application/vnd.docker.plugins.v1.2+json")
            .body(Body::from(body.to_owned()))
            .unwrap_or_else(|err| panic!("request: {err}"));
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .unwrap_or_else(|err| panic!("call {endpoint}: {err}"));
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap_or_else(|err| panic!("body: {err}"));
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|err| panic!("json from {endpoint}: {err}"));
        (status, content_type, value)
    }
}

#[fixture]
async fn plugin() -> Plugin {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().join("gcstorage"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let parts = DriverParts {
        mountpoints: MountpointManager::new(root.clone()),
        buckets: BucketLifecycle::new(MemoryBucketStore::new(), "p"),
        mounter: MountExecutor::new(ScriptedRunner::succeeding(), "/key.json"),
        settings: DriverSettings::default(),
    };
    let (driver, _) = Driver::start(parts)
        .await
        .unwrap_or_else(|err| panic!("start: {err}"));
    Plugin {
        _tmp: tmp,
        root,
        app: router(Arc::new(driver)),
    }
}

#[rstest]
#[tokio::test]
async fn activate_announces_volume_driver(#[future(awt)] plugin: Plugin) {
    let (status, content_type, body) = plugin.call("/Plugin.Activate", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some(PLUGIN_CONTENT_TYPE));
    assert_eq!(body, json!({"Implements": ["VolumeDriver"]}));
}

#[rstest]
#[tokio::test]
async fn capabilities_report_global_scope(#[future(awt)] plugin: Plugin) {
    let (_, _, body) = plugin.call("/VolumeDriver.Capabilities", "{}").await;
    assert_eq!(body, json!({"Capabilities": {"Scope": "global"}}));
}

#[rstest]
#[tokio::test]
async fn lifecycle_over_http(#[future(awt)] plugin: Plugin) {
    let mountpoint = plugin.root.join("v1").join("_data").to_string();

    let (status, _, body) = plugin
        .call(
            "/VolumeDriver.Create",
            r#"{"Name":"v1","Opts":{"clean_cloud_bucket":"no"}}"#,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Err": ""}));

    let (_, _, listed) = plugin.call("/VolumeDriver.List", "").await;
    assert_eq!(
        listed,
        json!({"Volumes": [{"Name": "v1", "Mountpoint": mountpoint}], "Err": ""})
    );

    let (_, _, got) = plugin.call("/VolumeDriver.Get", r#"{"Name":"v1"}"#).await;
    assert_eq!(
        got,
        json!({
            "Volume": {
                "Name": "v1",
                "Mountpoint": mountpoint,
                "Status": {"bucket": "p_v1", "cleanup": "keep", "mounts": "0", "state": "registered"}
            },
            "Err": ""
        })
    );

    let (_, _, mounted) = plugin
        .call("/VolumeDriver.Mount", r#"{"Name":"v1","ID":"c1"}"#)
        .await;
    assert_eq!(mounted, json!({"Mountpoint": mountpoint, "Err": ""}));

    let (_, _, path) = plugin.call("/VolumeDriver.Path", r#"{"Name":"v1"}"#).await;
    assert_eq!(path, json!({"Mountpoint": mountpoint, "Err": ""}));

    let (status, _, _) = plugin
        .call("/VolumeDriver.Unmount", r#"{"Name":"v1","ID":"c1"}"#)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, _) = plugin.call("/VolumeDriver.Remove", r#"{"Name":"v1"}"#).await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, emptied) = plugin.call("/VolumeDriver.List", "{}").await;
    assert_eq!(emptied, json!({"Volumes": [], "Err": ""}));
}

#[rstest]
#[tokio::test]
async fn null_options_are_accepted(#[future(awt)] plugin: Plugin) {
    let (status, _, _) = plugin
        .call("/VolumeDriver.Create", r#"{"Name":"v1","Opts":null}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[rstest]
#[case("/VolumeDriver.Get", r#"{"Name":"ghost"}"#, "volume ghost not found")]
#[case("/VolumeDriver.Path", r#"{"Name":"ghost"}"#, "volume ghost not found")]
#[case("/VolumeDriver.Remove", r#"{"Name":"ghost"}"#, "volume ghost not found")]
#[case("/VolumeDriver.Create", r#"{"Name":""}"#, "invalid volume name")]
#[case(
    "/VolumeDriver.Create",
    r#"{"Name":"v1","Opts":{"size":"1G"}}"#,
    "invalid option size=1G"
)]
#[tokio::test]
async fn failures_answer_500_with_message(
    #[future(awt)] plugin: Plugin,
    #[case] endpoint: &str,
    #[case] body: &str,
    #[case] expected: &str,
) {
    let (status, _, reply_body) = plugin.call(endpoint, body).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = reply_body["Err"].as_str().unwrap_or_default();
    assert!(message.contains(expected), "unexpected Err: {message}");
}

#[rstest]
#[tokio::test]
async fn malformed_json_answers_400(#[future(awt)] plugin: Plugin) {
    let (status, _, body) = plugin.call("/VolumeDriver.Create", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["Err"].as_str().unwrap_or_default();
    assert!(message.starts_with("malformed request body"), "{message}");
}

#[rstest]
#[tokio::test]
async fn duplicate_create_reports_existing_volume(#[future(awt)] plugin: Plugin) {
    plugin.call("/VolumeDriver.Create", r#"{"Name":"v1"}"#).await;
    let (status, _, body) = plugin.call("/VolumeDriver.Create", r#"{"Name":"v1"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"Err": "volume v1 already exists"}));
}

#[tokio::test]
async fn bind_replaces_stale_socket_and_creates_directory() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let dir = Utf8PathBuf::from_path_buf(tmp.path().join("plugins"))
        .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
    let socket = dir.join("gcstorage.sock");

    let first = bind(&socket).unwrap_or_else(|err| panic!("first bind: {err}"));
    drop(first);
    assert!(socket.exists(), "socket file outlives the listener");

    let second = bind(&socket).unwrap_or_else(|err| panic!("rebind: {err}"));
    drop(second);
}
