//! Volume plugin protocol over HTTP on a unix socket.
//!
//! Every endpoint is a `POST` with a JSON body. Bodies are decoded without
//! checking the content type because the runtime labels them with its own
//! vendor media type. Operation failures answer 500 with the message in
//! `Err`; undecodable bodies answer 400.

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::UnixListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::command::CommandRunner;
use crate::driver::{CAPABILITY_SCOPE, Driver, DriverError};
use crate::storage::BucketStore;

mod types;

pub use types::{
    ActivateResponse, Capabilities, CapabilitiesResponse, CreateRequest, ErrResponse, GetResponse,
    ListResponse, MountRequest, MountpointResponse, NameRequest, VolumeInfo,
};

/// Media type of every response body.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// Errors raised while preparing the listening socket.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Raised when the socket directory or a stale socket cannot be handled.
    #[error("failed to prepare socket {path}: {source}")]
    Prepare {
        /// Socket path.
        path: String,
        /// Underlying error.
        source: io::Error,
    },
    /// Raised when binding the socket fails.
    #[error("failed to bind socket {path}: {source}")]
    Bind {
        /// Socket path.
        path: String,
        /// Underlying error.
        source: io::Error,
    },
    /// Raised when the server stops with an I/O error.
    #[error("plugin server failed: {0}")]
    Serve(#[source] io::Error),
}

type SharedDriver<S, R> = Arc<Driver<S, R>>;

/// Builds the plugin router around `driver`.
pub fn router<S, R>(driver: SharedDriver<S, R>) -> Router
where
    S: BucketStore + 'static,
    R: CommandRunner + 'static,
{
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create::<S, R>))
        .route("/VolumeDriver.Remove", post(remove::<S, R>))
        .route("/VolumeDriver.Path", post(path::<S, R>))
        .route("/VolumeDriver.Mount", post(mount::<S, R>))
        .route("/VolumeDriver.Unmount", post(unmount::<S, R>))
        .route("/VolumeDriver.Get", post(get::<S, R>))
        .route("/VolumeDriver.List", post(list::<S, R>))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .layer(TraceLayer::new_for_http())
        .with_state(driver)
}

/// Prepares `path` for listening: creates its directory and removes a
/// stale socket left by a previous run, then binds.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the directory cannot be prepared or the
/// bind fails.
pub fn bind(path: &Utf8Path) -> Result<UnixListener, ProtocolError> {
    let prepare = |source: io::Error| ProtocolError::Prepare {
        path: path.to_string(),
        source,
    };
    let parent = path
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path.file_name().ok_or_else(|| {
        prepare(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path has no file name",
        ))
    })?;
    Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(prepare)?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(prepare)?;
    match dir.remove_file(file_name) {
        Ok(()) => warn!(socket = %path, "removed stale socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(prepare(err)),
    }
    let listener = UnixListener::bind(path).map_err(|source| ProtocolError::Bind {
        path: path.to_string(),
        source,
    })?;
    info!(socket = %path, "listening");
    Ok(listener)
}

/// Serves `app` on `listener` until `shutdown` resolves, then drains
/// in-flight requests.
///
/// # Errors
///
/// Returns [`ProtocolError::Serve`] when the server fails.
pub async fn serve(
    listener: UnixListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ProtocolError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ProtocolError::Serve)
}

fn reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (status, [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], bytes).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

fn failure(err: &DriverError) -> Response {
    warn!(error = %err, kind = ?err.kind(), "request failed");
    reply(
        StatusCode::INTERNAL_SERVER_ERROR,
        &ErrResponse {
            err: err.to_string(),
        },
    )
}

fn decode<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        reply(
            StatusCode::BAD_REQUEST,
            &ErrResponse {
                err: format!("malformed request body: {err}"),
            },
        )
    })
}

fn ok() -> Response {
    reply(StatusCode::OK, &ErrResponse { err: String::new() })
}

async fn activate() -> Response {
    reply(
        StatusCode::OK,
        &ActivateResponse {
            implements: vec!["VolumeDriver"],
        },
    )
}

async fn create<S: BucketStore, R: CommandRunner + 'static>(
    State(driver): State<SharedDriver<S, R>>,
    body: Bytes,
) -> Response {
    let request: CreateRequest = match decode(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let opts = request.opts.unwrap_or_default();
    match driver.create(&request.name, &opts).await {
        Ok(_) => ok(),
        Err(err) => failure(&err),
    }
}

async fn remove<S: BucketStore, R: CommandRunner + 'static>(
    State(driver): State<SharedDriver<S, R>>,
    body: Bytes,
) -> Response {
    let request: NameRequest = match decode(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.remove(&request.name).await {
        Ok(()) => ok(),
        Err(err) => failure(&err),
    }
}

async fn path<S: BucketStore, R: CommandRunner + 'static>(
    State(driver): State<SharedDriver<S, R>>,
    body: Bytes,
) -> Response {
    let request: NameRequest = match decode(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.path(&request.name) {
        Ok(mountpoint) => reply(
            StatusCode::OK,
            &MountpointResponse {
                mountpoint: mountpoint.to_string(),
                err: String::new(),
            },
        ),
        Err(err) => failure(&err),
    }
}

async fn mount<S: BucketStore, R: CommandRunner + 'static>(
    State(driver): State<SharedDriver<S, R>>,
    body: Bytes,
) -> Response {
    let request: MountRequest = match decode(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.mount(&request.name, &request.id).await {
        Ok(mountpoint) => reply(
            StatusCode::OK,
            &MountpointResponse {
                mountpoint: mountpoint.to_string(),
                err: String::new(),
            },
        ),
        Err(err) => failure(&err),
    }
}

async fn unmount<S: BucketStore, R: CommandRunner + 'static>(
    State(driver): State<SharedDriver<S, R>>,
    body: Bytes,
) -> Response {
    let request: MountRequest = match decode(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.unmount(&request.name, &request.id).await {
        Ok(()) => ok(),
        Err(err) => failure(&err),
    }
}

async fn get<S: BucketStore, R: CommandRunner + 'static>(
    State(driver): State<SharedDriver<S, R>>,
    body: Bytes,
) -> Response {
    let request: NameRequest = match decode(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match driver.get(&request.name) {
        Ok(record) => reply(
            StatusCode::OK,
            &GetResponse {
                volume: Some(VolumeInfo::detailed(&record)),
                err: String::new(),
            },
        ),
        Err(err) => failure(&err),
    }
}

async fn list<S: BucketStore, R: CommandRunner + 'static>(
    State(driver): State<SharedDriver<S, R>>,
) -> Response {
    let volumes = driver.list().iter().map(VolumeInfo::summary).collect();
    reply(
        StatusCode::OK,
        &ListResponse {
            volumes,
            err: String::new(),
        },
    )
}

async fn capabilities() -> Response {
    reply(
        StatusCode::OK,
        &CapabilitiesResponse {
            capabilities: Capabilities {
                scope: CAPABILITY_SCOPE,
            },
        },
    )
}

#[cfg(test)]
mod tests;
