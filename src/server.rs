//! HTTP surface: listing, upload, playback and deletion of stored media.
//!
//! | Route                  | Behaviour                                           |
//! |------------------------|-----------------------------------------------------|
//! | `GET /`                | JSON array of stored names, sorted                  |
//! | `POST /upload`         | multipart form with a `file` field, then `303 /`    |
//! | `GET /video/<name>`    | the resource, honouring `Range` and conditionals    |
//! | `POST /delete/<name>`  | removes the resource if present, then `303 /`       |

use std::io;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use multer::{Constraints, Multipart, SizeLimit};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::name;
use crate::store::{DiskStore, FileStore};
use crate::Ranged;

const UPLOAD_FIELD: &str = "file";

/// Shared handler state.
pub struct AppState<S> {
    store: Arc<S>,
    config: Arc<Config>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        AppState { store: Arc::clone(&self.store), config: Arc::clone(&self.config) }
    }
}

/// Builds the application router over `store`.
pub fn router<S: FileStore>(store: S, config: Config) -> Router {
    let state = AppState { store: Arc::new(store), config: Arc::new(config) };

    Router::new()
        .route("/", get(index::<S>))
        .route("/upload", post(upload::<S>))
        .route("/video/{*name}", get(video::<S>))
        .route("/delete/{*name}", post(delete::<S>))
        // uploads are bounded by the multipart constraints instead
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Opens the store, binds the listener and serves until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let store = DiskStore::create(&config.store_root).await?;
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;

    info!(
        "serving {} on http://{}",
        store.root().display(),
        listener.local_addr().unwrap_or(config.bind),
    );

    axum::serve(listener, router(store, config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn index<S: FileStore>(State(state): State<AppState<S>>) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(state.store.list().await?))
}

async fn upload<S: FileStore>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Redirect, AppError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or(multer::Error::NoMultipart)?;
    let boundary = multer::parse_boundary(content_type)?;

    let constraints = Constraints::new()
        .size_limit(SizeLimit::new().whole_stream(state.config.max_upload_bytes));
    let mut multipart = Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let Some(original) = field.file_name().filter(|n| !n.is_empty()).map(str::to_owned) else {
            debug!("upload without a filename, skipping");
            continue;
        };
        if !name::has_allowed_extension(&original, &state.config.allowed_extensions) {
            warn!("upload {:?} has a disallowed extension, skipping", original);
            continue;
        }
        let Some(filename) = name::secure_filename(&original) else {
            warn!("upload name {:?} has no usable characters, skipping", original);
            continue;
        };

        let chunks = field.map(|chunk| chunk.map_err(io::Error::other));
        state.store.save(&filename, chunks).await?;
    }

    Ok(Redirect::to("/"))
}

async fn video<S: FileStore>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if !name::is_safe(&name) {
        debug!("refusing unsafe video name {:?}", name);
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let Some(body) = state.store.open(&name).await? else {
        debug!("video {:?} not found", name);
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    let content_type = mime_guess::from_path(&name).first_raw().map(str::to_owned);
    let ranged = Ranged::from_headers(&headers, body, content_type).chunk_size(state.config.chunk_size);

    Ok(ranged.into_response())
}

async fn delete<S: FileStore>(
    State(state): State<AppState<S>>,
    Path(name): Path<String>,
) -> Result<Redirect, AppError> {
    if !state.store.delete(&name).await? {
        debug!("nothing to delete for {:?}", name);
    }
    Ok(Redirect::to("/"))
}

