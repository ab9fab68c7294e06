//! Session lifecycle and HLS delivery routes.
//!
//! Manifest and segment URLs are relative to the master manifest, so a
//! player only ever needs the `master_url` returned at creation. A key
//! presented as `?api_key=` is echoed onto those relative URLs.

use crate::server::auth::{ApiKeyQuery, AuthenticatedUser};
use crate::server::error::AppError;
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use scenestream_common::{Error, SceneId, SessionId};
use scenestream_transcode::profile::parse_qualities;
use scenestream_transcode::{NewSession, Quality, SegmentRef, SessionSnapshot, SessionState};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
const QUALITY_MANIFEST_NAME: &str = "index.m3u8";

pub fn session_routes() -> Router<AppContext> {
    Router::new()
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/seek", post(seek_session))
        .route("/sessions/:id/master.m3u8", get(master_manifest))
        .route("/sessions/:id/:quality/:file", get(quality_file))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub scene_id: String,
    #[serde(default)]
    pub start_offset: Option<f64>,
    #[serde(default)]
    pub qualities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    pub offset: f64,
}

/// Returned by create and seek.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub master_url: String,
    pub qualities: Vec<Quality>,
    pub state: SessionState,
    pub start_offset: f64,
}

impl From<&SessionSnapshot> for SessionResponse {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id,
            master_url: format!("/api/sessions/{}/master.m3u8", snapshot.session_id),
            qualities: snapshot.available_qualities(),
            state: snapshot.state,
            start_offset: snapshot.start_offset,
        }
    }
}

/// Malformed ids can never name a session.
fn parse_session_id(raw: &str) -> Result<SessionId, AppError> {
    raw.parse()
        .map_err(|_| AppError(Error::not_found("session", raw)))
}

fn parse_quality(raw: &str) -> Result<Quality, AppError> {
    raw.parse()
        .map_err(|_| AppError(Error::not_found("quality", raw)))
}

fn playlist_response(body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

async fn create_session(
    State(ctx): State<AppContext>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let qualities = match req.qualities {
        Some(labels) => parse_qualities(&labels)?,
        None => Vec::new(),
    };
    let scene_id = SceneId::new(req.scene_id);
    let source = ctx.resolver.resolve(&scene_id).await?;

    let snapshot = ctx
        .store
        .create_session(NewSession {
            scene_id,
            source,
            user_id,
            start_offset_secs: req.start_offset.unwrap_or(0.0),
            qualities,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(SessionResponse::from(&snapshot))))
}

async fn list_sessions(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.store.list().await)
}

async fn get_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let id = parse_session_id(&id)?;
    Ok(Json(ctx.store.get(id).await?))
}

async fn delete_session(State(ctx): State<AppContext>, Path(id): Path<String>) -> impl IntoResponse {
    let terminated = match id.parse::<SessionId>() {
        Ok(id) => ctx.store.terminate(id).await,
        Err(_) => false,
    };
    Json(serde_json::json!({ "terminated": terminated }))
}

async fn seek_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(req): Json<SeekRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let id = parse_session_id(&id)?;
    let outcome = ctx.seek.handle_seek(id, req.offset).await?;
    Ok(Json(SessionResponse::from(&outcome.snapshot)))
}

async fn master_manifest(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    query: Option<Query<ApiKeyQuery>>,
) -> Result<Response, AppError> {
    let id = parse_session_id(&id)?;
    let api_key = query.and_then(|Query(q)| q.api_key);
    let body = ctx.manifests.master(id, api_key.as_deref()).await?;
    Ok(playlist_response(body))
}

/// Either the quality manifest or one of its segments.
async fn quality_file(
    State(ctx): State<AppContext>,
    Path((id, quality, file)): Path<(String, String, String)>,
    query: Option<Query<ApiKeyQuery>>,
) -> Result<Response, AppError> {
    let id = parse_session_id(&id)?;
    let quality = parse_quality(&quality)?;

    if file == QUALITY_MANIFEST_NAME {
        let api_key = query.and_then(|Query(q)| q.api_key);
        let body = ctx
            .manifests
            .quality(id, quality, api_key.as_deref())
            .await?;
        return Ok(playlist_response(body));
    }

    let segment =
        SegmentRef::parse(&file).ok_or_else(|| AppError(Error::not_found("segment", &file)))?;
    let path = ctx.segments.get_segment(id, quality, segment).await?;

    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError(Error::not_found("segment", segment))
        } else {
            AppError(Error::from(e))
        }
    })?;
    let len = file.metadata().await.map_err(Error::from)?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE.to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        body,
    )
        .into_response())
}
