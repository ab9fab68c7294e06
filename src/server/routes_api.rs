use crate::server::AppContext;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use scenestream_transcode::profile::profiles;
use serde::Serialize;

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health))
        .route("/qualities", get(list_qualities))
}

async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": ctx.store.len(),
    }))
}

#[derive(Serialize)]
struct QualityInfo {
    label: &'static str,
    width: u32,
    height: u32,
    video_bitrate_kbps: u32,
    max_rate_kbps: u32,
    buffer_size_kbps: u32,
    audio_bitrate_kbps: u32,
    audio_sample_rate: u32,
    bandwidth: u64,
}

async fn list_qualities() -> impl IntoResponse {
    let qualities: Vec<QualityInfo> = profiles()
        .iter()
        .map(|p| QualityInfo {
            label: p.quality.label(),
            width: p.width,
            height: p.height,
            video_bitrate_kbps: p.video_bitrate_kbps,
            max_rate_kbps: p.max_rate_kbps,
            buffer_size_kbps: p.buffer_size_kbps,
            audio_bitrate_kbps: p.audio_bitrate_kbps,
            audio_sample_rate: p.audio_sample_rate,
            bandwidth: p.bandwidth_bps(),
        })
        .collect();
    Json(qualities)
}
