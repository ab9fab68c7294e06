//! Scene-to-file resolution.
//!
//! The transcoding core only needs a filesystem path and, ideally, a
//! duration for a scene id. Paths come back already translated for this
//! host; nothing here rewrites them.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use scenestream_common::{Error, Result, SceneId};
use scenestream_transcode::SourceMedia;
use serde::Deserialize;
use serde_json::json;

use crate::config::{SourceConfig, SourceKind};

/// Timeout for library lookups
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves scene ids to source media.
#[async_trait::async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, scene: &SceneId) -> Result<SourceMedia>;
}

/// Create the resolver selected by config
pub fn create_resolver(config: &SourceConfig) -> Box<dyn SourceResolver> {
    match config.kind {
        SourceKind::Static => Box::new(StaticSourceResolver::from_config(config)),
        SourceKind::Stash => Box::new(StashSourceResolver::new(
            config.url.clone().unwrap_or_default(),
            config.api_key.clone(),
        )),
    }
}

/// Fixed scene table from the config file.
#[derive(Debug, Default)]
pub struct StaticSourceResolver {
    scenes: HashMap<SceneId, SourceMedia>,
}

impl StaticSourceResolver {
    pub fn from_config(config: &SourceConfig) -> Self {
        let scenes = config
            .scenes
            .iter()
            .map(|s| {
                (
                    SceneId::new(s.id.clone()),
                    SourceMedia {
                        path: s.path.clone(),
                        duration_secs: s.duration_secs,
                    },
                )
            })
            .collect();
        Self { scenes }
    }

    pub fn insert(&mut self, scene: SceneId, media: SourceMedia) {
        self.scenes.insert(scene, media);
    }
}

#[async_trait::async_trait]
impl SourceResolver for StaticSourceResolver {
    async fn resolve(&self, scene: &SceneId) -> Result<SourceMedia> {
        let media = self
            .scenes
            .get(scene)
            .cloned()
            .ok_or_else(|| Error::not_found("scene", scene))?;
        warn_if_missing(scene, &media);
        Ok(media)
    }
}

/// Looks scenes up in a Stash library over GraphQL.
pub struct StashSourceResolver {
    client: Client,
    url: String,
    api_key: Option<String>,
}

const FIND_SCENE_QUERY: &str =
    "query FindScene($id: ID!) { findScene(id: $id) { id files { path duration } } }";

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<FindSceneData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindSceneData {
    find_scene: Option<StashScene>,
}

#[derive(Deserialize)]
struct StashScene {
    #[serde(default)]
    files: Vec<StashFile>,
}

#[derive(Deserialize)]
struct StashFile {
    path: String,
    duration: Option<f64>,
}

impl StashSourceResolver {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self {
            client,
            url,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl SourceResolver for StashSourceResolver {
    async fn resolve(&self, scene: &SceneId) -> Result<SourceMedia> {
        let mut request = self.client.post(&self.url).json(&json!({
            "query": FIND_SCENE_QUERY,
            "variables": { "id": scene.as_str() },
        }));
        if let Some(ref key) = self.api_key {
            request = request.header("ApiKey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::tool("stash", format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::tool(
                "stash",
                format!("unexpected status {}", response.status()),
            ));
        }
        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| Error::tool("stash", format!("invalid response: {e}")))?;

        if let Some(err) = body.errors.first() {
            return Err(Error::tool("stash", err.message.clone()));
        }
        let file = body
            .data
            .and_then(|d| d.find_scene)
            .and_then(|s| s.files.into_iter().next())
            .ok_or_else(|| Error::not_found("scene", scene))?;

        let media = SourceMedia {
            path: file.path.into(),
            duration_secs: file.duration.filter(|d| d.is_finite() && *d > 0.0),
        };
        warn_if_missing(scene, &media);
        Ok(media)
    }
}

fn warn_if_missing(scene: &SceneId, media: &SourceMedia) {
    if !media.path.exists() {
        tracing::warn!(scene_id = %scene, "Source file does not exist: {:?}", media.path);
    }
}
