//! Framework configuration: default action names, pagination limits, error transform hook.

use crate::error::ApiError;
use crate::response::ErrorObject;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Converts errors that are not structured request errors into their wire form.
pub type ErrorTransform = Arc<dyn Fn(&ApiError) -> ErrorObject + Send + Sync>;

pub const DEFAULT_MAX_LIMIT: u64 = 10_000;
pub const DEFAULT_LIMIT: u64 = 100;

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub default_index_action: String,
    pub default_save_action: String,
    pub default_delete_action: String,
    pub default_limit: u64,
    pub max_limit: u64,
    /// Prefix the host mounts the API under; stripped from incoming paths before endpoint lookup.
    pub engine_path: Option<String>,
    /// Serializer used when the data has no serializer of its own.
    pub default_serializer: Option<String>,
    #[serde(skip)]
    pub transform_error: Option<ErrorTransform>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            default_index_action: "index".into(),
            default_save_action: "update".into(),
            default_delete_action: "delete".into(),
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
            engine_path: None,
            default_serializer: None,
            transform_error: None,
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("default_index_action", &self.default_index_action)
            .field("default_save_action", &self.default_save_action)
            .field("default_delete_action", &self.default_delete_action)
            .field("default_limit", &self.default_limit)
            .field("max_limit", &self.max_limit)
            .field("engine_path", &self.engine_path)
            .field("default_serializer", &self.default_serializer)
            .field("transform_error", &self.transform_error.is_some())
            .finish()
    }
}

impl ApiConfig {
    /// Defaults overridden by `ACTION_API_*` env vars (a `.env` file is read first when present).
    /// Unparseable numbers keep the default.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = ApiConfig::default();
        if let Ok(v) = std::env::var("ACTION_API_DEFAULT_INDEX_ACTION") {
            config.default_index_action = v;
        }
        if let Ok(v) = std::env::var("ACTION_API_DEFAULT_SAVE_ACTION") {
            config.default_save_action = v;
        }
        if let Ok(v) = std::env::var("ACTION_API_DEFAULT_DELETE_ACTION") {
            config.default_delete_action = v;
        }
        if let Some(n) = env_u64("ACTION_API_DEFAULT_LIMIT") {
            config.default_limit = n;
        }
        if let Some(n) = env_u64("ACTION_API_MAX_LIMIT") {
            config.max_limit = n;
        }
        config.engine_path = std::env::var("ACTION_API_ENGINE_PATH").ok().filter(|s| !s.is_empty());
        config.default_serializer = std::env::var("ACTION_API_DEFAULT_SERIALIZER").ok().filter(|s| !s.is_empty());
        config
    }

    pub fn with_transform_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ApiError) -> ErrorObject + Send + Sync + 'static,
    {
        self.transform_error = Some(Arc::new(f));
        self
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric config value");
            None
        }
    }
}
