use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub max_import_bytes: u64,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            workspace: None,
            db: None,
            max_import_bytes: config.max_import_bytes,
        }
    }
}
