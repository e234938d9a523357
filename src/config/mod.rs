//! Configuration management for the HealthDocs service
//!
//! Handles server binding, case database location, transcription executor
//! credentials and the optional stage catalog override.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Base64 inflates audio by a third; this admits roughly 35 MiB recordings
pub const DEFAULT_MAX_UPLOAD_MB: usize = 48;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Case database configuration
    pub database: DatabaseConfig,
    /// Remote language model configuration
    pub executor: ExecutorConfig,
    /// Optional JSON file with a custom stage catalog
    /// If None, the built-in seven-stage catalog is used
    pub stages_file: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
    /// Request body ceiling for stage runs carrying base64 audio, in MiB
    pub max_upload_mb: usize,
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Storage configuration for the case database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding healthdocs.db (default: "data")
    pub data_dir: String,
}

impl DatabaseConfig {
    /// Full path of the SQLite case database
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("healthdocs.db")
    }
}

/// Gemini streaming endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// API key sent with every request; empty means every run fails visibly
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Base URL of the generative language API
    pub base_url: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("GEMINI_API_KEY")
                .or_else(|_| std::env::var("API_KEY"))
                .unwrap_or_default(),
            base_url: std::env::var("HEALTHDOCS_GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string()),
            temperature: 0.1,
            top_p: 0.95,
            top_k: 40,
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("HEALTHDOCS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("HEALTHDOCS_PORT")
                    .unwrap_or_else(|_| "3005".to_string())
                    .parse()
                    .unwrap_or(3005),
                max_upload_mb: std::env::var("HEALTHDOCS_MAX_UPLOAD_MB")
                    .ok()
                    .and_then(|mb| mb.parse().ok())
                    .unwrap_or(DEFAULT_MAX_UPLOAD_MB),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("HEALTHDOCS_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
            },
            executor: ExecutorConfig::default(),
            stages_file: std::env::var("HEALTHDOCS_STAGES_FILE").ok(),
        }
    }
}
