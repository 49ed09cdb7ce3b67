//! Server configuration

use crate::error::{Error, Result};
use crate::face::DetectionParams;
use crate::source::Staging;
use std::path::PathBuf;

/// Default cap on request bodies (50 MiB)
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 50 * 1024 * 1024;

/// How clients reach the selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Transport {
    /// JSON over HTTP
    #[default]
    Http,
    /// MCP over stdin/stdout
    Stdio,
}

/// Runtime configuration for the profile photo server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the JSON cascade model
    pub model_path: PathBuf,
    /// Address to bind for the HTTP transport
    pub host: String,
    /// Port to bind for the HTTP transport
    pub port: u16,
    pub transport: Transport,
    /// Multi-scale detection settings
    pub detection: DetectionParams,
    /// Directory to stage input documents in; `None` parses from memory
    pub stage_dir: Option<PathBuf>,
    /// Largest accepted HTTP request body in bytes
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("haarcascade_frontalface_default.json"),
            host: "0.0.0.0".to_string(),
            port: 5000,
            transport: Transport::Http,
            detection: DetectionParams::default(),
            stage_dir: None,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl ServerConfig {
    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;

        if self.max_request_bytes == 0 {
            return Err(Error::Config {
                reason: "max request bytes must be positive".to_string(),
            });
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config {
                reason: "host must not be empty".to_string(),
            });
        }
        if let Some(dir) = &self.stage_dir {
            if !dir.is_dir() {
                return Err(Error::Config {
                    reason: format!("stage directory {} does not exist", dir.display()),
                });
            }
        }
        Ok(())
    }

    /// Socket address string for the HTTP listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn staging(&self) -> Staging {
        match &self.stage_dir {
            Some(dir) => Staging::TempDir(dir.clone()),
            None => Staging::Memory,
        }
    }
}
