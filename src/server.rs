//! Server wiring for the profile photo selector
//!
//! The selector is reachable as a JSON HTTP endpoint (see [`crate::http`]) or
//! as an MCP tool over stdio. Both transports share the request and response
//! shapes defined here.

use crate::config::{ServerConfig, Transport};
use crate::error::Error;
use crate::face::CascadeDetector;
use crate::selection::{ProfilePhotoSelector, SelectedImage, SelectionOutcome};
use crate::source::encode_base64;
use anyhow::Result;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message returned when no embedded image contains a face
pub const NO_FACE_MESSAGE: &str = "No face found in any images";

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ExtractPhotoParams {
    /// Base64 encoded PDF document
    #[serde(default)]
    pub pdf_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractPhotoResponse {
    /// Encoded image bytes as stored in the document, base64 encoded
    pub image_base64: String,
    pub mime_type: String,
    /// Page number (1-indexed)
    pub page: usize,
    /// Image index within the page (0-indexed)
    pub index: usize,
}

impl From<&SelectedImage> for ExtractPhotoResponse {
    fn from(image: &SelectedImage) -> Self {
        Self {
            image_base64: encode_base64(&image.data),
            mime_type: image.mime_type().to_string(),
            page: image.page + 1,
            index: image.index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Run a selection on the blocking thread pool
pub async fn select_in_background(
    selector: ProfilePhotoSelector,
    pdf_base64: Option<String>,
) -> crate::Result<SelectionOutcome> {
    tokio::task::spawn_blocking(move || selector.select_from_base64(pdf_base64.as_deref()))
        .await
        .map_err(|e| Error::Internal {
            reason: format!("selection worker failed: {}", e),
        })?
}

/// Load the detection model and build the selector described by `config`
pub fn build_selector(config: &ServerConfig) -> crate::Result<ProfilePhotoSelector> {
    config.validate()?;
    let detector = CascadeDetector::from_file(&config.model_path, config.detection.clone())?;
    Ok(ProfilePhotoSelector::new(Arc::new(detector)).with_staging(config.staging()))
}

// ============================================================================
// MCP transport
// ============================================================================

/// Profile photo MCP server
#[derive(Clone)]
pub struct PhotoServer {
    selector: ProfilePhotoSelector,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl PhotoServer {
    pub fn new(selector: ProfilePhotoSelector) -> Self {
        Self {
            selector,
            tool_router: Self::tool_router(),
        }
    }

    /// Pick the first embedded image that contains a face
    #[tool(
        description = "Find the profile photo in a PDF: returns the first embedded image, in page order, that contains a human face.

Input: {\"pdf_base64\": \"<base64 encoded PDF>\"}. Output: {\"image_base64\", \"mime_type\", \"page\" (1-indexed), \"index\"} or {\"error\"}."
    )]
    async fn extract_profile_photo(
        &self,
        Parameters(params): Parameters<ExtractPhotoParams>,
    ) -> String {
        let response = match self.process_extract_profile_photo(params).await {
            Ok(SelectionOutcome::Found(image)) => {
                serde_json::to_value(ExtractPhotoResponse::from(&image))
            }
            Ok(SelectionOutcome::NotFound) => serde_json::to_value(ErrorResponse::new(NO_FACE_MESSAGE)),
            Err(e) => {
                tracing::warn!(error = %e, "extract_profile_photo failed");
                serde_json::to_value(ErrorResponse::new(e.client_message()))
            }
        };

        response
            .and_then(|value| serde_json::to_string_pretty(&value))
            .unwrap_or_default()
    }
}

impl PhotoServer {
    async fn process_extract_profile_photo(
        &self,
        params: ExtractPhotoParams,
    ) -> crate::Result<SelectionOutcome> {
        select_in_background(self.selector.clone(), params.pdf_base64).await
    }
}

#[tool_handler]
impl ServerHandler for PhotoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Profile photo server finds the first embedded image in a PDF that contains a face."
                    .into(),
            ),
        }
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Run the server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the server with full configuration on the configured transport
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    let selector = build_selector(&config)?;

    match config.transport {
        Transport::Http => crate::http::serve(&config, selector).await,
        Transport::Stdio => {
            let server = PhotoServer::new(selector);
            tracing::info!("Profile photo MCP server ready, waiting for connections...");

            let service = server.serve(rmcp::transport::io::stdio()).await?;
            service.waiting().await?;
            Ok(())
        }
    }
}
