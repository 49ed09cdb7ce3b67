//! Profile Photo Server Library
//!
//! Finds the profile photo in a PDF: the first embedded image, in
//! (page, image) order, that contains a human face.
//!
//! - [`pdf`]: opens documents and lists their embedded images
//! - [`face`]: face detection behind the [`FaceDetector`] trait
//! - [`selection`]: the short-circuiting search over a document
//! - [`http`] and [`server`]: JSON over HTTP and MCP over stdio

pub mod config;
pub mod error;
pub mod face;
pub mod http;
pub mod pdf;
pub mod selection;
pub mod server;
pub mod source;

pub use config::{ServerConfig, Transport};
pub use error::{Error, Result};
pub use face::{CascadeDetector, CascadeModel, DetectionParams, FaceDetector, FaceRegion};
pub use selection::{Candidate, ProfilePhotoSelector, SelectedImage, SelectionOutcome};
pub use server::{
    build_selector, run_server, run_server_with_config, ErrorResponse, ExtractPhotoParams,
    ExtractPhotoResponse, PhotoServer,
};
