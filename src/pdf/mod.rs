//! PDF processing layer
//!
//! This module opens PDF documents with lopdf and lists their embedded images
//! in the order the document stores them.

mod document;
mod embedded;
mod filters;

pub use document::{ImageRef, Page, PdfDocument};
pub use embedded::{EmbeddedFormat, EmbeddedImage};
