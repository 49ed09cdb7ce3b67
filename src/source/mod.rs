//! Input payload decoding and staging

pub mod decoder;
pub mod staging;

pub use decoder::{decode_base64, encode_base64};
pub use staging::{StagedFile, Staging};
