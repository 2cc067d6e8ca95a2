//! Palaver core library
//!
//! Domain models, configuration, and the unified error type for the
//! attachment/avatar object store. Everything here is storage-agnostic;
//! the filesystem and database sides live in `palaver-storage` and
//! `palaver-db`.

pub mod config;
pub mod error;
pub mod models;

pub use config::{AttachmentConfig, DirectoryPolicy};
pub use error::AppError;
