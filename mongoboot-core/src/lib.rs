//! Core library for Mongoboot.
//!
//! This crate provides the manifest model and the idempotent bootstrap
//! engine, independent of any concrete database driver. The driver-backed
//! catalog lives in the `mongoboot` binary crate.
//!
//! # Usage
//!
//! ```no_run
//! use mongoboot_core::{engine, Manifest, MemoryCatalog, Secrets};
//!
//! # async fn run() -> mongoboot_core::Result<()> {
//! let manifest = Manifest::from_path("manifests/lms.json")?;
//! let secrets = Secrets::from_env(&manifest)?;
//!
//! let catalog = MemoryCatalog::default();
//! let report = engine::apply(&manifest, &secrets, &catalog).await?;
//! println!("created {} collections", report.created_collections.len());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod secrets;

// Re-export commonly used types at crate root
pub use catalog::{Catalog, IndexState, MemoryCatalog};
pub use engine::Report;
pub use error::{BootstrapError, Result};
pub use manifest::Manifest;
pub use secrets::Secrets;
