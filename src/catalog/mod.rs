//! Fjall-based catalog of mirrored providers and download jobs.
//!
//! The catalog is the durable source of truth: one row per provider archive
//! identity, plus jobs and job items for the pre-load pipeline. Object-store
//! keys only ever enter or leave through a catalogued row, which is what keeps
//! blobs and metadata from drifting apart.

pub mod error;
pub mod models;
pub mod partitions;
pub mod store;

pub use error::{CatalogError, Result};
pub use models::{ItemStatus, Job, JobItem, JobStatus, ProviderIdentity, ProviderRecord};
pub use store::{CatalogStats, CatalogStore, ProviderFilter};
