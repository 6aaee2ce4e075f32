//! cloudflared-connector - provisions the shared cloudflared connector for a
//! Cloudflare tunnel ingress controller
//!
//! The connector is a single Deployment per namespace that runs `cloudflared`
//! with a freshly issued tunnel token and, optionally, a custom CA trust pool.
//! Provisioning only guards first-time creation; updates, scaling and deletion
//! of the Deployment are left to other tooling.
//!
//! # Modules
//!
//! - [`trust_pool`] - Resolve CA trust pool options into a volume and mount
//! - [`provisioner`] - Idempotent connector provisioning against the cluster
//! - [`workload`] - Connector Deployment manifest
//! - [`credentials`] - Tunnel token sources (Cloudflare API)
//! - [`config`] - Connector image and replica settings
//! - [`retry`] - Backoff for re-running provisioning
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod provisioner;
pub mod retry;
pub mod trust_pool;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
