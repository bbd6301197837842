//! The container daemon seam.
//!
//! The daemon itself is an external collaborator; this module defines the
//! interface the build core drives it through: version probing, building
//! from a tar context, pulling external images, and manifest media-type
//! lookups for locally known images. Implementations must be safe under
//! concurrent use - one shared handle serves every task worker.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use slipway_core::error::Result;

use crate::metadata::RegistryCredentials;

/// Daemon version information.
#[derive(Debug, Clone)]
pub struct DaemonVersion {
    /// API version string, e.g. "1.41".
    pub api_version: String,
}

impl DaemonVersion {
    /// True when the API version is at least `major.minor`. Unparseable
    /// versions compare as too old.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        let mut parts = self.api_version.split('.');
        let parsed = (
            parts.next().and_then(|p| p.parse::<u32>().ok()),
            parts.next().and_then(|p| p.parse::<u32>().ok()),
        );
        match parsed {
            (Some(got_major), Some(got_minor)) => {
                (got_major, got_minor) >= (major, minor)
            }
            _ => false,
        }
    }
}

/// Options for one build, assembled by the driver.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Target platform (e.g. "linux/arm/v7"), when the platform policy
    /// allows it.
    pub platform: Option<String>,
    /// Build arguments.
    pub buildargs: HashMap<String, String>,
    /// Image labels.
    pub labels: HashMap<String, String>,
    /// Image tag (`-t`).
    pub tag: Option<String>,
    /// Dockerfile location inside the context, when not the default.
    pub dockerfile: Option<String>,
    /// Per-registry credentials forwarded to the daemon.
    pub registry_config: HashMap<String, RegistryCredentials>,
    /// Host binds (e.g. the read-only secrets directory).
    pub binds: Vec<String>,
    /// Caller-provided raw daemon options, passed through untouched.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Events emitted by the daemon while a build runs. The stream ends with
/// `Success` or `Failure`.
#[derive(Debug, Clone)]
pub enum BuildEvent {
    /// A raw build output line.
    Output(String),
    /// An intermediate layer was committed.
    Layer(String),
    /// A base image reference was resolved during the build.
    BaseImage { repository: String, tag: String },
    /// The build completed; `image_id` names the final image.
    Success { image_id: String },
    /// The build failed. Previously reported layers remain inspectable.
    Failure { message: String },
}

/// Events emitted while pulling an external image.
#[derive(Debug, Clone)]
pub enum PullEvent {
    /// A progress line.
    Progress(String),
    /// The pull completed.
    Done,
    /// The pull failed.
    Failure { message: String },
}

/// Basic facts about a locally stored image.
#[derive(Debug, Clone)]
pub struct ImageInspect {
    pub id: String,
    pub tags: Vec<String>,
}

/// Interface to the container daemon.
#[async_trait]
pub trait Daemon: Send + Sync {
    /// Daemon version, including the API version the platform policy keys on.
    async fn version(&self) -> Result<DaemonVersion>;

    /// Start a build from a tar context. Events arrive on the returned
    /// channel; dropping the receiver cancels the build.
    async fn build(
        &self,
        options: BuildOptions,
        context: Vec<u8>,
    ) -> Result<mpsc::Receiver<BuildEvent>>;

    /// Pull an image, optionally authenticating against its registry.
    async fn pull(
        &self,
        image_ref: &str,
        auth: Option<RegistryCredentials>,
    ) -> Result<mpsc::Receiver<PullEvent>>;

    /// Inspect a locally stored image.
    async fn inspect_image(&self, name: &str) -> Result<ImageInspect>;

    /// Manifest media type of a locally cached image, when known.
    async fn distribution_media_type(&self, image_ref: &str) -> Result<Option<String>>;
}
