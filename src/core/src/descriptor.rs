//! Image descriptors produced by the composition parser.
//!
//! A composition names one image per service; each is either an external
//! reference to pull or a local build rooted somewhere inside the uploaded
//! project archive. The composition parser itself lives outside this
//! workspace; these types are its output contract.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a service's image is obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSource {
    /// Pull an already-built image from a registry.
    External {
        /// Image reference (e.g., "alpine", "ghcr.io/org/app:v1").
        image: String,
    },
    /// Build from a context inside the project archive.
    Build(BuildSpec),
}

/// Build parameters for a locally built service image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Context root, relative to the archive root. `.` means the root itself.
    pub context: String,
    /// Dockerfile path inside the context, when not `<context>/Dockerfile`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    /// Build arguments forwarded to the daemon.
    #[serde(default)]
    pub args: HashMap<String, String>,
    /// Labels applied to the built image.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Tag for the built image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// One service's image descriptor, as emitted by the composition parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Service name, unique within the composition.
    pub service_name: String,
    /// External reference or local build parameters.
    pub source: ImageSource,
}

impl ImageDescriptor {
    /// Descriptor for an external (pulled) image.
    pub fn external(service_name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            source: ImageSource::External {
                image: image.into(),
            },
        }
    }

    /// Descriptor for a locally built image.
    pub fn build(service_name: impl Into<String>, spec: BuildSpec) -> Self {
        Self {
            service_name: service_name.into(),
            source: ImageSource::Build(spec),
        }
    }

    /// True when the image is pulled rather than built.
    pub fn is_external(&self) -> bool {
        matches!(self.source, ImageSource::External { .. })
    }
}
