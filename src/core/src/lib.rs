//! Slipway Core - Foundational Types and Abstractions
//!
//! This module provides the foundational types shared across the Slipway
//! multi-service image build workspace: the error taxonomy, composition
//! image descriptors, and target-architecture vocabulary.

pub mod arch;
pub mod descriptor;
pub mod error;

// Re-export commonly used types
pub use arch::{docker_platform, Arch};
pub use descriptor::{BuildSpec, ImageDescriptor, ImageSource};
pub use error::{Result, SlipwayError};

/// Slipway version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
