//! Platform forwarding policy.
//!
//! Decides whether a build may pass the target `--platform` to the daemon:
//! old daemon APIs cannot accept it, and schema-1 base images carry no
//! platform information, so forcing a platform against them fails the build.

use std::sync::Arc;

use tokio::task::JoinSet;

use crate::daemon::{Daemon, DaemonVersion};
use crate::registry::MEDIA_TYPES_MANIFEST_V1;

/// Lowest daemon API version that accepts a build platform.
const PLATFORM_API: (u32, u32) = (1, 38);

/// Decide whether the target platform may be passed for a build using the
/// given resolved Dockerfile.
///
/// Base images whose manifest media type the daemon does not know are
/// assumed to be schema-2. Any schema-1 base image disables platform
/// forwarding for the whole build, with a warning enumerating both sets.
pub async fn platform_supported(
    daemon: Arc<dyn Daemon>,
    version: &DaemonVersion,
    dockerfile: &str,
) -> bool {
    if !version.at_least(PLATFORM_API.0, PLATFORM_API.1) {
        tracing::debug!(
            api_version = %version.api_version,
            "Daemon API too old for platform forwarding"
        );
        return false;
    }

    let references = from_images(dockerfile);
    if references.is_empty() {
        return true;
    }

    let mut lookups = JoinSet::new();
    for reference in references {
        let daemon = Arc::clone(&daemon);
        lookups.spawn(async move {
            let media_type = daemon
                .distribution_media_type(&reference)
                .await
                .ok()
                .flatten();
            (reference, media_type)
        });
    }

    let mut v1 = Vec::new();
    let mut v2 = Vec::new();
    while let Some(joined) = lookups.join_next().await {
        let Ok((reference, media_type)) = joined else {
            continue;
        };
        match media_type {
            Some(mt) if MEDIA_TYPES_MANIFEST_V1.contains(&mt.as_str()) => v1.push(reference),
            // Unknown media type: assume schema-2.
            _ => v2.push(reference),
        }
    }

    if !v1.is_empty() {
        tracing::warn!(
            v1_images = ?v1,
            v2_images = ?v2,
            "Found schema-1 base images; not forwarding the target platform"
        );
        return false;
    }
    true
}

/// The base image references of a Dockerfile: for each FROM line, the first
/// token that is not a `--platform=`-style flag. References to earlier build
/// stage aliases are skipped.
pub fn from_images(dockerfile: &str) -> Vec<String> {
    let mut references = Vec::new();
    let mut aliases = Vec::new();

    for line in dockerfile.lines() {
        let trimmed = line.trim();
        let mut tokens = trimmed.split_whitespace();
        match tokens.next() {
            Some(keyword) if keyword.eq_ignore_ascii_case("from") => {}
            _ => continue,
        }

        let image = tokens.by_ref().find(|t| !t.starts_with("--"));
        let Some(image) = image else {
            continue;
        };

        if let Some(alias_keyword) = tokens.next() {
            if alias_keyword.eq_ignore_ascii_case("as") {
                if let Some(alias) = tokens.next() {
                    aliases.push(alias.to_string());
                }
            }
        }

        if aliases.iter().any(|a| a == image) {
            continue;
        }
        if !references.iter().any(|r| r == image) {
            references.push(image.to_string());
        }
    }

    references
}
