//! Repository reference parsing.
//!
//! Splits an image repository reference like `quay.io/org/app` or `busybox`
//! into its index and repository components, with the official-index rules
//! (`library/` injection, `index.docker.io` aliasing) applied.

use slipway_core::error::{Result, SlipwayError};

/// The default index for references without an explicit registry host.
pub const DEFAULT_INDEX: &str = "docker.io";

/// V2 API endpoint of the official index.
pub const DEFAULT_INDEX_URL: &str = "https://registry-1.docker.io";

/// Canonical Docker Hub URL used as a credential lookup key.
pub const DEFAULT_HUB_URL: &str = "https://index.docker.io/v1/";

/// A parsed repository reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRepo {
    /// Index host, e.g. "docker.io" or "myreg.example.com:5000".
    pub index_name: String,
    /// Base URL for V2 API requests against the index.
    pub index_url: String,
    /// Repository name as known to the index, e.g. "library/busybox".
    pub remote_name: String,
    /// Repository name as referenced locally, e.g. "busybox".
    pub local_name: String,
    /// Fully qualified name; parsing it again is a fixed point.
    pub canonical_name: String,
    /// True when served by the default index.
    pub official: bool,
}

/// Parse a repository reference (no tag).
pub fn parse_repo(reference: &str) -> Result<ParsedRepo> {
    let invalid = |message: &str| SlipwayError::InvalidReferenceError {
        reference: reference.to_string(),
        message: message.to_string(),
    };

    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err(invalid("Empty repository reference"));
    }

    // A leading scheme is accepted and remembered for the index URL.
    let (explicit_scheme, rest) = if let Some(r) = trimmed.strip_prefix("https://") {
        (Some("https"), r)
    } else if let Some(r) = trimmed.strip_prefix("http://") {
        (Some("http"), r)
    } else {
        (None, trimmed)
    };

    // The first component is an index host only when it could not be a
    // namespace: it contains a dot or colon, or is exactly "localhost".
    let (host, repo) = match rest.split_once('/') {
        Some((first, remainder))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (Some(first), remainder)
        }
        _ => (None, rest),
    };

    let index_name = match host {
        // index.docker.io is an alias of the default index.
        Some("index.docker.io") | None => DEFAULT_INDEX.to_string(),
        Some(h) => h.to_lowercase(),
    };
    let official = index_name == DEFAULT_INDEX;

    if official && explicit_scheme == Some("http") {
        return Err(invalid("Insecure HTTP is not allowed for the official index"));
    }

    if repo.is_empty() {
        return Err(invalid("Empty repository name"));
    }

    // Namespace rules apply to the component before the first slash.
    if let Some((namespace, _)) = repo.split_once('/') {
        validate_namespace(namespace).map_err(|m| invalid(&m))?;
    }
    validate_name(repo).map_err(|m| invalid(&m))?;

    let remote_name = if official && !repo.contains('/') {
        format!("library/{}", repo)
    } else {
        repo.to_string()
    };
    let local_name = if official {
        repo.to_string()
    } else {
        format!("{}/{}", index_name, repo)
    };
    let canonical_name = format!("{}/{}", index_name, remote_name);

    let index_url = if official {
        DEFAULT_INDEX_URL.to_string()
    } else {
        let scheme = explicit_scheme.unwrap_or("https");
        format!("{}://{}", scheme, index_name)
    };

    Ok(ParsedRepo {
        index_name,
        index_url,
        remote_name,
        local_name,
        canonical_name,
        official,
    })
}

/// Split a `repo[:tag]` reference. A colon inside the registry host is not a
/// tag separator.
pub fn split_tag(reference: &str) -> (&str, Option<&str>) {
    let last_segment_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[last_segment_start..].find(':') {
        Some(colon) => {
            let at = last_segment_start + colon;
            (&reference[..at], Some(&reference[at + 1..]))
        }
        None => (reference, None),
    }
}

fn validate_namespace(namespace: &str) -> std::result::Result<(), String> {
    if namespace.len() < 2 || namespace.len() > 255 {
        return Err(format!(
            "Namespace '{}' must be between 2 and 255 characters",
            namespace
        ));
    }
    if !namespace
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'))
    {
        return Err(format!(
            "Namespace '{}' may only contain lowercase letters, digits, '.', '_' and '-'",
            namespace
        ));
    }
    if namespace.starts_with('-') || namespace.ends_with('-') {
        return Err(format!(
            "Namespace '{}' may not start or end with a hyphen",
            namespace
        ));
    }
    if namespace.contains("--") {
        return Err(format!(
            "Namespace '{}' may not contain consecutive hyphens",
            namespace
        ));
    }
    Ok(())
}

fn validate_name(name: &str) -> std::result::Result<(), String> {
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '/' | '.' | '-'))
    {
        return Err(format!(
            "Repository name '{}' may only contain lowercase letters, digits, '_', '/', '.' and '-'",
            name
        ));
    }
    Ok(())
}
