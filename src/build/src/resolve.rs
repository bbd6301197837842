//! Build context resolution.
//!
//! Classifies each demultiplexed context (explicit Dockerfile path,
//! architecture-specific Dockerfile, Dockerfile.template, plain Dockerfile)
//! and rewrites it into a daemon-buildable tar stream. Strategies are tried
//! in a fixed order; the first match wins.

use std::collections::HashMap;
use std::io::Read;

use slipway_core::arch::docker_platform;
use slipway_core::error::{Result, SlipwayError};

use crate::task::BuildTask;

/// Project type reported for a context built from a plain Dockerfile,
/// including one referenced by an explicit path.
pub const PROJECT_TYPE_STANDARD: &str = "Standard Dockerfile";

/// Project type reported for a substituted Dockerfile.template.
pub const PROJECT_TYPE_TEMPLATE: &str = "Dockerfile.template";

/// Target parameters resolution happens against.
#[derive(Debug, Clone, Default)]
pub struct BuildTarget {
    /// Target architecture slug (e.g., "amd64", "armv7hf").
    pub arch: String,
    /// Target device type slug (e.g., "raspberrypi3"). More specific than
    /// the architecture; wins where both match.
    pub device_type: String,
    /// Additional template variables supplied by the caller.
    pub template_vars: HashMap<String, String>,
}

/// Outcome of resolving one build task: the classified project and the
/// daemon-ready context stream.
#[derive(Debug)]
pub struct Resolution {
    /// Human-readable classifier (e.g., "Standard Dockerfile").
    pub project_type: String,
    /// Original filename the Dockerfile was derived from.
    pub resolved_name: String,
    /// Final Dockerfile contents.
    pub dockerfile: String,
    /// Dockerfile location inside the context, when not the default.
    pub dockerfile_path: Option<String>,
    /// Platform string for the daemon, from the target architecture.
    pub docker_platform: Option<String>,
    /// The rewritten context tar.
    pub context_tar: Vec<u8>,
}

/// Resolve one build task's context. Consumes the task's context stream;
/// it is readable exactly once.
pub fn resolve_task(task: &mut BuildTask, target: &BuildTarget) -> Result<Resolution> {
    let service = task.service_name.clone();
    let context_tar = task.take_context_tar().ok_or_else(|| {
        SlipwayError::BuildProcessError(format!(
            "Service '{}' has no build stream to resolve",
            service
        ))
    })?;

    let entries = read_entries(&context_tar)?;
    let platform = docker_platform(&target.arch).map(str::to_string);

    // 1. Explicit Dockerfile path, possibly rewritten to the fixed
    //    alternate location during demultiplexing. The context is passed
    //    through untouched; the daemon is pointed at the declared path.
    if let Some(path) = task.dockerfile_path.clone() {
        let entry = entries.iter().find(|e| e.name == path).ok_or_else(|| {
            SlipwayError::ProjectResolutionError {
                service: service.clone(),
                message: format!("Declared Dockerfile '{}' not present in build context", path),
            }
        })?;
        let dockerfile = String::from_utf8_lossy(&entry.bytes).to_string();
        tracing::debug!(service = %service, path = %path, "Resolved explicit Dockerfile path");
        return Ok(Resolution {
            project_type: PROJECT_TYPE_STANDARD.to_string(),
            resolved_name: path.clone(),
            dockerfile,
            dockerfile_path: Some(path),
            docker_platform: platform,
            context_tar,
        });
    }

    // 2. Architecture-specific Dockerfile: device type beats architecture.
    let mut specific_names = Vec::new();
    if !target.device_type.is_empty() {
        specific_names.push(format!("Dockerfile.{}", target.device_type));
    }
    if !target.arch.is_empty() {
        specific_names.push(format!("Dockerfile.{}", target.arch));
    }
    let chosen = specific_names
        .iter()
        .find(|n| entries.iter().any(|e| &e.name == *n))
        .cloned();
    if let Some(chosen) = chosen {
        let dockerfile = content_of(&entries, &chosen);
        let context_tar = rewrite(&entries, &dockerfile, |name| {
            specific_names.iter().any(|n| n.as_str() == name)
        })?;
        tracing::debug!(service = %service, dockerfile = %chosen, "Resolved architecture-specific Dockerfile");
        return Ok(Resolution {
            project_type: chosen.clone(),
            resolved_name: chosen,
            dockerfile,
            dockerfile_path: None,
            docker_platform: platform,
            context_tar,
        });
    }

    // 3. Dockerfile.template with %%VARIABLE%% substitution.
    if entries.iter().any(|e| e.name == "Dockerfile.template") {
        let raw = content_of(&entries, "Dockerfile.template");
        let vars = template_vars(target);
        let dockerfile =
            substitute_template(&raw, &vars).map_err(|message| SlipwayError::ProjectResolutionError {
                service: service.clone(),
                message,
            })?;
        let context_tar = rewrite(&entries, &dockerfile, |name| name == "Dockerfile.template")?;
        tracing::debug!(service = %service, "Resolved Dockerfile.template");
        return Ok(Resolution {
            project_type: PROJECT_TYPE_TEMPLATE.to_string(),
            resolved_name: "Dockerfile.template".to_string(),
            dockerfile,
            dockerfile_path: None,
            docker_platform: platform,
            context_tar,
        });
    }

    // 4. Plain top-level Dockerfile.
    if entries.iter().any(|e| e.name == "Dockerfile") {
        let dockerfile = content_of(&entries, "Dockerfile");
        tracing::debug!(service = %service, "Resolved standard Dockerfile");
        return Ok(Resolution {
            project_type: PROJECT_TYPE_STANDARD.to_string(),
            resolved_name: "Dockerfile".to_string(),
            dockerfile,
            dockerfile_path: None,
            docker_platform: platform,
            context_tar,
        });
    }

    Err(SlipwayError::ProjectResolutionError {
        service,
        message: "No suitable Dockerfile found in build context".to_string(),
    })
}

struct ContextEntry {
    name: String,
    header: tar::Header,
    bytes: Vec<u8>,
}

fn read_entries(context_tar: &[u8]) -> Result<Vec<ContextEntry>> {
    let mut archive = tar::Archive::new(context_tar);
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(tar_error)? {
        let mut entry = entry.map_err(tar_error)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).to_string();
        let header = entry.header().clone();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes).map_err(tar_error)?;
        entries.push(ContextEntry {
            name,
            header,
            bytes,
        });
    }
    Ok(entries)
}

fn content_of(entries: &[ContextEntry], name: &str) -> String {
    entries
        .iter()
        .find(|e| e.name == name)
        .map(|e| String::from_utf8_lossy(&e.bytes).to_string())
        .unwrap_or_default()
}

/// Re-emit the context with `dockerfile` at the top-level `Dockerfile` path
/// and every entry matching `drop` removed. Entry order is preserved; the
/// synthesized Dockerfile takes the position of the first dropped entry.
fn rewrite(
    entries: &[ContextEntry],
    dockerfile: &str,
    drop: impl Fn(&str) -> bool,
) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut emitted = false;

    for entry in entries {
        if drop(&entry.name) || entry.name == "Dockerfile" {
            if !emitted {
                append_dockerfile(&mut builder, dockerfile)?;
                emitted = true;
            }
            continue;
        }
        let mut header = entry.header.clone();
        builder
            .append_data(&mut header, &entry.name, entry.bytes.as_slice())
            .map_err(tar_error)?;
    }

    if !emitted {
        append_dockerfile(&mut builder, dockerfile)?;
    }
    builder.into_inner().map_err(tar_error)
}

fn append_dockerfile(builder: &mut tar::Builder<Vec<u8>>, dockerfile: &str) -> Result<()> {
    let mut header = tar::Header::new_ustar();
    header.set_mode(0o644);
    header.set_size(dockerfile.len() as u64);
    builder
        .append_data(&mut header, "Dockerfile", dockerfile.as_bytes())
        .map_err(tar_error)
}

/// The recognized template variables for a target, plus caller extras.
fn template_vars(target: &BuildTarget) -> HashMap<String, String> {
    let mut vars = target.template_vars.clone();
    if !target.arch.is_empty() {
        vars.insert("RESIN_ARCH".to_string(), target.arch.clone());
        vars.insert("BALENA_ARCH".to_string(), target.arch.clone());
    }
    if !target.device_type.is_empty() {
        vars.insert("RESIN_MACHINE_NAME".to_string(), target.device_type.clone());
        vars.insert("BALENA_MACHINE_NAME".to_string(), target.device_type.clone());
    }
    vars
}

/// Replace `%%NAME%%` tokens. An unknown variable-shaped token is an error;
/// `%%` sequences that do not delimit a variable name pass through.
fn substitute_template(
    content: &str,
    vars: &HashMap<String, String>,
) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("%%") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find("%%") {
            Some(end) if is_variable_name(&after[..end]) => {
                let token = &after[..end];
                match vars.get(token) {
                    Some(value) => out.push_str(value),
                    None => return Err(format!("Unknown template variable '%%{}%%'", token)),
                }
                rest = &after[end + 2..];
            }
            _ => {
                out.push_str("%%");
                rest = after;
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn is_variable_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn tar_error(err: std::io::Error) -> SlipwayError {
    SlipwayError::TarError(err.to_string())
}
