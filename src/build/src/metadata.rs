//! Project metadata intercepted from the uploaded archive.
//!
//! A reserved directory at the archive root (`.balena/` or `.resin/`) carries
//! build variables, build secrets and private registry credentials. The
//! demultiplexer strips it from every service context and feeds its files
//! here; after demultiplexing, [`MetadataStore::parse`] exposes the
//! structured views.

use std::collections::HashMap;

use serde::Deserialize;
use tempfile::TempDir;

use slipway_core::error::{Result, SlipwayError};

/// Metadata directory names recognized at the archive root.
pub const METADATA_DIRECTORIES: [&str; 2] = [".balena", ".resin"];

/// Metadata file candidates, in precedence order. The first one present
/// wins; the rest are ignored.
const METADATA_CANDIDATES: [&str; 6] = [
    "balena.yml",
    "balena.yaml",
    "balena.json",
    "resin.yml",
    "resin.yaml",
    "resin.json",
];

/// Registry-secrets file candidates, in precedence order.
const REGISTRY_SECRET_CANDIDATES: [&str; 3] = [
    "registry-secrets.json",
    "registry-secrets.yml",
    "registry-secrets.yaml",
];

/// Username/password pair for a private registry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

/// One build secret: `source` names a file under `secrets/` in the metadata
/// directory, `dest` the filename it is exposed as under `/run/secrets`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretEntry {
    pub source: String,
    pub dest: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariableSection {
    #[serde(default)]
    global: HashMap<String, String>,
    #[serde(default)]
    services: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SecretSection {
    #[serde(default)]
    global: Vec<SecretEntry>,
    #[serde(default)]
    services: HashMap<String, Vec<SecretEntry>>,
}

/// Schema of the metadata file. Unknown top-level keys are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectMetadata {
    #[serde(rename = "build-variables", default)]
    build_variables: VariableSection,
    #[serde(rename = "build-secrets", default)]
    build_secrets: SecretSection,
}

/// Collects metadata files during demultiplexing and exposes parsed views.
#[derive(Default)]
pub struct MetadataStore {
    /// Raw file contents, keyed by path relative to the metadata directory.
    files: HashMap<String, Vec<u8>>,
    /// Which metadata directory the files came from.
    directory: Option<String>,
    metadata: ProjectMetadata,
    registry_secrets: HashMap<String, RegistryCredentials>,
    parsed: bool,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one intercepted file. `directory` is the metadata directory the
    /// entry was found under; seeing files from two distinct directories in
    /// one archive is fatal.
    pub fn add_file(&mut self, directory: &str, relative_path: &str, bytes: Vec<u8>) -> Result<()> {
        match &self.directory {
            Some(existing) if existing != directory => {
                return Err(SlipwayError::MultipleMetadataDirectoriesError {
                    first: existing.clone(),
                    second: directory.to_string(),
                });
            }
            Some(_) => {}
            None => self.directory = Some(directory.to_string()),
        }

        tracing::debug!(directory, path = relative_path, "Intercepted metadata file");
        self.files.insert(relative_path.to_string(), bytes);
        Ok(())
    }

    /// Parse the collected files. Must run after demultiplexing, exactly
    /// once. Absent files simply produce empty views.
    pub fn parse(&mut self) -> Result<()> {
        debug_assert!(!self.parsed, "metadata parsed twice");

        if let Some(name) = self.first_present(&METADATA_CANDIDATES) {
            let bytes = &self.files[&name];
            self.metadata = decode_metadata(&name, bytes)?;
        }

        if let Some(name) = self.first_present(&REGISTRY_SECRET_CANDIDATES) {
            let bytes = &self.files[&name];
            self.registry_secrets = decode_registry_secrets(&name, bytes)?;
        }

        self.parsed = true;
        Ok(())
    }

    fn first_present(&self, candidates: &[&str]) -> Option<String> {
        candidates
            .iter()
            .find(|c| self.files.contains_key(**c))
            .map(|c| c.to_string())
    }

    /// Build variables for one service: global merged with the service's own
    /// entries, service-level values overriding global ones.
    pub fn build_vars_for_service(&self, service: &str) -> HashMap<String, String> {
        let mut vars = self.metadata.build_variables.global.clone();
        if let Some(overrides) = self.metadata.build_variables.services.get(service) {
            vars.extend(overrides.clone());
        }
        vars
    }

    /// Build secrets for one service: global entries followed by the
    /// service's own.
    pub fn secrets_for_service(&self, service: &str) -> Vec<SecretEntry> {
        let mut entries = self.metadata.build_secrets.global.clone();
        if let Some(own) = self.metadata.build_secrets.services.get(service) {
            entries.extend(own.clone());
        }
        entries
    }

    /// Parsed registry credentials, keyed by registry host URL.
    pub fn registry_secrets(&self) -> &HashMap<String, RegistryCredentials> {
        &self.registry_secrets
    }

    /// Raw bytes of `secrets/<source>` from the metadata directory.
    pub fn secret_file(&self, source: &str) -> Option<&[u8]> {
        self.files
            .get(&format!("secrets/{}", source))
            .map(|b| b.as_slice())
    }

    /// Write a service's secrets into a fresh temporary directory suitable
    /// for binding at `/run/secrets`. Returns `None` when the service has no
    /// secrets.
    pub fn materialize_secrets_for(&self, service: &str) -> Result<Option<TempDir>> {
        let entries = self.secrets_for_service(service);
        if entries.is_empty() {
            return Ok(None);
        }

        let dir = TempDir::new()?;
        for entry in &entries {
            let bytes = self.secret_file(&entry.source).ok_or_else(|| {
                SlipwayError::ValidationError(format!(
                    "Service '{}' references missing secret file 'secrets/{}'",
                    service, entry.source
                ))
            })?;
            std::fs::write(dir.path().join(&entry.dest), bytes)?;
        }

        tracing::debug!(
            service,
            count = entries.len(),
            dir = %dir.path().display(),
            "Materialized build secrets"
        );
        Ok(Some(dir))
    }
}

/// Decode and validate the metadata file according to its extension.
fn decode_metadata(file: &str, bytes: &[u8]) -> Result<ProjectMetadata> {
    let result = if file.ends_with(".json") {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_slice(bytes).map_err(|e| e.to_string())
    };

    result.map_err(|message| SlipwayError::MetadataValidationError {
        file: file.to_string(),
        message,
    })
}

/// Decode and validate the registry-secrets file: an object whose keys are
/// whitespace-free registry URLs and whose values carry exactly `username`
/// and `password` strings.
fn decode_registry_secrets(
    file: &str,
    bytes: &[u8],
) -> Result<HashMap<String, RegistryCredentials>> {
    let value: serde_json::Value = if file.ends_with(".json") {
        serde_json::from_slice(bytes)
            .map_err(|e| SlipwayError::RegistrySecretValidationError(e.to_string()))?
    } else {
        serde_yaml::from_slice(bytes)
            .map_err(|e| SlipwayError::RegistrySecretValidationError(e.to_string()))?
    };

    let object = value.as_object().ok_or_else(|| {
        SlipwayError::RegistrySecretValidationError("should be an object".to_string())
    })?;

    let mut secrets = HashMap::new();
    for (registry, entry) in object {
        if registry.chars().any(char::is_whitespace) {
            return Err(SlipwayError::RegistrySecretValidationError(format!(
                "should NOT have additional properties ('{}')",
                registry
            )));
        }

        let entry = entry.as_object().ok_or_else(|| {
            SlipwayError::RegistrySecretValidationError(format!("'{}': should be an object", registry))
        })?;

        for property in entry.keys() {
            if property != "username" && property != "password" {
                return Err(SlipwayError::RegistrySecretValidationError(format!(
                    "'{}' should NOT have additional properties ('{}')",
                    registry, property
                )));
            }
        }

        let mut credential = |property: &str| -> Result<String> {
            match entry.get(property) {
                Some(serde_json::Value::String(s)) => Ok(s.clone()),
                Some(_) => Err(SlipwayError::RegistrySecretValidationError(format!(
                    "'{}.{}' should be a string",
                    registry, property
                ))),
                None => Err(SlipwayError::RegistrySecretValidationError(format!(
                    "'{}' should have required property '{}'",
                    registry, property
                ))),
            }
        };

        secrets.insert(
            registry.clone(),
            RegistryCredentials {
                username: credential("username")?,
                password: credential("password")?,
            },
        );
    }

    Ok(secrets)
}
