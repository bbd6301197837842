//! Minimal V2 registry client.
//!
//! Implements the distribution-spec authentication flow (anonymous, Basic,
//! Bearer token acquisition via a `WWW-Authenticate` challenge) and manifest
//! retrieval. Clients are short-lived, created per manifest fetch.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use slipway_core::error::{Result, SlipwayError};

use crate::metadata::RegistryCredentials;
use crate::reference::{ParsedRepo, DEFAULT_HUB_URL};

/// Schema-2 image manifest media type.
pub const MEDIA_TYPE_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Schema-2 manifest list (multi-platform index) media type.
pub const MEDIA_TYPE_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Legacy schema-1 manifest media types.
pub const MEDIA_TYPES_MANIFEST_V1: [&str; 2] = [
    "application/vnd.docker.distribution.manifest.v1+json",
    "application/vnd.docker.distribution.manifest.v1+prettyjws",
];

const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Authentication scheme requested by the caller ahead of `login`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    None,
    Basic,
    Bearer,
}

/// The client's current authentication state, established by `login`.
#[derive(Debug, Clone)]
pub enum AuthState {
    /// Anonymous access confirmed.
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// Parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChallenge {
    pub scheme: String,
    pub realm: Option<String>,
    pub service: Option<String>,
}

/// A V2 manifest response body. For a manifest list, `manifests` carries the
/// per-platform children.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<PlatformManifest>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One child of a manifest list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformManifest {
    pub digest: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub platform: Option<ManifestPlatform>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestPlatform {
    pub architecture: String,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

impl Manifest {
    /// The child of a manifest list matching a platform string like
    /// `linux/arm/v7`. Children without platform information never match; a
    /// query without a variant matches any variant.
    pub fn select_platform(&self, docker_platform: &str) -> Option<&PlatformManifest> {
        let mut parts = docker_platform.split('/');
        let os = parts.next()?;
        let architecture = parts.next()?;
        let variant = parts.next();

        self.manifests.iter().find(|child| {
            let Some(platform) = &child.platform else {
                return false;
            };
            platform.os.as_deref().unwrap_or("linux") == os
                && platform.architecture == architecture
                && variant.map_or(true, |v| platform.variant.as_deref() == Some(v))
        })
    }
}

/// Manifest fetch outcome: the parsed manifest, or the HTTP status the
/// registry answered with.
#[derive(Debug)]
pub enum ManifestResponse {
    Manifest(Manifest),
    Status(u16),
}

#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

/// Minimal V2 registry client for one repository.
pub struct RegistryClient {
    repo: ParsedRepo,
    http: reqwest::Client,
    current_auth: Option<AuthState>,
    preset: Option<AuthKind>,
    username: Option<String>,
    password: Option<String>,
    bearer_token: Option<String>,
    registry_secrets: HashMap<String, RegistryCredentials>,
}

impl RegistryClient {
    pub fn new(repo: ParsedRepo) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(PING_TIMEOUT)
            .build()
            .map_err(|e| SlipwayError::RegistryError {
                registry: repo.index_name.clone(),
                message: format!("Failed to construct HTTP client: {}", e),
            })?;

        Ok(Self {
            repo,
            http,
            current_auth: None,
            preset: None,
            username: None,
            password: None,
            bearer_token: None,
            registry_secrets: HashMap::new(),
        })
    }

    /// Explicit credentials, consulted after the registry-secrets map.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Force a particular auth scheme, skipping discovery during `login`.
    pub fn with_auth_kind(mut self, kind: AuthKind) -> Self {
        self.preset = Some(kind);
        self
    }

    /// Caller-provided bearer token, used with [`AuthKind::Bearer`].
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Per-registry credentials from the uploaded archive.
    pub fn with_registry_secrets(
        mut self,
        secrets: HashMap<String, RegistryCredentials>,
    ) -> Self {
        self.registry_secrets = secrets;
        self
    }

    pub fn current_auth(&self) -> Option<&AuthState> {
        self.current_auth.as_ref()
    }

    /// Probe the index's V2 endpoint.
    ///
    /// Authenticated: true on any 2xx. Unauthenticated: true on 2xx, or on a
    /// 401 carrying a parseable challenge (the registry is reachable and
    /// speaks V2).
    pub async fn ping(&self) -> Result<bool> {
        let url = self.v2_url();
        let response = self
            .apply_auth(self.http.get(&url))
            .send()
            .await
            .map_err(|e| self.registry_error(&format!("Ping failed: {}", e)))?;

        let status = response.status();
        if self.current_auth.is_some() {
            return Ok(status.is_success());
        }
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Ok(self.challenge_from(&response).is_some());
        }
        Ok(false)
    }

    /// Establish the client's authentication state.
    ///
    /// Returns false when the registry's auth scheme could not be satisfied
    /// (failed token acquisition, unknown scheme). At most one token request
    /// is issued per call.
    pub async fn login(&mut self, force_reset: bool, force_validate: bool) -> Result<bool> {
        if force_reset {
            self.current_auth = None;
        }

        if let Some(kind) = self.preset {
            self.current_auth = Some(match kind {
                AuthKind::None => AuthState::None,
                AuthKind::Basic => {
                    let (username, password) = self.lookup_credentials();
                    AuthState::Basic { username, password }
                }
                AuthKind::Bearer => AuthState::Bearer {
                    token: self.bearer_token.clone().unwrap_or_default(),
                },
            });
            if !force_validate {
                return Ok(true);
            }
            return self.ping().await;
        }

        // Raw probe to discover the auth scheme.
        let url = self.v2_url();
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.registry_error(&format!("Login probe failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            self.current_auth = Some(AuthState::None);
            return Ok(true);
        }
        if status != StatusCode::UNAUTHORIZED {
            return Err(self.registry_error(&format!("Unexpected status {} from {}", status, url)));
        }

        let challenge = match self.challenge_from(&response) {
            Some(challenge) => challenge,
            // quay.io answers 401 without a challenge header; its token
            // endpoint is well known.
            None if self.repo.index_name == "quay.io" => ParsedChallenge {
                scheme: "bearer".to_string(),
                realm: Some("https://quay.io/v2/auth".to_string()),
                service: Some("quay.io".to_string()),
            },
            None => {
                return Err(self.registry_error("401 response without a WWW-Authenticate challenge"))
            }
        };

        match challenge.scheme.as_str() {
            "basic" => {
                let (username, password) = self.lookup_credentials();
                self.current_auth = Some(AuthState::Basic { username, password });
                Ok(true)
            }
            "bearer" => self.acquire_token(&challenge).await,
            other => {
                tracing::warn!(scheme = other, "Unknown registry auth scheme");
                Ok(false)
            }
        }
    }

    /// Fetch a manifest. Call after `login`.
    ///
    /// A 401 here is rewritten to 404: within the scope the caller could see,
    /// the repository does not exist.
    pub async fn get_manifest(
        &self,
        tag: &str,
        max_schema_version: u32,
        accept_manifest_lists: bool,
    ) -> Result<ManifestResponse> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.repo.index_url, self.repo.remote_name, tag
        );

        let mut accept = MEDIA_TYPE_MANIFEST_V2.to_string();
        if accept_manifest_lists {
            accept.push_str(", ");
            accept.push_str(MEDIA_TYPE_MANIFEST_LIST);
        }

        tracing::debug!(url = %url, "Fetching manifest");
        let response = self
            .apply_auth(self.http.get(&url).header("Accept", accept))
            .send()
            .await
            .map_err(|e| self.registry_error(&format!("Manifest request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let code = if status == StatusCode::UNAUTHORIZED {
                404
            } else {
                status.as_u16()
            };
            return Ok(ManifestResponse::Status(code));
        }

        let manifest: Manifest = response
            .json()
            .await
            .map_err(|e| self.registry_error(&format!("Invalid manifest body: {}", e)))?;

        if manifest.schema_version > max_schema_version {
            return Err(SlipwayError::InvalidContentError(format!(
                "Manifest schema version {} exceeds maximum {}",
                manifest.schema_version, max_schema_version
            )));
        }

        Ok(ManifestResponse::Manifest(manifest))
    }

    async fn acquire_token(&mut self, challenge: &ParsedChallenge) -> Result<bool> {
        let realm = match &challenge.realm {
            Some(realm) => realm.clone(),
            None => return Ok(false),
        };

        let (username, password) = self.lookup_credentials();
        let scope = format!("repository:{}:pull", self.repo.remote_name);

        let mut query: Vec<(&str, String)> = vec![("scope", scope)];
        if let Some(service) = &challenge.service {
            query.push(("service", service.clone()));
        }
        if !username.is_empty() {
            query.push(("account", username.clone()));
        }

        let mut request = self.http.get(&realm).query(&query);
        if !username.is_empty() {
            request = request.basic_auth(&username, Some(&password));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, realm = %realm, "Token acquisition failed");
                return Ok(false);
            }
        };
        if !response.status().is_success() {
            return Ok(false);
        }

        let body: TokenResponse = match response.json().await {
            Ok(body) => body,
            Err(_) => return Ok(false),
        };
        match body.token {
            Some(token) => {
                self.current_auth = Some(AuthState::Bearer { token });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Credentials for this repo's index: registry-secrets entry by index
    /// URL (with and without a trailing slash), then by index name, then -
    /// for official repos - the canonical Docker Hub URL; then the explicit
    /// credentials; then empty.
    fn lookup_credentials(&self) -> (String, String) {
        let mut keys = vec![
            self.repo.index_url.clone(),
            format!("{}/", self.repo.index_url),
            self.repo.index_name.clone(),
        ];
        if self.repo.official {
            keys.push(DEFAULT_HUB_URL.to_string());
        }

        for key in keys {
            let key = key.trim_end_matches('/').to_string();
            let found = self
                .registry_secrets
                .get(&key)
                .or_else(|| self.registry_secrets.get(&format!("{}/", key)));
            if let Some(entry) = found {
                return (entry.username.clone(), entry.password.clone());
            }
        }

        match (&self.username, &self.password) {
            (Some(username), Some(password)) => (username.clone(), password.clone()),
            _ => (String::new(), String::new()),
        }
    }

    fn v2_url(&self) -> String {
        format!("{}/v2/", self.repo.index_url)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.current_auth {
            Some(AuthState::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            Some(AuthState::Bearer { token }) => request.bearer_auth(token),
            Some(AuthState::None) | None => request,
        }
    }

    fn challenge_from(&self, response: &reqwest::Response) -> Option<ParsedChallenge> {
        response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge)
    }

    fn registry_error(&self, message: &str) -> SlipwayError {
        SlipwayError::RegistryError {
            registry: self.repo.index_name.clone(),
            message: message.to_string(),
        }
    }
}

/// Parse a `WWW-Authenticate` header: a scheme token followed by
/// comma-separated `key="value"` pairs (either quote style), whitespace
/// tolerant. Only `realm` and `service` are extracted.
pub fn parse_challenge(header: &str) -> Option<ParsedChallenge> {
    let trimmed = header.trim();
    let (scheme, params) = match trimmed.find(char::is_whitespace) {
        Some(at) => (&trimmed[..at], trimmed[at..].trim_start()),
        None => (trimmed, ""),
    };
    if scheme.is_empty() {
        return None;
    }

    let mut challenge = ParsedChallenge {
        scheme: scheme.to_lowercase(),
        realm: None,
        service: None,
    };

    for pair in params.split(',') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = unquote(value.trim());
        match key {
            "realm" => challenge.realm = Some(value.to_string()),
            "service" => challenge.service = Some(value.to_string()),
            _ => {}
        }
    }

    Some(challenge)
}

/// Strip one matching pair of surrounding quotes.
fn unquote(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::parse_repo;

    #[test]
    fn test_parse_challenge_bearer() {
        let challenge = parse_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io""#,
        )
        .unwrap();
        assert_eq!(challenge.scheme, "bearer");
        assert_eq!(
            challenge.realm.as_deref(),
            Some("https://auth.docker.io/token")
        );
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
    }

    #[test]
    fn test_parse_challenge_basic() {
        let challenge = parse_challenge(r#"Basic realm="Registry""#).unwrap();
        assert_eq!(challenge.scheme, "basic");
        assert_eq!(challenge.realm.as_deref(), Some("Registry"));
        assert!(challenge.service.is_none());
    }

    #[test]
    fn test_parse_challenge_single_quotes_and_whitespace() {
        let challenge =
            parse_challenge("Bearer  realm = 'https://r/token' ,  service = 'svc' ").unwrap();
        assert_eq!(challenge.realm.as_deref(), Some("https://r/token"));
        assert_eq!(challenge.service.as_deref(), Some("svc"));
    }

    #[test]
    fn test_parse_challenge_ignores_unknown_keys() {
        let challenge =
            parse_challenge(r#"Bearer realm="r",service="s",scope="repository:x:pull""#).unwrap();
        assert_eq!(challenge.realm.as_deref(), Some("r"));
        assert_eq!(challenge.service.as_deref(), Some("s"));
    }

    #[test]
    fn test_parse_challenge_scheme_only() {
        let challenge = parse_challenge("Negotiate").unwrap();
        assert_eq!(challenge.scheme, "negotiate");
        assert!(challenge.realm.is_none());
    }

    #[test]
    fn test_parse_challenge_empty() {
        assert!(parse_challenge("").is_none());
        assert!(parse_challenge("   ").is_none());
    }

    fn manifest_list() -> Manifest {
        serde_json::from_value(serde_json::json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_MANIFEST_LIST,
            "manifests": [
                {
                    "digest": "sha256:amd64",
                    "platform": { "architecture": "amd64", "os": "linux" }
                },
                {
                    "digest": "sha256:armv7",
                    "platform": { "architecture": "arm", "os": "linux", "variant": "v7" }
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_select_platform_exact() {
        let manifest = manifest_list();
        let child = manifest.select_platform("linux/arm/v7").unwrap();
        assert_eq!(child.digest, "sha256:armv7");
    }

    #[test]
    fn test_select_platform_no_variant() {
        let manifest = manifest_list();
        let child = manifest.select_platform("linux/amd64").unwrap();
        assert_eq!(child.digest, "sha256:amd64");
    }

    #[test]
    fn test_select_platform_missing() {
        let manifest = manifest_list();
        assert!(manifest.select_platform("linux/s390x").is_none());
        assert!(manifest.select_platform("windows/amd64").is_none());
    }

    fn secrets(entries: &[(&str, &str, &str)]) -> std::collections::HashMap<String, RegistryCredentials> {
        entries
            .iter()
            .map(|(k, u, p)| {
                (
                    k.to_string(),
                    RegistryCredentials {
                        username: u.to_string(),
                        password: p.to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_lookup_credentials_by_index_url() {
        let client = RegistryClient::new(parse_repo("quay.io/org/app").unwrap())
            .unwrap()
            .with_registry_secrets(secrets(&[("https://quay.io", "ann", "pw")]))
            .with_credentials("fallback", "fb");
        assert_eq!(
            client.lookup_credentials(),
            ("ann".to_string(), "pw".to_string())
        );
    }

    #[test]
    fn test_lookup_credentials_trailing_slash() {
        let client = RegistryClient::new(parse_repo("quay.io/org/app").unwrap())
            .unwrap()
            .with_registry_secrets(secrets(&[("https://quay.io/", "ann", "pw")]));
        assert_eq!(
            client.lookup_credentials(),
            ("ann".to_string(), "pw".to_string())
        );
    }

    #[test]
    fn test_lookup_credentials_by_index_name() {
        let client = RegistryClient::new(parse_repo("quay.io/org/app").unwrap())
            .unwrap()
            .with_registry_secrets(secrets(&[("quay.io", "bob", "pw2")]));
        assert_eq!(
            client.lookup_credentials(),
            ("bob".to_string(), "pw2".to_string())
        );
    }

    #[test]
    fn test_lookup_credentials_official_hub_url() {
        let client = RegistryClient::new(parse_repo("busybox").unwrap())
            .unwrap()
            .with_registry_secrets(secrets(&[("https://index.docker.io/v1/", "hub", "pw")]));
        assert_eq!(
            client.lookup_credentials(),
            ("hub".to_string(), "pw".to_string())
        );
    }

    #[test]
    fn test_lookup_credentials_explicit_fallback() {
        let client = RegistryClient::new(parse_repo("busybox").unwrap())
            .unwrap()
            .with_credentials("me", "mine");
        assert_eq!(
            client.lookup_credentials(),
            ("me".to_string(), "mine".to_string())
        );
    }

    #[test]
    fn test_lookup_credentials_empty_default() {
        let client = RegistryClient::new(parse_repo("busybox").unwrap()).unwrap();
        assert_eq!(
            client.lookup_credentials(),
            (String::new(), String::new())
        );
    }

    // Network-touching scenarios; run with `cargo test -- --ignored` against
    // a live registry.

    #[tokio::test]
    #[ignore]
    async fn test_ping_official_anonymous() {
        let client = RegistryClient::new(parse_repo("busybox").unwrap()).unwrap();
        assert!(client.ping().await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_manifest_list_official() {
        let mut client = RegistryClient::new(parse_repo("busybox").unwrap()).unwrap();
        assert!(client.login(false, false).await.unwrap());
        match client.get_manifest("latest", 2, true).await.unwrap() {
            ManifestResponse::Manifest(manifest) => {
                assert_eq!(manifest.schema_version, 2);
                assert_eq!(
                    manifest.media_type.as_deref(),
                    Some(MEDIA_TYPE_MANIFEST_LIST)
                );
                assert!(!manifest.manifests.is_empty());
                for child in &manifest.manifests {
                    assert!(!child.digest.is_empty());
                    assert!(child.platform.is_some());
                }
            }
            ManifestResponse::Status(code) => panic!("unexpected status {code}"),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_bad_credentials_yield_404() {
        let mut client = RegistryClient::new(parse_repo("usernoexisty/private").unwrap())
            .unwrap()
            .with_auth_kind(AuthKind::Basic)
            .with_credentials("userNoExisty", "wrong");
        client.login(false, false).await.unwrap();
        assert!(!client.ping().await.unwrap());
        match client.get_manifest("latest", 2, true).await.unwrap() {
            ManifestResponse::Status(code) => assert_eq!(code, 404),
            ManifestResponse::Manifest(_) => panic!("expected a status code"),
        }
    }
}
