//! Build driver: executes one task against the daemon.
//!
//! Pulls external images and runs builds for resolved contexts, assembling
//! the daemon options from the task, the archive metadata and the caller's
//! inputs. Per-task faults never escape as errors: every task yields a
//! [`LocalImage`] record, successful or not.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use slipway_core::error::SlipwayError;

use crate::daemon::{BuildEvent, BuildOptions, Daemon, PullEvent};
use crate::metadata::{MetadataStore, RegistryCredentials};
use crate::reference::{parse_repo, split_tag, DEFAULT_HUB_URL};
use crate::resolve::Resolution;
use crate::task::BuildTask;

/// A repository/tag pair seen as a base image during a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTag {
    pub repository: String,
    pub tag: String,
}

/// Per-task result record.
///
/// When a build fails midway, `layers` holds the successfully committed
/// intermediate chain and `name` the last such layer, so the partial
/// artifact can still be inspected.
#[derive(Debug, Clone)]
pub struct LocalImage {
    pub service_name: String,
    /// Daemon reference or tag of the produced image.
    pub name: Option<String>,
    pub external: bool,
    pub successful: bool,
    /// Committed layer chain, in order.
    pub layers: Vec<String>,
    /// Base images referenced during the build.
    pub base_image_tags: Vec<RepoTag>,
    /// Resolved Dockerfile contents, build tasks only.
    pub dockerfile: Option<String>,
    /// Project classifier (e.g. "Standard Dockerfile"), build tasks only.
    pub project_type: Option<String>,
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Caller-level inputs applied to every build.
#[derive(Debug, Clone, Default)]
pub struct DriveOptions {
    /// Extra build arguments, merged over the task's own.
    pub buildargs: HashMap<String, String>,
    /// Caller-provided registry credentials.
    pub registry_config: HashMap<String, RegistryCredentials>,
    /// Raw daemon options passed through untouched.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Drives individual tasks against a shared daemon handle.
pub struct BuildDriver {
    daemon: Arc<dyn Daemon>,
}

impl BuildDriver {
    pub fn new(daemon: Arc<dyn Daemon>) -> Self {
        Self { daemon }
    }

    /// Pull an external task's image. Progress lines go to the task's
    /// `progress_hook`.
    pub async fn pull_external(&self, task: &BuildTask, options: &DriveOptions) -> LocalImage {
        let start_time = Utc::now();
        let image_ref = match &task.image_ref {
            Some(reference) => reference.clone(),
            None => {
                return self.record_failure(
                    task,
                    start_time,
                    "External task without an image reference".to_string(),
                );
            }
        };

        tracing::info!(service = %task.service_name, image = %image_ref, "Pulling external image");
        let auth = registry_auth_for(&image_ref, &options.registry_config);

        let mut receiver = match self.daemon.pull(&image_ref, auth).await {
            Ok(receiver) => receiver,
            Err(e) => return self.record_failure(task, start_time, e.to_string()),
        };

        let mut outcome: Option<Result<(), String>> = None;
        while let Some(event) = receiver.recv().await {
            match event {
                PullEvent::Progress(line) => {
                    if let Some(hook) = &task.progress_hook {
                        hook(&line);
                    }
                }
                PullEvent::Done => {
                    outcome = Some(Ok(()));
                    break;
                }
                PullEvent::Failure { message } => {
                    outcome = Some(Err(message));
                    break;
                }
            }
        }

        match outcome.unwrap_or_else(|| Err("Daemon pull stream ended unexpectedly".to_string())) {
            Ok(()) => LocalImage {
                service_name: task.service_name.clone(),
                name: Some(image_ref),
                external: true,
                successful: true,
                layers: Vec::new(),
                base_image_tags: Vec::new(),
                dockerfile: None,
                project_type: None,
                error: None,
                start_time,
                end_time: Utc::now(),
            },
            Err(message) => self.record_failure(task, start_time, message),
        }
    }

    /// Run a build task against the daemon. `resolution` is the staged
    /// resolver outcome; a resolution failure is reported as an unsuccessful
    /// record, not raised.
    pub async fn build_service(
        &self,
        task: &BuildTask,
        resolution: std::result::Result<Resolution, SlipwayError>,
        metadata: &MetadataStore,
        options: &DriveOptions,
        platform_allowed: bool,
    ) -> LocalImage {
        let start_time = Utc::now();

        let resolution = match resolution {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::warn!(service = %task.service_name, error = %e, "Project resolution failed");
                return self.record_failure(task, start_time, e.to_string());
            }
        };

        // Secrets are bound from a temporary directory that must outlive the
        // build.
        let secrets_dir = match metadata.materialize_secrets_for(&task.service_name) {
            Ok(dir) => dir,
            Err(e) => return self.record_failure(task, start_time, e.to_string()),
        };

        let mut build_options = BuildOptions {
            platform: if platform_allowed {
                resolution.docker_platform.clone()
            } else {
                None
            },
            extra: options.extra.clone(),
            registry_config: merge_registry_config(
                metadata.registry_secrets(),
                &options.registry_config,
            ),
            buildargs: merged_buildargs(task, metadata, options),
            labels: task.labels.clone(),
            tag: task.tag.clone(),
            dockerfile: resolution.dockerfile_path.clone(),
            binds: Vec::new(),
        };
        if let Some(dir) = &secrets_dir {
            build_options
                .binds
                .push(format!("{}:/run/secrets:ro", dir.path().display()));
        }

        tracing::info!(
            service = %task.service_name,
            project_type = %resolution.project_type,
            platform = ?build_options.platform,
            "Starting build"
        );

        let mut receiver = match self
            .daemon
            .build(build_options, resolution.context_tar)
            .await
        {
            Ok(receiver) => receiver,
            Err(e) => {
                let mut record = self.record_failure(task, start_time, e.to_string());
                record.dockerfile = Some(resolution.dockerfile);
                record.project_type = Some(resolution.project_type);
                return record;
            }
        };

        let mut layers = Vec::new();
        let mut base_image_tags = Vec::new();
        let mut outcome: Option<(bool, Option<String>, Option<String>)> = None;

        while let Some(event) = receiver.recv().await {
            match event {
                BuildEvent::Output(line) => {
                    if let Some(hook) = &task.stream_hook {
                        hook(&line);
                    }
                }
                BuildEvent::Layer(id) => layers.push(id),
                BuildEvent::BaseImage { repository, tag } => {
                    base_image_tags.push(RepoTag { repository, tag });
                }
                BuildEvent::Success { image_id } => {
                    let name = task.tag.clone().unwrap_or(image_id);
                    outcome = Some((true, Some(name), None));
                    break;
                }
                BuildEvent::Failure { message } => {
                    // Name the last committed layer so the partial image
                    // stays inspectable.
                    outcome = Some((false, layers.last().cloned(), Some(message)));
                    break;
                }
            }
        }

        let (successful, name, error) = outcome.unwrap_or((
            false,
            None,
            Some("Daemon build stream ended unexpectedly".to_string()),
        ));

        // Daemons predating buildkit streams may not report base images;
        // fall back to the Dockerfile's own FROM references.
        if base_image_tags.is_empty() {
            base_image_tags = base_tags_from_dockerfile(&resolution.dockerfile);
        }

        drop(secrets_dir);

        LocalImage {
            service_name: task.service_name.clone(),
            name,
            external: false,
            successful,
            layers,
            base_image_tags,
            dockerfile: Some(resolution.dockerfile),
            project_type: Some(resolution.project_type),
            error,
            start_time,
            end_time: Utc::now(),
        }
    }

    fn record_failure(
        &self,
        task: &BuildTask,
        start_time: DateTime<Utc>,
        message: String,
    ) -> LocalImage {
        LocalImage {
            service_name: task.service_name.clone(),
            name: None,
            external: task.external,
            successful: false,
            layers: Vec::new(),
            base_image_tags: Vec::new(),
            dockerfile: None,
            project_type: None,
            error: Some(message),
            start_time,
            end_time: Utc::now(),
        }
    }
}

/// Base image repository/tag pairs from a Dockerfile's FROM lines.
fn base_tags_from_dockerfile(dockerfile: &str) -> Vec<RepoTag> {
    crate::platform::from_images(dockerfile)
        .into_iter()
        .map(|image| {
            let (repository, tag) = split_tag(&image);
            RepoTag {
                repository: repository.to_string(),
                tag: tag.unwrap_or("latest").to_string(),
            }
        })
        .collect()
}

/// Build arguments for one task: archive metadata variables, overridden by
/// the task's own arguments, overridden by caller arguments.
fn merged_buildargs(
    task: &BuildTask,
    metadata: &MetadataStore,
    options: &DriveOptions,
) -> HashMap<String, String> {
    let mut args = metadata.build_vars_for_service(&task.service_name);
    args.extend(task.args.clone());
    args.extend(options.buildargs.clone());
    args
}

/// Merge registry credentials: entries from the uploaded archive take
/// precedence over caller entries for the same host, except the default
/// Docker Hub URL, where the caller wins.
fn merge_registry_config(
    archive: &HashMap<String, RegistryCredentials>,
    caller: &HashMap<String, RegistryCredentials>,
) -> HashMap<String, RegistryCredentials> {
    let mut merged = caller.clone();
    for (host, credentials) in archive {
        if host == DEFAULT_HUB_URL && caller.contains_key(host) {
            continue;
        }
        merged.insert(host.clone(), credentials.clone());
    }
    merged
}

/// Credentials for an image reference's registry, from the merged config.
fn registry_auth_for(
    image_ref: &str,
    registry_config: &HashMap<String, RegistryCredentials>,
) -> Option<RegistryCredentials> {
    let (repository, _) = split_tag(image_ref);
    let repo = parse_repo(repository).ok()?;

    let mut keys = vec![
        repo.index_url.clone(),
        format!("{}/", repo.index_url),
        repo.index_name.clone(),
    ];
    if repo.official {
        keys.push(DEFAULT_HUB_URL.to_string());
    }
    keys.into_iter()
        .find_map(|key| registry_config.get(&key).cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use slipway_core::descriptor::{BuildSpec, ImageDescriptor};
    use slipway_core::error::Result;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use crate::daemon::{DaemonVersion, ImageInspect};
    use crate::resolve::PROJECT_TYPE_STANDARD;
    use crate::task::TaskSet;

    /// Replays a fixed event script and records the options it was given.
    struct ScriptedDaemon {
        build_events: Vec<BuildEvent>,
        pull_events: Vec<PullEvent>,
        seen_build_options: Mutex<Vec<BuildOptions>>,
        seen_pull_auth: Mutex<Vec<Option<RegistryCredentials>>>,
    }

    impl ScriptedDaemon {
        fn new(build_events: Vec<BuildEvent>, pull_events: Vec<PullEvent>) -> Self {
            Self {
                build_events,
                pull_events,
                seen_build_options: Mutex::new(Vec::new()),
                seen_pull_auth: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Daemon for ScriptedDaemon {
        async fn version(&self) -> Result<DaemonVersion> {
            Ok(DaemonVersion {
                api_version: "1.41".to_string(),
            })
        }

        async fn build(
            &self,
            options: BuildOptions,
            _context: Vec<u8>,
        ) -> Result<mpsc::Receiver<BuildEvent>> {
            self.seen_build_options.lock().unwrap().push(options);
            let (sender, receiver) = mpsc::channel(16);
            for event in self.build_events.clone() {
                sender.send(event).await.ok();
            }
            Ok(receiver)
        }

        async fn pull(
            &self,
            _image_ref: &str,
            auth: Option<RegistryCredentials>,
        ) -> Result<mpsc::Receiver<PullEvent>> {
            self.seen_pull_auth.lock().unwrap().push(auth);
            let (sender, receiver) = mpsc::channel(16);
            for event in self.pull_events.clone() {
                sender.send(event).await.ok();
            }
            Ok(receiver)
        }

        async fn inspect_image(&self, name: &str) -> Result<ImageInspect> {
            Ok(ImageInspect {
                id: format!("sha256:{}", name),
                tags: vec![name.to_string()],
            })
        }

        async fn distribution_media_type(&self, _image_ref: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn build_task(tag: Option<&str>) -> BuildTask {
        let set = TaskSet::from_descriptors(&[ImageDescriptor::build(
            "api",
            BuildSpec {
                context: ".".to_string(),
                tag: tag.map(str::to_string),
                ..Default::default()
            },
        )])
        .unwrap();
        set.into_tasks().pop().unwrap()
    }

    fn external_task(image: &str) -> BuildTask {
        let set = TaskSet::from_descriptors(&[ImageDescriptor::external("cache", image)]).unwrap();
        set.into_tasks().pop().unwrap()
    }

    fn resolution() -> Resolution {
        Resolution {
            project_type: PROJECT_TYPE_STANDARD.to_string(),
            resolved_name: "Dockerfile".to_string(),
            dockerfile: "FROM alpine".to_string(),
            dockerfile_path: None,
            docker_platform: Some("linux/amd64".to_string()),
            context_tar: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_build_success_uses_tag_as_name() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![
                BuildEvent::Output("Step 1/1".to_string()),
                BuildEvent::Layer("sha256:aaa".to_string()),
                BuildEvent::Success {
                    image_id: "sha256:fff".to_string(),
                },
            ],
            vec![],
        ));
        let driver = BuildDriver::new(daemon);
        let task = build_task(Some("api:latest"));
        let metadata = MetadataStore::new();

        let record = driver
            .build_service(&task, Ok(resolution()), &metadata, &DriveOptions::default(), true)
            .await;

        assert!(record.successful);
        assert_eq!(record.name.as_deref(), Some("api:latest"));
        assert_eq!(record.layers, vec!["sha256:aaa"]);
        assert_eq!(record.project_type.as_deref(), Some(PROJECT_TYPE_STANDARD));
        assert_eq!(record.dockerfile.as_deref(), Some("FROM alpine"));
        assert!(record.end_time >= record.start_time);
    }

    #[tokio::test]
    async fn test_build_success_without_tag_uses_image_id() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![BuildEvent::Success {
                image_id: "sha256:fff".to_string(),
            }],
            vec![],
        ));
        let driver = BuildDriver::new(daemon);
        let task = build_task(None);
        let metadata = MetadataStore::new();

        let record = driver
            .build_service(&task, Ok(resolution()), &metadata, &DriveOptions::default(), true)
            .await;
        assert_eq!(record.name.as_deref(), Some("sha256:fff"));
    }

    #[tokio::test]
    async fn test_build_failure_preserves_layer_chain() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![
                BuildEvent::Layer("sha256:aaa".to_string()),
                BuildEvent::Layer("sha256:bbb".to_string()),
                BuildEvent::Failure {
                    message: "Dockerfile parse error line 1: unknown instruction: FOO".to_string(),
                },
            ],
            vec![],
        ));
        let driver = BuildDriver::new(daemon);
        let task = build_task(Some("api:latest"));
        let metadata = MetadataStore::new();

        let record = driver
            .build_service(&task, Ok(resolution()), &metadata, &DriveOptions::default(), true)
            .await;

        assert!(!record.successful);
        assert_eq!(record.layers, vec!["sha256:aaa", "sha256:bbb"]);
        assert_eq!(record.name.as_deref(), Some("sha256:bbb"));
        assert!(record
            .error
            .as_deref()
            .unwrap()
            .contains("unknown instruction"));
        assert!(record.end_time >= record.start_time);
    }

    #[tokio::test]
    async fn test_unresolved_task_reported_not_raised() {
        let daemon = Arc::new(ScriptedDaemon::new(vec![], vec![]));
        let driver = BuildDriver::new(daemon);
        let task = build_task(None);
        let metadata = MetadataStore::new();

        let record = driver
            .build_service(
                &task,
                Err(SlipwayError::ProjectResolutionError {
                    service: "api".to_string(),
                    message: "No suitable Dockerfile found in build context".to_string(),
                }),
                &metadata,
                &DriveOptions::default(),
                true,
            )
            .await;

        assert!(!record.successful);
        assert!(record.error.as_deref().unwrap().contains("api"));
        assert!(record.name.is_none());
    }

    #[tokio::test]
    async fn test_platform_forwarded_only_when_allowed() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![BuildEvent::Success {
                image_id: "sha256:fff".to_string(),
            }],
            vec![],
        ));
        let driver = BuildDriver::new(Arc::clone(&daemon) as Arc<dyn Daemon>);
        let task = build_task(None);
        let metadata = MetadataStore::new();

        driver
            .build_service(&task, Ok(resolution()), &metadata, &DriveOptions::default(), false)
            .await;
        driver
            .build_service(&task, Ok(resolution()), &metadata, &DriveOptions::default(), true)
            .await;

        let seen = daemon.seen_build_options.lock().unwrap();
        assert_eq!(seen[0].platform, None);
        assert_eq!(seen[1].platform.as_deref(), Some("linux/amd64"));
    }

    #[tokio::test]
    async fn test_buildargs_merge_order() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![BuildEvent::Success {
                image_id: "sha256:fff".to_string(),
            }],
            vec![],
        ));
        let driver = BuildDriver::new(Arc::clone(&daemon) as Arc<dyn Daemon>);

        let mut task = build_task(None);
        task.args
            .insert("SHARED".to_string(), "task".to_string());
        task.args.insert("TASK".to_string(), "1".to_string());

        let mut metadata = MetadataStore::new();
        metadata
            .add_file(
                ".balena",
                "balena.yml",
                b"build-variables:\n  global:\n    SHARED: meta\n    META: \"1\"\n".to_vec(),
            )
            .unwrap();
        metadata.parse().unwrap();

        let options = DriveOptions {
            buildargs: HashMap::from([("CALLER".to_string(), "1".to_string())]),
            ..Default::default()
        };

        driver
            .build_service(&task, Ok(resolution()), &metadata, &options, true)
            .await;

        let seen = daemon.seen_build_options.lock().unwrap();
        let args = &seen[0].buildargs;
        assert_eq!(args.get("SHARED").map(String::as_str), Some("task"));
        assert_eq!(args.get("META").map(String::as_str), Some("1"));
        assert_eq!(args.get("TASK").map(String::as_str), Some("1"));
        assert_eq!(args.get("CALLER").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_secrets_bound_read_only() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![BuildEvent::Success {
                image_id: "sha256:fff".to_string(),
            }],
            vec![],
        ));
        let driver = BuildDriver::new(Arc::clone(&daemon) as Arc<dyn Daemon>);
        let task = build_task(None);

        let mut metadata = MetadataStore::new();
        metadata
            .add_file(
                ".balena",
                "balena.yml",
                b"build-secrets:\n  global:\n    - source: token.txt\n      dest: token\n".to_vec(),
            )
            .unwrap();
        metadata
            .add_file(".balena", "secrets/token.txt", b"t".to_vec())
            .unwrap();
        metadata.parse().unwrap();

        driver
            .build_service(&task, Ok(resolution()), &metadata, &DriveOptions::default(), true)
            .await;

        let seen = daemon.seen_build_options.lock().unwrap();
        assert_eq!(seen[0].binds.len(), 1);
        assert!(seen[0].binds[0].ends_with(":/run/secrets:ro"));
    }

    #[tokio::test]
    async fn test_base_tags_fall_back_to_dockerfile() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![BuildEvent::Success {
                image_id: "sha256:fff".to_string(),
            }],
            vec![],
        ));
        let driver = BuildDriver::new(daemon);
        let task = build_task(None);
        let metadata = MetadataStore::new();

        let mut resolution = resolution();
        resolution.dockerfile = "FROM golang:1.21 AS builder\nFROM alpine".to_string();

        let record = driver
            .build_service(&task, Ok(resolution), &metadata, &DriveOptions::default(), true)
            .await;
        assert_eq!(
            record.base_image_tags,
            vec![
                RepoTag {
                    repository: "golang".to_string(),
                    tag: "1.21".to_string(),
                },
                RepoTag {
                    repository: "alpine".to_string(),
                    tag: "latest".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_hook_receives_output_lines() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![
                BuildEvent::Output("Step 1/2".to_string()),
                BuildEvent::Output("Step 2/2".to_string()),
                BuildEvent::Success {
                    image_id: "sha256:fff".to_string(),
                },
            ],
            vec![],
        ));
        let driver = BuildDriver::new(daemon);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut task = build_task(None);
        let sink = Arc::clone(&seen);
        task.stream_hook = Some(Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }));
        let metadata = MetadataStore::new();

        driver
            .build_service(&task, Ok(resolution()), &metadata, &DriveOptions::default(), true)
            .await;
        assert_eq!(*seen.lock().unwrap(), vec!["Step 1/2", "Step 2/2"]);
    }

    #[tokio::test]
    async fn test_progress_hook_receives_pull_progress() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![],
            vec![
                PullEvent::Progress("Downloading".to_string()),
                PullEvent::Progress("Extracting".to_string()),
                PullEvent::Done,
            ],
        ));
        let driver = BuildDriver::new(daemon);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut task = external_task("alpine");
        let sink = Arc::clone(&seen);
        task.progress_hook = Some(Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        }));

        driver.pull_external(&task, &DriveOptions::default()).await;
        assert_eq!(*seen.lock().unwrap(), vec!["Downloading", "Extracting"]);
    }

    #[tokio::test]
    async fn test_pull_external_success() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![],
            vec![
                PullEvent::Progress("Downloading".to_string()),
                PullEvent::Done,
            ],
        ));
        let driver = BuildDriver::new(daemon);
        let task = external_task("alpine");

        let record = driver.pull_external(&task, &DriveOptions::default()).await;
        assert!(record.successful);
        assert!(record.external);
        assert_eq!(record.name.as_deref(), Some("alpine:latest"));
        assert!(record.end_time >= record.start_time);
    }

    #[tokio::test]
    async fn test_pull_external_failure() {
        let daemon = Arc::new(ScriptedDaemon::new(
            vec![],
            vec![PullEvent::Failure {
                message: "manifest unknown".to_string(),
            }],
        ));
        let driver = BuildDriver::new(daemon);
        let task = external_task("no/such-image");

        let record = driver.pull_external(&task, &DriveOptions::default()).await;
        assert!(!record.successful);
        assert!(record.name.is_none());
        assert!(record.error.as_deref().unwrap().contains("manifest unknown"));
    }

    #[tokio::test]
    async fn test_pull_uses_registry_credentials() {
        let daemon = Arc::new(ScriptedDaemon::new(vec![], vec![PullEvent::Done]));
        let driver = BuildDriver::new(Arc::clone(&daemon) as Arc<dyn Daemon>);
        let task = external_task("quay.io/org/app:v1");

        let options = DriveOptions {
            registry_config: HashMap::from([(
                "quay.io".to_string(),
                RegistryCredentials {
                    username: "ann".to_string(),
                    password: "pw".to_string(),
                },
            )]),
            ..Default::default()
        };

        driver.pull_external(&task, &options).await;
        let seen = daemon.seen_pull_auth.lock().unwrap();
        assert_eq!(
            seen[0].as_ref().map(|c| c.username.as_str()),
            Some("ann")
        );
    }

    #[test]
    fn test_merge_registry_config_archive_wins() {
        let archive = HashMap::from([(
            "quay.io".to_string(),
            RegistryCredentials {
                username: "archive".to_string(),
                password: "a".to_string(),
            },
        )]);
        let caller = HashMap::from([(
            "quay.io".to_string(),
            RegistryCredentials {
                username: "caller".to_string(),
                password: "c".to_string(),
            },
        )]);
        let merged = merge_registry_config(&archive, &caller);
        assert_eq!(merged["quay.io"].username, "archive");
    }

    #[test]
    fn test_merge_registry_config_hub_caller_wins() {
        let archive = HashMap::from([(
            DEFAULT_HUB_URL.to_string(),
            RegistryCredentials {
                username: "archive".to_string(),
                password: "a".to_string(),
            },
        )]);
        let caller = HashMap::from([(
            DEFAULT_HUB_URL.to_string(),
            RegistryCredentials {
                username: "caller".to_string(),
                password: "c".to_string(),
            },
        )]);
        let merged = merge_registry_config(&archive, &caller);
        assert_eq!(merged[DEFAULT_HUB_URL].username, "caller");
    }
}
