//! Pipeline orchestration.
//!
//! The single entry point composing the stages: composition descriptors
//! become tasks, the archive is demultiplexed once on a blocking worker,
//! metadata is parsed, and every task then resolves and builds on its own
//! worker. Results come back in composition order.
//!
//! Per-service faults (unresolvable project, failed build) are embedded in
//! the returned records; only cross-cutting faults (invalid archive, invalid
//! metadata, unreachable daemon) abort the run. Dropping the returned future
//! drops every worker and with it the daemon streams they hold.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use tokio::task::JoinSet;

use slipway_core::descriptor::ImageDescriptor;
use slipway_core::error::{Result, SlipwayError};

use crate::daemon::Daemon;
use crate::demux;
use crate::drive::{BuildDriver, DriveOptions, LocalImage};
use crate::metadata::{MetadataStore, RegistryCredentials};
use crate::platform;
use crate::resolve::{self, BuildTarget};
use crate::task::TaskSet;

/// Caller inputs for one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Target architecture slug (e.g., "amd64", "armv7hf").
    pub arch: String,
    /// Target device type slug (e.g., "raspberrypi3").
    pub device_type: String,
    /// Extra Dockerfile.template variables.
    pub template_vars: HashMap<String, String>,
    /// Build arguments applied to every build, over the per-task ones.
    pub buildargs: HashMap<String, String>,
    /// Caller-provided registry credentials.
    pub registry_config: HashMap<String, RegistryCredentials>,
    /// Raw daemon build options, passed through untouched.
    pub docker_opts: serde_json::Map<String, serde_json::Value>,
}

/// Build a composition from an uploaded project archive.
///
/// Returns one [`LocalImage`] per service, in composition order.
pub async fn run<R>(
    daemon: Arc<dyn Daemon>,
    composition: &[ImageDescriptor],
    archive: R,
    options: RunOptions,
) -> Result<Vec<LocalImage>>
where
    R: Read + Send + 'static,
{
    let tasks = TaskSet::from_descriptors(composition)?;
    run_tasks(daemon, tasks, archive, options).await
}

/// Build a prepared task set from an uploaded project archive.
///
/// Like [`run`], but takes tasks directly so the caller can attach
/// per-task output observers first.
pub async fn run_tasks<R>(
    daemon: Arc<dyn Daemon>,
    tasks: TaskSet,
    archive: R,
    options: RunOptions,
) -> Result<Vec<LocalImage>>
where
    R: Read + Send + 'static,
{
    let count = tasks.len();
    tracing::info!(services = count, "Starting multi-service build");

    // Tar framing is sequential: one blocking worker consumes the archive
    // and fans entries out to the per-task packs.
    let metadata = MetadataStore::new();
    let (tasks, mut metadata) = tokio::task::spawn_blocking(move || {
        let mut tasks = tasks;
        let mut metadata = metadata;
        demux::split_archive(archive, &mut tasks, &mut metadata)?;
        Ok::<_, SlipwayError>((tasks, metadata))
    })
    .await
    .map_err(|e| SlipwayError::BuildProcessError(format!("Demultiplexer worker failed: {}", e)))??;

    metadata.parse()?;

    let version = daemon.version().await?;
    let metadata = Arc::new(metadata);
    let driver = Arc::new(BuildDriver::new(Arc::clone(&daemon)));
    let target = Arc::new(BuildTarget {
        arch: options.arch,
        device_type: options.device_type,
        template_vars: options.template_vars,
    });
    let drive_options = Arc::new(DriveOptions {
        buildargs: options.buildargs,
        registry_config: options.registry_config,
        extra: options.docker_opts,
    });

    let mut workers = JoinSet::new();
    for (index, mut task) in tasks.into_tasks().into_iter().enumerate() {
        let daemon = Arc::clone(&daemon);
        let metadata = Arc::clone(&metadata);
        let driver = Arc::clone(&driver);
        let target = Arc::clone(&target);
        let drive_options = Arc::clone(&drive_options);
        let version = version.clone();

        workers.spawn(async move {
            let record = if task.external {
                driver.pull_external(&task, &drive_options).await
            } else {
                let resolution = resolve::resolve_task(&mut task, &target);
                let platform_allowed = match &resolution {
                    Ok(resolution) => {
                        platform::platform_supported(daemon, &version, &resolution.dockerfile)
                            .await
                    }
                    Err(_) => false,
                };
                driver
                    .build_service(&task, resolution, &metadata, &drive_options, platform_allowed)
                    .await
            };
            (index, record)
        });
    }

    let mut slots: Vec<Option<LocalImage>> = std::iter::repeat_with(|| None).take(count).collect();
    while let Some(joined) = workers.join_next().await {
        let (index, record) = joined
            .map_err(|e| SlipwayError::BuildProcessError(format!("Task worker failed: {}", e)))?;
        slots[index] = Some(record);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                SlipwayError::BuildProcessError(format!("No result produced for task {}", index))
            })
        })
        .collect()
}
