//! Build tasks: the unit of work derived from a composition.
//!
//! Each service in the composition becomes one [`BuildTask`]: either an
//! external image to pull, or a local build fed by a per-task tar pack that
//! the demultiplexer fills from the uploaded project archive.

use std::collections::HashMap;
use std::sync::Arc;

use slipway_core::descriptor::{ImageDescriptor, ImageSource};
use slipway_core::error::{Result, SlipwayError};

use crate::paths;

/// Observer for build or pull output lines.
pub type OutputHook = Arc<dyn Fn(&str) + Send + Sync>;

/// One unit of work against the daemon.
///
/// A task is either `external` with `image_ref` set and no build stream, or a
/// build task with a pack that is filled during demultiplexing and consumed
/// exactly once by the resolver.
pub struct BuildTask {
    /// Service name, unique within the run.
    pub service_name: String,
    /// True when the image is pulled instead of built.
    pub external: bool,
    /// Image reference for external tasks, always tagged.
    pub image_ref: Option<String>,
    /// Normalized context root inside the archive; `.` is the archive root.
    pub context: String,
    /// Dockerfile path inside the context, when declared by the composition.
    /// Rewritten to `.resin/Dockerfile` during demultiplexing.
    pub dockerfile_path: Option<String>,
    /// Build arguments from the composition.
    pub args: HashMap<String, String>,
    /// Image labels from the composition.
    pub labels: HashMap<String, String>,
    /// Tag for the built image.
    pub tag: Option<String>,
    /// Observer for raw build output lines.
    pub stream_hook: Option<OutputHook>,
    /// Observer for pull progress lines.
    pub progress_hook: Option<OutputHook>,

    /// Output pack the demultiplexer writes into; build tasks only.
    pub(crate) pack: Option<tar::Builder<Vec<u8>>>,
    /// Finalized pack bytes, present once demultiplexing completes.
    pub(crate) context_tar: Option<Vec<u8>>,
}

impl BuildTask {
    fn external_task(service_name: &str, image: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            external: true,
            image_ref: Some(ensure_tag(image)),
            context: ".".to_string(),
            dockerfile_path: None,
            args: HashMap::new(),
            labels: HashMap::new(),
            tag: None,
            stream_hook: None,
            progress_hook: None,
            pack: None,
            context_tar: None,
        }
    }

    fn build_task(service_name: &str, spec: &slipway_core::descriptor::BuildSpec) -> Result<Self> {
        if spec.context.is_empty() && spec.dockerfile.is_some() {
            return Err(SlipwayError::ValidationError(format!(
                "Service '{}' specifies a dockerfile but no build context",
                service_name
            )));
        }

        Ok(Self {
            service_name: service_name.to_string(),
            external: false,
            image_ref: None,
            context: paths::normalize(&spec.context),
            dockerfile_path: spec.dockerfile.clone().map(|d| paths::normalize(&d)),
            args: spec.args.clone(),
            labels: spec.labels.clone(),
            tag: spec.tag.clone(),
            stream_hook: None,
            progress_hook: None,
            pack: Some(tar::Builder::new(Vec::new())),
            context_tar: None,
        })
    }

    /// True for tasks built from a local context.
    pub fn is_build(&self) -> bool {
        !self.external
    }

    /// Take the finalized context tar. Readable exactly once.
    pub(crate) fn take_context_tar(&mut self) -> Option<Vec<u8>> {
        self.context_tar.take()
    }
}

/// The ordered set of tasks for one invocation.
pub struct TaskSet {
    tasks: Vec<BuildTask>,
}

impl TaskSet {
    /// Translate composition descriptors into tasks, preserving service
    /// order.
    pub fn from_descriptors(descriptors: &[ImageDescriptor]) -> Result<Self> {
        let mut tasks = Vec::with_capacity(descriptors.len());
        let mut seen = std::collections::HashSet::new();

        for descriptor in descriptors {
            let name = descriptor.service_name.as_str();
            if name.is_empty() {
                return Err(SlipwayError::ValidationError(
                    "Composition contains a service with an empty name".to_string(),
                ));
            }
            if !seen.insert(name.to_string()) {
                return Err(SlipwayError::ValidationError(format!(
                    "Duplicate service name '{}' in composition",
                    name
                )));
            }

            let task = match &descriptor.source {
                ImageSource::External { image } => BuildTask::external_task(name, image),
                ImageSource::Build(spec) => BuildTask::build_task(name, spec)?,
            };
            tasks.push(task);
        }

        Ok(Self { tasks })
    }

    /// All tasks, in composition order.
    pub fn tasks(&self) -> &[BuildTask] {
        &self.tasks
    }

    /// Mutable access for the demultiplexer and orchestrator.
    pub fn tasks_mut(&mut self) -> &mut [BuildTask] {
        &mut self.tasks
    }

    /// Consume the set, yielding tasks in composition order.
    pub fn into_tasks(self) -> Vec<BuildTask> {
        self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Append `:latest` when the reference carries no tag after its last path
/// segment. A colon in a registry host (`reg:5000/img`) is not a tag.
fn ensure_tag(image: &str) -> String {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}
