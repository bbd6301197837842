//! Tar stream demultiplexer.
//!
//! Consumes the uploaded project archive in a single pass and routes every
//! entry to the per-service build packs whose context contains it, renamed
//! context-relative. Entries under the reserved metadata directory are
//! diverted to the [`MetadataStore`] instead and never reach a pack. The
//! archive may be gzip-compressed; the first two bytes decide.

use std::io::{BufRead, BufReader, Read};

use flate2::read::GzDecoder;

use slipway_core::error::{Result, SlipwayError};

use crate::metadata::{MetadataStore, METADATA_DIRECTORIES};
use crate::paths;
use crate::task::TaskSet;

/// Fixed pack path an alternate Dockerfile is duplicated under, so the
/// daemon sees a predictable location. Observable in results as the task's
/// `dockerfile_path`.
pub const ALTERNATE_DOCKERFILE_PATH: &str = ".resin/Dockerfile";

/// Emulation binary forwarded into build contexts even when it arrives under
/// the metadata directory.
const QEMU_BINARY_NAME: &str = "qemu-execve";

/// Split one project archive into the per-task packs.
///
/// Runs single-threaded: tar framing is sequential, and writing each entry to
/// its packs before reading the next preserves input order within every pack.
/// On success every build task's pack has been finalized exactly once.
pub fn split_archive<R: Read>(
    input: R,
    tasks: &mut TaskSet,
    metadata: &mut MetadataStore,
) -> Result<()> {
    let mut reader = BufReader::new(input);
    let head = reader.fill_buf().map_err(tar_error)?;
    let gzipped = head.len() >= 2 && head[0] == 0x1f && head[1] == 0x8b;

    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };
    let mut archive = tar::Archive::new(reader);

    // A task's declared Dockerfile, as an archive-root path. Captured before
    // the loop: matching entries are duplicated under the fixed alternate
    // path and the task's dockerfile_path is rewritten afterwards.
    let alternates: Vec<Option<String>> = tasks
        .tasks()
        .iter()
        .map(|t| {
            if t.external {
                return None;
            }
            t.dockerfile_path
                .as_ref()
                .map(|d| paths::normalize(&format!("{}/{}", t.context, d)))
        })
        .collect();
    let mut alternate_found = vec![false; alternates.len()];

    for entry in archive.entries().map_err(tar_error)? {
        let mut entry = entry.map_err(tar_error)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = paths::normalize(&String::from_utf8_lossy(&entry.path_bytes()));
        let basename = name.rsplit('/').next().unwrap_or(&name);

        // Metadata interception, with the emulation-binary exception.
        if basename != QEMU_BINARY_NAME {
            if let Some(dir) = METADATA_DIRECTORIES
                .iter()
                .find(|d| paths::contains(d, &name) && name != **d)
            {
                let mut bytes = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut bytes).map_err(tar_error)?;
                metadata.add_file(dir, &paths::relative(dir, &name), bytes)?;
                continue;
            }
        }

        let containing: Vec<usize> = tasks
            .tasks()
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_build() && paths::contains(&t.context, &name))
            .map(|(i, _)| i)
            .collect();
        let alternate_for: Vec<usize> = alternates
            .iter()
            .enumerate()
            .filter(|(_, a)| a.as_deref() == Some(name.as_str()))
            .map(|(i, _)| i)
            .collect();

        if containing.is_empty() && alternate_for.is_empty() {
            // Unconsumed entry; the archive reader skips its body.
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes).map_err(tar_error)?;
        let header = entry.header().clone();

        for index in containing {
            let task = &mut tasks.tasks_mut()[index];
            let relative = paths::relative(&task.context, &name);
            if relative.is_empty() {
                continue;
            }
            append_entry(task.pack.as_mut(), &header, &relative, &bytes)?;
        }

        for index in alternate_for {
            alternate_found[index] = true;
            let task = &mut tasks.tasks_mut()[index];
            append_entry(task.pack.as_mut(), &header, ALTERNATE_DOCKERFILE_PATH, &bytes)?;
        }
    }

    // End-of-archive: finalize every build pack and publish the rewritten
    // Dockerfile locations.
    for (index, task) in tasks.tasks_mut().iter_mut().enumerate() {
        if let Some(pack) = task.pack.take() {
            let data = pack.into_inner().map_err(tar_error)?;
            task.context_tar = Some(data);
        }
        if alternate_found[index] {
            task.dockerfile_path = Some(ALTERNATE_DOCKERFILE_PATH.to_string());
        }
    }

    Ok(())
}

fn append_entry(
    pack: Option<&mut tar::Builder<Vec<u8>>>,
    header: &tar::Header,
    name: &str,
    bytes: &[u8],
) -> Result<()> {
    let pack = pack.ok_or_else(|| {
        SlipwayError::TarError("Output pack already finalized".to_string())
    })?;
    let mut header = header.clone();
    pack.append_data(&mut header, name, bytes)
        .map_err(tar_error)
}

fn tar_error(err: std::io::Error) -> SlipwayError {
    SlipwayError::TarError(err.to_string())
}
