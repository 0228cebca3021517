//! Download and extraction of agent ZIP archives.
//!
//! An archive is streamed to a temp file next to `bin/`, extracted into a
//! staging directory and renamed into place, so `bin/<version>` only ever
//! exists complete. Any failure drops the staging directory.

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use agent_csi_core::paths::AGENT_CONF_SUBDIR;
use agent_csi_core::{Flavor, PathResolver};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::backend::AgentBackend;
use crate::error::{ProvisionerError, Result};

const GROUP_WRITE: u32 = 0o020;

/// Download the agent for `flavor` and install it at `target_dir`.
///
/// Downloads `version` if given, the latest version otherwise. A target that
/// already exists is left untouched.
///
/// # Errors
///
/// Returns an error if the download fails, the archive is invalid or an
/// entry would escape `target_dir`. Nothing is left at `target_dir` then.
pub async fn install_zip(
    backend: &dyn AgentBackend,
    flavor: Flavor,
    version: Option<&str>,
    target_dir: &Path,
) -> Result<()> {
    if target_dir.exists() {
        debug!(path = %target_dir.display(), "Agent already installed");
        return Ok(());
    }
    let parent = target_dir
        .parent()
        .ok_or_else(|| ProvisionerError::Install(format!("{} has no parent", target_dir.display())))?;
    fs::create_dir_all(parent)?;

    let archive = tempfile::NamedTempFile::new_in(parent)?;
    let mut file = tokio::fs::File::from_std(archive.reopen()?);
    backend.get_agent(flavor, version, &mut file).await?;
    file.flush().await?;
    drop(file);

    let staging = tempfile::Builder::new()
        .prefix(".install-")
        .tempdir_in(parent)?;
    let staging_path = staging.path().to_path_buf();
    let reader = archive.reopen()?;
    let extracted = tokio::task::spawn_blocking(move || extract_zip(reader, &staging_path))
        .await
        .map_err(|e| ProvisionerError::Install(format!("extraction task failed: {e}")))??;

    prepare_agent_dir(staging.path())?;
    fs::rename(staging.path(), target_dir)?;

    info!(
        path = %target_dir.display(),
        flavor = %flavor,
        files = extracted,
        "Installed agent"
    );
    Ok(())
}

/// Extract every entry of a ZIP archive under `target_dir`.
///
/// Entry modes are preserved; entries below `agent/conf` are additionally
/// made group-writable. Returns the number of files written.
///
/// # Errors
///
/// Returns an error if the archive is invalid or any entry's cleaned path is
/// outside `target_dir`. Extraction stops at the first such entry.
pub fn extract_zip(archive: File, target_dir: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(archive)?;
    let target_dir = path_clean::clean(target_dir);
    let conf_dir = target_dir.join(AGENT_CONF_SUBDIR);
    let mut files = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let dest = enclosed_path(&target_dir, entry.name())?;
        if dest == target_dir {
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&dest)?;
            io::copy(&mut entry, &mut out)?;
            files += 1;
        }

        let mut mode = entry.unix_mode().map(|mode| mode & 0o7777);
        if dest.starts_with(&conf_dir) {
            mode = Some(mode.unwrap_or(if entry.is_dir() { 0o755 } else { 0o644 }) | GROUP_WRITE);
        }
        if let Some(mode) = mode {
            fs::set_permissions(&dest, fs::Permissions::from_mode(mode))?;
        }
    }

    Ok(files)
}

/// Join `name` onto `root` and reject the result unless it stays under `root`.
fn enclosed_path(root: &Path, name: &str) -> Result<PathBuf> {
    let dest = path_clean::clean(root.join(name));
    if dest.starts_with(root) {
        Ok(dest)
    } else {
        Err(ProvisionerError::Install(format!(
            "archive entry '{name}' escapes the target directory"
        )))
    }
}

/// Finish an installed agent tree: make `agent/conf` group-writable and
/// create the directories volume overlays are mounted on.
///
/// # Errors
///
/// Returns an error if a directory cannot be created or changed.
pub fn prepare_agent_dir(agent_dir: &Path) -> Result<()> {
    let conf_dir = agent_dir.join(AGENT_CONF_SUBDIR);
    if conf_dir.exists() {
        make_group_writable(&conf_dir)?;
    }
    for mount_point in PathResolver::overlay_mount_points(agent_dir) {
        fs::create_dir_all(mount_point)?;
    }
    Ok(())
}

fn make_group_writable(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | GROUP_WRITE);
    fs::set_permissions(path, permissions)?;

    if metadata.is_dir() {
        for entry in fs::read_dir(path)? {
            make_group_writable(&entry?.path())?;
        }
    }
    Ok(())
}
