//! Ordered bind mounts with all-or-nothing semantics.
//!
//! [`bind_mount`] performs a list of bind mounts in order and rolls back the
//! ones it already made when a later one fails. [`bind_unmount`] tears a list
//! of targets down, tolerating targets that are missing or not mounted.
//!
//! The syscalls sit behind the [`Mounter`] trait so the engine can be driven
//! against an in-memory [`fake::FakeMounter`] in tests.

use std::fmt;
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::CsiError;

const MOUNTINFO: &str = "/proc/self/mountinfo";
const ROOT_DIR_MODE: u32 = 0o750;

/// One bind mount of `source` onto `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Host directory to expose.
    pub source: PathBuf,
    /// Where the source becomes visible.
    pub target: PathBuf,
    /// Remount the bind read-only.
    pub read_only: bool,
}

impl BindMount {
    /// A read-write bind.
    #[must_use]
    pub fn rw(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// A read-only bind.
    #[must_use]
    pub fn ro(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: true,
        }
    }
}

/// A failed mount or unmount sequence.
///
/// Carries the first failure plus every failure hit while rolling back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub struct MountError {
    /// The failure that aborted the sequence.
    pub failure: String,
    /// Failures hit while undoing earlier steps.
    pub rollback: Vec<String>,
}

impl MountError {
    fn new(failure: String) -> Self {
        Self {
            failure,
            rollback: Vec::new(),
        }
    }
}

impl fmt::Display for MountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.failure)?;
        if !self.rollback.is_empty() {
            write!(f, " (rollback failures: {})", self.rollback.join("; "))?;
        }
        Ok(())
    }
}

impl From<MountError> for CsiError {
    fn from(err: MountError) -> Self {
        Self::Internal(err.to_string())
    }
}

/// The mount syscalls the engine needs.
pub trait Mounter: Send + Sync {
    /// Bind `source` onto `target`, read-only if requested.
    ///
    /// # Errors
    ///
    /// Returns the OS error of the failed syscall.
    fn bind(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()>;

    /// Unmount `target`.
    ///
    /// # Errors
    ///
    /// Returns the OS error of the failed syscall.
    fn unmount(&self, target: &Path) -> io::Result<()>;

    /// Check whether `path` is currently a mount point.
    ///
    /// A path that does not exist is not a mount point.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    fn is_mount_point(&self, path: &Path) -> io::Result<bool>;
}

/// Perform `mounts` in order, rolling back on the first failure.
///
/// `root_dir` is created with mode 0750 if absent. When a mount fails, every
/// mount made by this call is undone in reverse order and `root_dir` is
/// removed. `root_dir` is left in place if any rollback unmount failed,
/// since removing it would recurse into a still-mounted tree.
///
/// # Errors
///
/// Returns a [`MountError`] describing the first failure and any rollback
/// failures.
pub fn bind_mount(
    mounter: &dyn Mounter,
    root_dir: &Path,
    mounts: &[BindMount],
) -> Result<(), MountError> {
    DirBuilder::new()
        .recursive(true)
        .mode(ROOT_DIR_MODE)
        .create(root_dir)
        .map_err(|e| MountError::new(format!("create {}: {e}", root_dir.display())))?;

    let mut done: Vec<&BindMount> = Vec::with_capacity(mounts.len());
    for entry in mounts {
        match mount_one(mounter, entry) {
            Ok(()) => {
                debug!(
                    source = %entry.source.display(),
                    target = %entry.target.display(),
                    read_only = entry.read_only,
                    "Bind mounted"
                );
                done.push(entry);
            }
            Err(e) => {
                let mut err = MountError::new(format!(
                    "bind {} -> {}: {e}",
                    entry.source.display(),
                    entry.target.display()
                ));
                for prior in done.iter().rev() {
                    if let Err(e) = mounter.unmount(&prior.target) {
                        err.rollback
                            .push(format!("unmount {}: {e}", prior.target.display()));
                    }
                }
                if err.rollback.is_empty() {
                    if let Err(e) = fs::remove_dir_all(root_dir) {
                        if e.kind() != io::ErrorKind::NotFound {
                            err.rollback
                                .push(format!("remove {}: {e}", root_dir.display()));
                        }
                    }
                }
                warn!(error = %err, "Bind mount sequence rolled back");
                return Err(err);
            }
        }
    }

    Ok(())
}

fn mount_one(mounter: &dyn Mounter, entry: &BindMount) -> io::Result<()> {
    if !entry.target.exists() {
        fs::create_dir_all(&entry.target)?;
    }
    mounter.bind(&entry.source, &entry.target, entry.read_only)
}

/// Unmount every target in the given order.
///
/// Missing targets and targets that are not mount points are skipped.
/// Failures do not stop the sequence.
///
/// # Errors
///
/// Returns a single [`MountError`] aggregating every failed unmount.
pub fn bind_unmount(mounter: &dyn Mounter, targets: &[PathBuf]) -> Result<(), MountError> {
    let mut failures = Vec::new();

    for target in targets {
        if !target.exists() {
            continue;
        }
        match mounter.is_mount_point(target) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                failures.push(format!("inspect {}: {e}", target.display()));
                continue;
            }
        }
        match mounter.unmount(target) {
            Ok(()) => debug!(target = %target.display(), "Unmounted"),
            Err(e) => failures.push(format!("unmount {}: {e}", target.display())),
        }
    }

    match failures.split_first() {
        None => Ok(()),
        Some((first, rest)) => Err(MountError {
            failure: first.clone(),
            rollback: rest.to_vec(),
        }),
    }
}

/// [`Mounter`] backed by the `mount(2)` and `umount2(2)` syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMounter;

impl Mounter for SystemMounter {
    fn bind(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()> {
        mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )?;

        if read_only {
            // A bind ignores MS_RDONLY on the first call; it takes a remount.
            let flags = MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY;
            if let Err(e) = mount(None::<&str>, target, None::<&str>, flags, None::<&str>) {
                if let Err(undo) = umount2(target, MntFlags::empty()) {
                    warn!(target = %target.display(), error = %undo, "Failed to undo bind after remount failure");
                }
                return Err(e.into());
            }
        }

        info!(source = %source.display(), target = %target.display(), read_only, "Mounted");
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        umount2(target, MntFlags::empty())?;
        Ok(())
    }

    fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        let path = match fs::canonicalize(path) {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        let table = fs::read_to_string(MOUNTINFO)?;
        Ok(mountinfo_contains(&table, &path))
    }
}

/// Check whether a `/proc/self/mountinfo` table lists `path` as a mount point.
fn mountinfo_contains(table: &str, path: &Path) -> bool {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .any(|mount_point| Path::new(&unescape_mountinfo(mount_point)) == path)
}

/// Undo the octal escaping mountinfo applies to spaces, tabs, newlines and
/// backslashes.
fn unescape_mountinfo(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let value = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(value) = value {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// An in-memory mounter for testing without privileges.
#[cfg(any(test, feature = "test-utils"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;

    /// Records binds instead of performing them.
    #[derive(Default)]
    pub struct FakeMounter {
        mounted: Mutex<Vec<BindMount>>,
        fail_on: Mutex<Option<PathBuf>>,
        fail_unmount: Mutex<bool>,
    }

    impl FakeMounter {
        /// Create a new fake mounter with nothing mounted.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next bind onto `target` fail.
        pub fn fail_on(&self, target: impl Into<PathBuf>) {
            *self.fail_on.lock() = Some(target.into());
        }

        /// Make every unmount fail.
        pub fn fail_unmounts(&self, fail: bool) {
            *self.fail_unmount.lock() = fail;
        }

        /// Currently mounted binds, in mount order.
        #[must_use]
        pub fn mounts(&self) -> Vec<BindMount> {
            self.mounted.lock().clone()
        }

        /// Number of binds whose target lives under `root`.
        #[must_use]
        pub fn mounts_under(&self, root: &Path) -> usize {
            self.mounted
                .lock()
                .iter()
                .filter(|m| m.target.starts_with(root))
                .count()
        }
    }

    impl Mounter for FakeMounter {
        fn bind(&self, source: &Path, target: &Path, read_only: bool) -> io::Result<()> {
            let mut fail_on = self.fail_on.lock();
            if fail_on.as_deref() == Some(target) {
                *fail_on = None;
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "injected mount failure",
                ));
            }
            self.mounted.lock().push(BindMount {
                source: source.to_path_buf(),
                target: target.to_path_buf(),
                read_only,
            });
            Ok(())
        }

        fn unmount(&self, target: &Path) -> io::Result<()> {
            if *self.fail_unmount.lock() {
                return Err(io::Error::other("injected unmount failure"));
            }
            let mut mounted = self.mounted.lock();
            match mounted.iter().rposition(|m| m.target == target) {
                Some(index) => {
                    mounted.remove(index);
                    Ok(())
                }
                None => Err(io::Error::new(io::ErrorKind::InvalidInput, "not mounted")),
            }
        }

        fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
            Ok(self.mounted.lock().iter().any(|m| m.target == path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeMounter;
    use super::*;
    use tempfile::TempDir;

    fn four_mounts(src: &Path, target: &Path) -> Vec<BindMount> {
        vec![
            BindMount::ro(src.join("bin"), target),
            BindMount::rw(src.join("conf"), target.join("agent/conf")),
            BindMount::rw(src.join("log"), target.join("log")),
            BindMount::rw(src.join("data"), target.join("datastorage")),
        ]
    }

    #[test]
    fn mounts_in_order() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        let mounter = FakeMounter::new();
        let mounts = four_mounts(dir.path(), &target);

        bind_mount(&mounter, &target, &mounts).unwrap();

        assert_eq!(mounter.mounts(), mounts);
        assert!(target.join("agent/conf").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn root_dir_created_with_restricted_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        bind_mount(&FakeMounter::new(), &target, &[]).unwrap();

        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & !0o750, 0);
    }

    #[test]
    fn failure_rolls_back_prior_mounts_and_removes_root() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        let mounter = FakeMounter::new();
        mounter.fail_on(target.join("log"));

        let err = bind_mount(&mounter, &target, &four_mounts(dir.path(), &target)).unwrap_err();

        assert!(err.failure.contains("injected mount failure"));
        assert!(err.rollback.is_empty());
        assert!(mounter.mounts().is_empty());
        assert!(!target.exists());
    }

    #[test]
    fn rollback_failures_are_reported_and_root_kept() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        let mounter = FakeMounter::new();
        mounter.fail_on(target.join("datastorage"));
        mounter.fail_unmounts(true);

        let err = bind_mount(&mounter, &target, &four_mounts(dir.path(), &target)).unwrap_err();

        assert_eq!(err.rollback.len(), 3);
        assert!(err.to_string().contains("rollback failures"));
        assert!(target.exists());
    }

    #[test]
    fn unmount_skips_missing_and_unmounted_targets() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        let mounter = FakeMounter::new();
        let mounts = four_mounts(dir.path(), &target);
        bind_mount(&mounter, &target, &mounts).unwrap();

        let mut targets: Vec<PathBuf> = mounts.iter().rev().map(|m| m.target.clone()).collect();
        targets.push(dir.path().join("never-created"));
        bind_unmount(&mounter, &targets).unwrap();
        assert!(mounter.mounts().is_empty());

        // Second pass: everything exists but nothing is mounted.
        bind_unmount(&mounter, &targets).unwrap();
    }

    #[test]
    fn unmount_aggregates_failures() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        let mounter = FakeMounter::new();
        let mounts = four_mounts(dir.path(), &target);
        bind_mount(&mounter, &target, &mounts).unwrap();
        mounter.fail_unmounts(true);

        let targets: Vec<PathBuf> = mounts.iter().rev().map(|m| m.target.clone()).collect();
        let err = bind_unmount(&mounter, &targets).unwrap_err();

        assert!(err.failure.contains("datastorage"));
        assert_eq!(err.rollback.len(), 3);
    }

    #[test]
    fn missing_path_is_not_a_mount_point() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("not-created-yet");

        assert!(!SystemMounter.is_mount_point(&target).unwrap());
        assert!(!FakeMounter::new().is_mount_point(&target).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn plain_directory_is_not_a_mount_point() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("target")).unwrap();

        assert!(!SystemMounter.is_mount_point(&dir.path().join("target")).unwrap());
    }

    #[test]
    fn mountinfo_lookup_handles_escapes() {
        let table = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
87 22 8:1 /data/t1/bin/1.2.3 /var/lib/kubelet/pods/p\\0401/volumes ro shared:1 - ext4 /dev/sda1 rw
";
        assert!(mountinfo_contains(table, Path::new("/")));
        assert!(mountinfo_contains(
            table,
            Path::new("/var/lib/kubelet/pods/p 1/volumes")
        ));
        assert!(!mountinfo_contains(table, Path::new("/var/lib/kubelet")));
    }
}
