//! Scoped filesystem mounts.
//!
//! This module provides [`Mount`], an RAII guard for one mount point.
//! A `Mount` is unmounted exactly once: explicitly through
//! [`close()`](Mount::close), or from `Drop` if the owner returned early.

use std::fs;
use std::sync::Arc;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use strum::Display;
use tracing::{debug, info};

use crate::error::CustomizeError;
use crate::executor::{CommandExecutor, CommandSpec};
use crate::privilege::PrivilegeMethod;

/// Mount flag, rendered as a `mount -o` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MountFlag {
    #[strum(serialize = "bind")]
    Bind,
    #[strum(serialize = "ro")]
    ReadOnly,
    #[strum(serialize = "nosuid")]
    NoSuid,
    #[strum(serialize = "nodev")]
    NoDev,
    #[strum(serialize = "noexec")]
    NoExec,
}

/// Description of a mount to acquire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    /// Host source: a directory for bind mounts, a device or pseudo-fs name otherwise.
    pub source: String,
    /// Absolute host path of the mount point.
    pub target: Utf8PathBuf,
    /// Filesystem type; empty for bind mounts.
    pub fs_type: String,
    pub flags: Vec<MountFlag>,
    /// Create the target directory if missing and remove it again after unmount.
    pub make_and_delete_dir: bool,
}

impl MountSpec {
    /// A bind mount of `source` onto `target`.
    pub fn bind(source: impl Into<String>, target: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            fs_type: String::new(),
            flags: vec![MountFlag::Bind],
            make_and_delete_dir: false,
        }
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        if !self.flags.contains(&MountFlag::ReadOnly) {
            self.flags.push(MountFlag::ReadOnly);
        }
        self
    }

    #[must_use]
    pub fn make_and_delete_dir(mut self, enabled: bool) -> Self {
        self.make_and_delete_dir = enabled;
        self
    }

    pub fn is_bind_mount(&self) -> bool {
        self.flags.contains(&MountFlag::Bind)
    }

    /// Builds the `mount` invocation for this spec.
    pub fn build_mount_spec(&self, privilege: Option<PrivilegeMethod>) -> CommandSpec {
        let mut args = Vec::new();
        if !self.fs_type.is_empty() {
            args.push("-t".to_string());
            args.push(self.fs_type.clone());
        }
        if !self.flags.is_empty() {
            args.push("-o".to_string());
            args.push(
                self.flags
                    .iter()
                    .map(|f| f.to_string())
                    .collect::<Vec<_>>()
                    .join(","),
            );
        }
        args.push(self.source.clone());
        args.push(self.target.to_string());
        CommandSpec::new("mount", args).with_privilege(privilege)
    }

    /// Builds the `umount` invocation for this spec.
    pub fn build_umount_spec(&self, privilege: Option<PrivilegeMethod>) -> CommandSpec {
        CommandSpec::new("umount", vec![self.target.to_string()]).with_privilege(privilege)
    }
}

/// Returns the first existing component of `target` below `root` that is a
/// symlink. Walking stops at the first component that does not exist.
pub(crate) fn find_symlink(root: &Utf8Path, target: &Utf8Path) -> std::io::Result<Option<Utf8PathBuf>> {
    let relative = target.strip_prefix("/").unwrap_or(target);
    let mut current = root.to_path_buf();

    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => return Ok(Some(current)),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => break,
            Err(e) => return Err(e),
        }
    }

    Ok(None)
}

/// Checks that no existing component of `target` below `root` is a symlink.
///
/// A symlinked component inside an image could redirect a mount point to an
/// arbitrary host location.
pub(crate) fn validate_no_symlinks(root: &Utf8Path, target: &Utf8Path) -> Result<(), CustomizeError> {
    match find_symlink(root, target) {
        Ok(None) => Ok(()),
        Ok(Some(link)) => Err(CustomizeError::Mount(format!(
            "symlink detected at {} in mount target path {}; \
            this could allow mount point redirection outside the image",
            link, target,
        ))),
        Err(e) => Err(CustomizeError::io(
            format!("failed to check mount target path {}", target),
            e,
        )),
    }
}

/// An active mount.
pub struct Mount {
    spec: MountSpec,
    executor: Arc<dyn CommandExecutor>,
    privilege: Option<PrivilegeMethod>,
    dry_run: bool,
    mounted: bool,
    created_dir: bool,
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("spec", &self.spec)
            .field("mounted", &self.mounted)
            .field("created_dir", &self.created_dir)
            .finish()
    }
}

impl Mount {
    /// Performs the mount described by `spec`.
    ///
    /// Fails with [`CustomizeError::Mount`] if a bind source is missing, the
    /// target is missing (and may not be created), or `mount` is rejected.
    pub fn acquire(
        spec: MountSpec,
        executor: Arc<dyn CommandExecutor>,
        privilege: Option<PrivilegeMethod>,
        dry_run: bool,
    ) -> Result<Self> {
        let mut mount = Self {
            spec,
            executor,
            privilege,
            dry_run,
            mounted: false,
            created_dir: false,
        };
        mount.prepare_paths()?;

        info!("mounting {} on {}", mount.spec.source, mount.spec.target);
        let command = mount.spec.build_mount_spec(mount.privilege);
        let outcome = match mount.executor.execute(&command) {
            Ok(result) if result.success() => Ok(()),
            Ok(result) => Err(CustomizeError::Mount(format!(
                "mount {} on {} failed: {}",
                mount.spec.source,
                mount.spec.target,
                result.status_display()
            ))
            .into()),
            Err(e) => Err(e.context(format!(
                "failed to mount {} on {}",
                mount.spec.source, mount.spec.target
            ))),
        };

        match outcome {
            Ok(()) => {
                mount.mounted = true;
                Ok(mount)
            }
            Err(e) => {
                mount.remove_created_dir();
                Err(e)
            }
        }
    }

    fn prepare_paths(&mut self) -> Result<(), CustomizeError> {
        if self.dry_run {
            return Ok(());
        }

        if self.spec.is_bind_mount() && !Utf8Path::new(&self.spec.source).exists() {
            return Err(CustomizeError::Mount(format!(
                "bind mount source does not exist: {}",
                self.spec.source
            )));
        }

        if self.spec.target.is_dir() {
            return Ok(());
        }
        if self.spec.target.exists() {
            return Err(CustomizeError::Mount(format!(
                "mount target is not a directory: {}",
                self.spec.target
            )));
        }
        if !self.spec.make_and_delete_dir {
            return Err(CustomizeError::Mount(format!(
                "mount target does not exist: {}",
                self.spec.target
            )));
        }

        fs::create_dir_all(&self.spec.target).map_err(|e| {
            CustomizeError::Mount(format!(
                "failed to create mount point {}: {}",
                self.spec.target,
                crate::error::io_error_kind_message(&e)
            ))
        })?;
        self.created_dir = true;
        Ok(())
    }

    pub fn target(&self) -> &Utf8Path {
        &self.spec.target
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Unmounts and, when the mount created it, removes the target directory.
    ///
    /// Idempotent: closing an already closed mount returns `Ok(())` without
    /// running `umount` again. After a failed unmount the mount stays marked
    /// as mounted, so a later call (or `Drop`) retries.
    pub fn close(&mut self) -> Result<()> {
        if self.mounted {
            info!("unmounting {}", self.spec.target);
            let command = self.spec.build_umount_spec(self.privilege);
            match self.executor.execute(&command) {
                Ok(result) if result.success() => self.mounted = false,
                Ok(result) => {
                    return Err(CustomizeError::Mount(format!(
                        "umount {} failed: {}",
                        self.spec.target,
                        result.status_display()
                    ))
                    .into());
                }
                Err(e) => {
                    return Err(e.context(format!("failed to unmount {}", self.spec.target)));
                }
            }
        }

        if self.created_dir && !self.dry_run {
            fs::remove_dir(&self.spec.target).map_err(|e| {
                CustomizeError::Mount(format!(
                    "failed to remove mount point {}: {}",
                    self.spec.target,
                    crate::error::io_error_kind_message(&e)
                ))
            })?;
            debug!("removed mount point {}", self.spec.target);
            self.created_dir = false;
        }

        Ok(())
    }

    fn remove_created_dir(&mut self) {
        if self.created_dir && !self.dry_run {
            if let Err(e) = fs::remove_dir(&self.spec.target) {
                tracing::warn!("failed to remove mount point {}: {}", self.spec.target, e);
            }
            self.created_dir = false;
        }
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        if (self.mounted || self.created_dir)
            && let Err(e) = self.close()
        {
            tracing::error!(
                "failed to release mount {} during cleanup: {:#}. \
                Manual cleanup may be required: findmnt {}",
                self.spec.target,
                e,
                self.spec.target
            );
        }
    }
}
