//! Package installation, removal and update.
//!
//! The step delegates to a [`PackageManager`]. [`TdnfPackageManager`] drives
//! `tdnf` inside the image, with local RPM directories and a persistent
//! package cache exposed through bind mounts.

use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use strum::Display;
use tracing::{debug, info};

use super::release_mounts;
use crate::config::{PackageConfig, load_package_list};
use crate::error::CustomizeError;
use crate::isolation::{Chroot, ChrootSession, Mount, MountFlag};

/// Mount point of the package cache inside the image.
pub const PACKAGE_CACHE_MOUNT_PATH: &str = "/_pkgcache";
/// Parent of the local RPM source mounts inside the image.
pub const LOCAL_RPMS_MOUNT_PATH: &str = "/_localrpms";

const PACKAGE_CACHE_DIR: &str = "package-cache";

/// Everything the package step needs besides the image itself.
#[derive(Debug, Clone, Copy)]
pub struct PackageRequest<'a> {
    /// Scratch directory for the run; holds the package cache.
    pub build_dir: &'a Utf8Path,
    /// Directory that package list paths are relative to.
    pub base_config_path: &'a Utf8Path,
    pub packages: &'a PackageConfig,
    /// Host directories of RPMs offered as extra repositories.
    pub rpm_sources: &'a [Utf8PathBuf],
    /// Whether the repositories configured inside the image may be used.
    pub use_base_image_rpm_repos: bool,
}

/// Applies package directives to an image.
pub trait PackageManager: Send + Sync {
    fn add_remove_and_update_packages(
        &self,
        request: &PackageRequest<'_>,
        chroot: &Chroot,
    ) -> Result<()>;
}

/// Package names after merging inline names with list files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolvedPackages {
    pub install: Vec<String>,
    pub remove: Vec<String>,
    pub update: Vec<String>,
    pub update_existing: bool,
}

impl ResolvedPackages {
    /// Merges inline package names with the contents of their list files.
    pub fn resolve(
        packages: &PackageConfig,
        base_config_path: &Utf8Path,
    ) -> Result<Self, CustomizeError> {
        Ok(Self {
            install: merge(&packages.install, &packages.install_lists, base_config_path)?,
            remove: merge(&packages.remove, &packages.remove_lists, base_config_path)?,
            update: merge(&packages.update, &packages.update_lists, base_config_path)?,
            update_existing: packages.update_existing,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.install.is_empty()
            && self.remove.is_empty()
            && self.update.is_empty()
            && !self.update_existing
    }
}

fn merge(
    inline: &[String],
    lists: &[Utf8PathBuf],
    base_config_path: &Utf8Path,
) -> Result<Vec<String>, CustomizeError> {
    let mut names = inline.to_vec();
    for list in lists {
        let path = base_config_path.join(list);
        let list = load_package_list(&path).map_err(|e| {
            CustomizeError::PackageOperation(format!("failed to load package list {}: {}", path, e))
        })?;
        names.extend(list.packages);
    }
    Ok(names)
}

/// One `tdnf` invocation, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
enum TdnfOperation {
    Remove,
    UpdateExisting,
    Install,
    Update,
}

impl TdnfOperation {
    fn verb(self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Install => "install",
            Self::UpdateExisting | Self::Update => "update",
        }
    }
}

/// [`PackageManager`] backed by `tdnf` inside the image.
#[derive(Debug, Default, Clone)]
pub struct TdnfPackageManager;

impl TdnfPackageManager {
    /// Builds the full argv for `operation` on `packages`.
    fn command(
        operation: TdnfOperation,
        packages: &[String],
        source_count: usize,
        use_base_image_rpm_repos: bool,
    ) -> Vec<String> {
        let mut command = vec![
            "tdnf".to_string(),
            "-y".to_string(),
            format!("--setopt=cachedir={}", PACKAGE_CACHE_MOUNT_PATH),
        ];
        if !use_base_image_rpm_repos {
            command.push("--disablerepo=*".to_string());
        }
        for index in 0..source_count {
            let repo = format!("localrpms{}", index);
            command.push(format!(
                "--repofrompath={},{}",
                repo,
                local_rpms_mount_path(index)
            ));
            command.push(format!("--enablerepo={}", repo));
        }
        command.push(operation.verb().to_string());
        command.extend(packages.iter().cloned());
        command
    }

    fn mount_sources(request: &PackageRequest<'_>, chroot: &Chroot) -> Result<Vec<Mount>> {
        let mut mounts = Vec::with_capacity(request.rpm_sources.len() + 1);
        match Self::try_mount_sources(request, chroot, &mut mounts) {
            Ok(()) => Ok(mounts),
            Err(e) => release_mounts(mounts, Err(e)),
        }
    }

    fn try_mount_sources(
        request: &PackageRequest<'_>,
        chroot: &Chroot,
        mounts: &mut Vec<Mount>,
    ) -> Result<()> {
        for (index, source) in request.rpm_sources.iter().enumerate() {
            if !chroot.dry_run() && !source.is_dir() {
                return Err(CustomizeError::PackageOperation(format!(
                    "RPM source is not a directory: {}",
                    source
                ))
                .into());
            }
            let target = local_rpms_mount_path(index);
            mounts.push(
                chroot
                    .mount(
                        source.as_str(),
                        &target,
                        "",
                        &[MountFlag::Bind, MountFlag::ReadOnly],
                        true,
                    )
                    .with_context(|| format!("failed to mount RPM source {}", source))?,
            );
        }

        let cache_dir = request.build_dir.join(PACKAGE_CACHE_DIR);
        if !chroot.dry_run() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                CustomizeError::io(format!("failed to create package cache {}", cache_dir), e)
            })?;
        }
        mounts.push(
            chroot
                .mount(
                    cache_dir.as_str(),
                    Utf8Path::new(PACKAGE_CACHE_MOUNT_PATH),
                    "",
                    &[MountFlag::Bind],
                    true,
                )
                .context("failed to mount package cache")?,
        );
        Ok(())
    }

    fn run_operations(
        session: &ChrootSession<'_>,
        packages: &ResolvedPackages,
        request: &PackageRequest<'_>,
    ) -> Result<()> {
        let steps = [
            (TdnfOperation::Remove, packages.remove.as_slice(), !packages.remove.is_empty()),
            (TdnfOperation::UpdateExisting, &[][..], packages.update_existing),
            (TdnfOperation::Install, packages.install.as_slice(), !packages.install.is_empty()),
            (TdnfOperation::Update, packages.update.as_slice(), !packages.update.is_empty()),
        ];

        for (operation, names, wanted) in steps {
            if !wanted {
                continue;
            }
            info!("running package {} ({} package(s))", operation, names.len());
            let command = Self::command(
                operation,
                names,
                request.rpm_sources.len(),
                request.use_base_image_rpm_repos,
            );
            let result = session.execute(&command).map_err(|e| {
                CustomizeError::PackageOperation(format!(
                    "failed to run tdnf {}: {:#}",
                    operation, e
                ))
            })?;
            if !result.success() {
                return Err(CustomizeError::PackageOperation(format!(
                    "tdnf {} failed: {}",
                    operation,
                    result.status_display()
                ))
                .into());
            }
        }
        Ok(())
    }
}

impl PackageManager for TdnfPackageManager {
    fn add_remove_and_update_packages(
        &self,
        request: &PackageRequest<'_>,
        chroot: &Chroot,
    ) -> Result<()> {
        let packages = ResolvedPackages::resolve(request.packages, request.base_config_path)?;
        if packages.is_empty() {
            debug!("no package changes requested");
            return Ok(());
        }

        let mounts = Self::mount_sources(request, chroot)?;
        let result = chroot.unsafe_run(|session| Self::run_operations(session, &packages, request));
        release_mounts(mounts, result)
    }
}

fn local_rpms_mount_path(index: usize) -> Utf8PathBuf {
    Utf8Path::new(LOCAL_RPMS_MOUNT_PATH).join(index.to_string())
}
