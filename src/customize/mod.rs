//! Customization steps applied to an image root.
//!
//! Each step takes the relevant slice of the [`SystemConfig`] and the
//! [`Chroot`] it mutates. Steps never address host paths for image
//! mutation; everything goes through [`Chroot::resolve`] or a mount.
//!
//! [`SystemConfig`]: crate::config::SystemConfig
//! [`Chroot`]: crate::isolation::Chroot
//! [`Chroot::resolve`]: crate::isolation::Chroot::resolve

pub mod files;
pub mod hostname;
pub mod packages;
pub mod resolv_conf;
pub mod scripts;

pub use files::copy_additional_files;
pub use hostname::update_hostname;
pub use packages::{PackageManager, PackageRequest, TdnfPackageManager};
pub use resolv_conf::{delete_resolv_conf, override_resolv_conf};
pub use scripts::run_scripts;

use anyhow::{Context, Result};
use tracing::error;

use crate::isolation::Mount;

/// Releases `mounts` in reverse order and merges the outcome with `result`.
///
/// Every mount is closed even if an earlier close fails. When the step
/// itself failed, its error wins and cleanup errors are logged.
pub(crate) fn release_mounts<T>(mut mounts: Vec<Mount>, result: Result<T>) -> Result<T> {
    let mut release_result = Ok(());
    while let Some(mut mount) = mounts.pop() {
        if let Err(e) = mount.close() {
            let e = e.context(format!("failed to release mount {}", mount.target()));
            if release_result.is_ok() {
                release_result = Err(e);
            } else {
                error!("{:#}", e);
            }
        }
    }

    match (result, release_result) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(e)) => Err(e).context("failed to clean up mounts"),
        (Err(step_err), Err(release_err)) => {
            error!("additionally, mount cleanup failed: {:#}", release_err);
            Err(step_err)
        }
    }
}
