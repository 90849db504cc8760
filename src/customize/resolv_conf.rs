//! Temporary `/etc/resolv.conf` override.
//!
//! Package installation and scripts inside the image need working name
//! resolution, so the host's resolver config is copied in for the duration
//! of the run and deleted again at the end. The image is expected to
//! regenerate its own resolv.conf on first boot (e.g. systemd-resolved), so
//! whatever the image shipped is not backed up.

use camino::{Utf8Path, Utf8PathBuf};
use rustix::fs::{self as rfs, CWD, Mode, OFlags};
use tracing::{debug, info};

use crate::error::CustomizeError;
use crate::fsutil;
use crate::isolation::Chroot;

/// Location of the resolver config, both on the host and inside the image.
pub const RESOLV_CONF_PATH: &str = "/etc/resolv.conf";

/// Where the host's resolver config is read from.
pub fn host_resolv_conf() -> Utf8PathBuf {
    Utf8PathBuf::from(RESOLV_CONF_PATH)
}

/// Refuses to write below the image's `etc` if it is a symlink.
///
/// Opened with `O_NOFOLLOW` so the check and the open are one operation.
/// A missing `etc` is accepted; the copy creates it.
fn check_etc_directory(chroot: &Chroot) -> Result<(), CustomizeError> {
    let etc_path = chroot.resolve("/etc");
    match rfs::openat(
        CWD,
        etc_path.as_str(),
        OFlags::NOFOLLOW | OFlags::DIRECTORY | OFlags::RDONLY | OFlags::CLOEXEC,
        Mode::empty(),
    ) {
        Ok(_fd) => Ok(()),
        Err(rustix::io::Errno::NOENT) => Ok(()),
        Err(rustix::io::Errno::LOOP | rustix::io::Errno::NOTDIR) => {
            Err(CustomizeError::Isolation(format!(
                "{} is a symlink or not a directory, refusing to write resolv.conf \
                (possible symlink attack)",
                etc_path
            )))
        }
        Err(e) => Err(CustomizeError::io(
            format!("failed to open {}", etc_path),
            std::io::Error::from(e),
        )),
    }
}

/// Replaces the image's resolv.conf with a copy of `host_path`.
///
/// Any existing file, symlink or directory at that location is removed
/// first; a missing one is fine.
pub fn override_resolv_conf(chroot: &Chroot, host_path: &Utf8Path) -> Result<(), CustomizeError> {
    let image_path = chroot.resolve(RESOLV_CONF_PATH);

    if chroot.dry_run() {
        info!("would override {} with {}", image_path, host_path);
        return Ok(());
    }

    debug!("overriding resolv.conf file");
    check_etc_directory(chroot)?;

    fsutil::remove_path(&image_path).map_err(|e| {
        CustomizeError::config_write(
            format!("failed to delete existing resolv.conf file {}", image_path),
            e,
        )
    })?;

    fsutil::copy(host_path, &image_path).map_err(|e| {
        CustomizeError::config_write(
            format!("failed to override {} with host's {}", image_path, host_path),
            e,
        )
    })?;

    info!("copied host resolv.conf into {}", image_path);
    Ok(())
}

/// Deletes the overridden resolv.conf. Absent is not an error.
pub fn delete_resolv_conf(chroot: &Chroot) -> Result<(), CustomizeError> {
    let image_path = chroot.resolve(RESOLV_CONF_PATH);

    if chroot.dry_run() {
        info!("would delete {}", image_path);
        return Ok(());
    }

    debug!("deleting overridden resolv.conf file");
    fsutil::remove_path(&image_path).map_err(|e| {
        CustomizeError::config_write(
            format!("failed to delete overridden resolv.conf file {}", image_path),
            e,
        )
    })
}
