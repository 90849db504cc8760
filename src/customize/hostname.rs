//! Hostname update.

use camino::Utf8Path;
use tracing::info;

use crate::error::CustomizeError;
use crate::fsutil;
use crate::isolation::Chroot;

pub const HOSTNAME_PATH: &str = "/etc/hostname";

/// Writes `hostname` to the image's `/etc/hostname`, verbatim.
///
/// `None` or an empty string leaves the file untouched.
pub fn update_hostname(hostname: Option<&str>, chroot: &Chroot) -> Result<(), CustomizeError> {
    let Some(hostname) = hostname.filter(|h| !h.is_empty()) else {
        return Ok(());
    };

    let path = chroot.resolve(HOSTNAME_PATH);
    if chroot.dry_run() {
        info!("would write hostname '{}' to {}", hostname, path);
        return Ok(());
    }

    chroot.check_no_symlinks(Utf8Path::new("/etc"))?;
    fsutil::write(hostname, &path)
        .map_err(|e| CustomizeError::config_write(format!("failed to write hostname file {}", path), e))?;
    info!("set hostname to '{}'", hostname);
    Ok(())
}
