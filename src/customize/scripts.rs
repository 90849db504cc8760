//! Post-install and finalize script execution.
//!
//! The config directory is bind-mounted read-only at
//! [`CONFIG_DIR_MOUNT_PATH`] inside the image for the duration of the
//! step, and each script runs through `/bin/sh -c` with the image as root.

use anyhow::{Context, Result};
use camino::Utf8Path;
use tracing::info;

use super::release_mounts;
use crate::config::Script;
use crate::error::CustomizeError;
use crate::isolation::{Chroot, MountFlag};

/// Mount point of the config directory inside the image.
pub const CONFIG_DIR_MOUNT_PATH: &str = "/_imageconfigs";

/// Runs `scripts` in order inside the image, stopping at the first failure.
///
/// The config directory mount is released before returning, whether or not
/// a script failed. The returned error names the failing script.
pub fn run_scripts(base_config_path: &Utf8Path, scripts: &[Script], chroot: &Chroot) -> Result<()> {
    if scripts.is_empty() {
        return Ok(());
    }

    let mount = chroot
        .mount(
            base_config_path.as_str(),
            Utf8Path::new(CONFIG_DIR_MOUNT_PATH),
            "",
            &[MountFlag::Bind, MountFlag::ReadOnly],
            true,
        )
        .context("failed to mount config directory")?;

    let result = run_each(scripts, chroot);
    release_mounts(vec![mount], result)
}

fn run_each(scripts: &[Script], chroot: &Chroot) -> Result<()> {
    for (index, script) in scripts.iter().enumerate() {
        let command_line = script_command_line(script);
        info!("running script {}/{}: {}", index + 1, scripts.len(), script.path);

        chroot
            .unsafe_run(|session| session.run_shell(&command_line))
            .map_err(|e| CustomizeError::ScriptExecution {
                script: script.path.to_string(),
                status: format!("{:#}", e),
            })?;
    }
    Ok(())
}

/// `<mount>/<path> <args>`, with trailing whitespace from empty args dropped.
fn script_command_line(script: &Script) -> String {
    let script_path = Utf8Path::new(CONFIG_DIR_MOUNT_PATH).join(&script.path);
    format!("{} {}", script_path, script.args).trim_end().to_string()
}
