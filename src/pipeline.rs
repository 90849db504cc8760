//! Pipeline orchestrator for customizing an image.
//!
//! The pipeline runs a fixed, ordered list of [`Step`]s against one
//! [`Chroot`]:
//!
//! 1. **override-resolv-conf** — give the image the host's name resolution
//! 2. **packages** — remove, update and install packages
//! 3. **hostname** — write `/etc/hostname`
//! 4. **additional-files** — copy configured files into the image
//! 5. **post-install-scripts** — run user scripts
//! 6. **finalize-scripts** — run user finalization scripts
//! 7. **delete-resolv-conf** — drop the overridden resolv.conf
//!
//! The pipeline advances only on success. The first failing step halts it;
//! later steps, including `delete-resolv-conf`, do not run and the
//! overridden resolv.conf stays in the image.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use strum::Display;
use tracing::info;

use crate::config::SystemConfig;
use crate::customize::{self, PackageManager, PackageRequest, TdnfPackageManager, resolv_conf};
use crate::error::CustomizeError;
use crate::isolation::Chroot;

/// One customization step, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Step {
    OverrideResolvConf,
    Packages,
    Hostname,
    AdditionalFiles,
    PostInstallScripts,
    FinalizeScripts,
    DeleteResolvConf,
}

impl Step {
    /// Every step in the order the pipeline runs them.
    pub const ALL: [Step; 7] = [
        Step::OverrideResolvConf,
        Step::Packages,
        Step::Hostname,
        Step::AdditionalFiles,
        Step::PostInstallScripts,
        Step::FinalizeScripts,
        Step::DeleteResolvConf,
    ];
}

/// Progress of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    NotStarted,
    /// Index into [`Step::ALL`] of the step currently running.
    Running(usize),
    Succeeded,
    Failed {
        step: Step,
        /// Rendered error chain of the failure.
        error: String,
    },
}

/// Executes individual steps on behalf of the [`Pipeline`].
pub trait StepRunner {
    fn run_step(&self, step: Step, chroot: &Chroot) -> Result<()>;
}

/// Drives the steps in order and records the run's state.
#[derive(Debug)]
pub struct Pipeline {
    state: PipelineState,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            state: PipelineState::NotStarted,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Runs every step through `runner`, stopping at the first failure.
    ///
    /// The returned error wraps the step's error with the step name, so
    /// typed errors stay reachable through `downcast_ref`. A pipeline runs
    /// once; calling `run` again is an error.
    pub fn run(&mut self, runner: &dyn StepRunner, chroot: &Chroot) -> Result<()> {
        if self.state != PipelineState::NotStarted {
            return Err(CustomizeError::Validation(format!(
                "pipeline has already been run (state: {:?})",
                self.state
            ))
            .into());
        }

        info!("starting customization of {}", chroot.root_dir());
        for (index, step) in Step::ALL.into_iter().enumerate() {
            self.state = PipelineState::Running(index);
            info!("running step {}/{}: {}", index + 1, Step::ALL.len(), step);

            if let Err(e) = runner.run_step(step, chroot) {
                self.state = PipelineState::Failed {
                    step,
                    error: format!("{:#}", e),
                };
                return Err(e).with_context(|| format!("failed to run step {}", step));
            }
        }

        self.state = PipelineState::Succeeded;
        info!("customization completed successfully");
        Ok(())
    }
}

/// [`StepRunner`] that applies a [`SystemConfig`] to the image.
pub struct Customizer<'a> {
    config: &'a SystemConfig,
    base_config_path: &'a Utf8Path,
    build_dir: &'a Utf8Path,
    rpm_sources: Vec<Utf8PathBuf>,
    use_base_image_rpm_repos: bool,
    host_resolv_conf: Utf8PathBuf,
    package_manager: Box<dyn PackageManager + 'a>,
}

impl<'a> Customizer<'a> {
    /// Creates a customizer using `tdnf` and the host's `/etc/resolv.conf`.
    pub fn new(
        config: &'a SystemConfig,
        base_config_path: &'a Utf8Path,
        build_dir: &'a Utf8Path,
    ) -> Self {
        Self {
            config,
            base_config_path,
            build_dir,
            rpm_sources: Vec::new(),
            use_base_image_rpm_repos: true,
            host_resolv_conf: resolv_conf::host_resolv_conf(),
            package_manager: Box::new(TdnfPackageManager),
        }
    }

    #[must_use]
    pub fn with_rpm_sources(mut self, rpm_sources: Vec<Utf8PathBuf>) -> Self {
        self.rpm_sources = rpm_sources;
        self
    }

    #[must_use]
    pub fn with_base_image_rpm_repos(mut self, enabled: bool) -> Self {
        self.use_base_image_rpm_repos = enabled;
        self
    }

    #[must_use]
    pub fn with_host_resolv_conf(mut self, path: Utf8PathBuf) -> Self {
        self.host_resolv_conf = path;
        self
    }

    #[must_use]
    pub fn with_package_manager(mut self, package_manager: Box<dyn PackageManager + 'a>) -> Self {
        self.package_manager = package_manager;
        self
    }
}

impl StepRunner for Customizer<'_> {
    fn run_step(&self, step: Step, chroot: &Chroot) -> Result<()> {
        match step {
            Step::OverrideResolvConf => {
                resolv_conf::override_resolv_conf(chroot, &self.host_resolv_conf)?;
            }
            Step::Packages => {
                let request = PackageRequest {
                    build_dir: self.build_dir,
                    base_config_path: self.base_config_path,
                    packages: &self.config.packages,
                    rpm_sources: &self.rpm_sources,
                    use_base_image_rpm_repos: self.use_base_image_rpm_repos,
                };
                self.package_manager
                    .add_remove_and_update_packages(&request, chroot)?;
            }
            Step::Hostname => customize::update_hostname(self.config.hostname(), chroot)?,
            Step::AdditionalFiles => customize::copy_additional_files(
                self.base_config_path,
                &self.config.additional_files,
                chroot,
            )?,
            Step::PostInstallScripts => customize::run_scripts(
                self.base_config_path,
                &self.config.post_install_scripts,
                chroot,
            )?,
            Step::FinalizeScripts => customize::run_scripts(
                self.base_config_path,
                &self.config.finalize_image_scripts,
                chroot,
            )?,
            Step::DeleteResolvConf => resolv_conf::delete_resolv_conf(chroot)?,
        }
        Ok(())
    }
}
