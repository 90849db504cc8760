//! Chroot jail over an image root directory.
//!
//! [`Chroot`] owns the image root path and is the only way steps address
//! files inside the image. Commands that must see the image as `/` run
//! through a [`ChrootSession`], obtained from [`Chroot::unsafe_run`].
//!
//! Root redirection is a process-wide resource: only one session may be
//! active at a time. The session holds a process-global token and a second
//! concurrent `unsafe_run` fails with [`CustomizeError::Isolation`] instead
//! of silently sharing the redirected root.
//!
//! The redirection is applied to each child command through `chroot(8)`
//! rather than to the calling process. The executor streams output on
//! helper threads, and `chroot(2)` on a multi-threaded process would change
//! the root of those threads too.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use super::mount::{Mount, MountFlag, MountSpec, find_symlink, validate_no_symlinks};
use crate::error::CustomizeError;
use crate::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use crate::fsutil;
use crate::privilege::PrivilegeMethod;

/// Set while a [`ChrootSession`] exists anywhere in the process.
static ROOT_REDIRECT_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Ownership token for the process-wide root redirection.
///
/// Dropping the token (including during unwinding) releases the redirection.
struct RedirectToken;

impl RedirectToken {
    fn acquire(root: &Utf8Path) -> Result<Self, CustomizeError> {
        ROOT_REDIRECT_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self)
            .map_err(|_| {
                CustomizeError::Isolation(format!(
                    "cannot enter chroot {}: another root redirection is already active \
                    in this process",
                    root
                ))
            })
    }
}

impl Drop for RedirectToken {
    fn drop(&mut self) {
        ROOT_REDIRECT_ACTIVE.store(false, Ordering::Release);
    }
}

/// A host file to place inside the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToCopy {
    /// Host path of the source file.
    pub src: Utf8PathBuf,
    /// Absolute destination path inside the image.
    pub dest: Utf8PathBuf,
    /// Permission bits for the destination; `None` keeps the source's mode.
    pub permissions: Option<u32>,
}

/// Chroot jail over one image root.
pub struct Chroot {
    root: Utf8PathBuf,
    executor: Arc<dyn CommandExecutor>,
    privilege: Option<PrivilegeMethod>,
    dry_run: bool,
}

impl std::fmt::Debug for Chroot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chroot")
            .field("root", &self.root)
            .field("privilege", &self.privilege)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Chroot {
    /// Opens a jail over `root`, which must be an existing directory.
    ///
    /// The root is canonicalized so that every resolved path is absolute.
    pub fn new(
        root: &Utf8Path,
        executor: Arc<dyn CommandExecutor>,
        privilege: Option<PrivilegeMethod>,
        dry_run: bool,
    ) -> Result<Self, CustomizeError> {
        let root = root
            .canonicalize_utf8()
            .map_err(|e| CustomizeError::io(format!("failed to resolve image root {}", root), e))?;
        if !root.is_dir() {
            return Err(CustomizeError::Validation(format!(
                "image root is not a directory: {}",
                root
            )));
        }
        Ok(Self {
            root,
            executor,
            privilege,
            dry_run,
        })
    }

    /// Returns the image root directory.
    pub fn root_dir(&self) -> &Utf8Path {
        &self.root
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn executor(&self) -> &Arc<dyn CommandExecutor> {
        &self.executor
    }

    pub fn privilege(&self) -> Option<PrivilegeMethod> {
        self.privilege
    }

    /// Maps an image path (`/etc/hostname`) to its host location under the root.
    pub fn resolve(&self, path: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        let path = path.as_ref();
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    /// Rejects `path` if any existing component of it inside the image is a
    /// symlink. Writing through such a path could land on the host.
    pub fn check_no_symlinks(&self, path: &Utf8Path) -> Result<(), CustomizeError> {
        match find_symlink(&self.root, path) {
            Ok(None) => Ok(()),
            Ok(Some(link)) => Err(CustomizeError::Isolation(format!(
                "refusing to write {} in image: {} is a symlink",
                path, link
            ))),
            Err(e) => Err(CustomizeError::io(
                format!("failed to inspect {} in image {}", path, self.root),
                e,
            )),
        }
    }

    /// Copies host files into the image.
    ///
    /// Parent directories are created as needed. The destination receives
    /// the configured permissions, or keeps the source file's mode. Fails
    /// fast on the first file that cannot be copied.
    pub fn add_files(&self, files: &[FileToCopy]) -> Result<(), CustomizeError> {
        for file in files {
            self.add_file(file)?;
        }
        Ok(())
    }

    fn add_file(&self, file: &FileToCopy) -> Result<(), CustomizeError> {
        validate_image_path(&file.dest)?;
        let dest = self.resolve(&file.dest);

        if self.dry_run {
            info!("would copy {} to {}", file.src, dest);
            return Ok(());
        }

        self.check_no_symlinks(&file.dest)?;
        debug!("copying {} to {}", file.src, dest);
        let context = format!("{} -> {}", file.src, dest);
        fsutil::copy(&file.src, &dest).map_err(|e| CustomizeError::file_copy(&context, e))?;

        if let Some(mode) = file.permissions {
            fsutil::set_file_mode(&dest, mode)
                .map_err(|e| CustomizeError::file_copy(format!("chmod {:o} {}", mode, dest), e))?;
        }
        Ok(())
    }

    /// Mounts `source` at `target` inside the image.
    ///
    /// The target is resolved under the root and checked for symlinked
    /// components before anything is created.
    pub fn mount(
        &self,
        source: &str,
        target: &Utf8Path,
        fs_type: &str,
        flags: &[MountFlag],
        make_and_delete_dir: bool,
    ) -> Result<Mount> {
        validate_image_path(target)?;
        if !self.dry_run {
            validate_no_symlinks(&self.root, target)?;
        }
        let spec = MountSpec {
            source: source.to_string(),
            target: self.resolve(target),
            fs_type: fs_type.to_string(),
            flags: flags.to_vec(),
            make_and_delete_dir,
        };
        Mount::acquire(spec, self.executor.clone(), self.privilege, self.dry_run)
    }

    /// Runs `f` with the root redirected into the image.
    ///
    /// The redirection is released when `f` returns, fails or panics.
    pub fn unsafe_run<T>(&self, f: impl FnOnce(&ChrootSession<'_>) -> Result<T>) -> Result<T> {
        let token = RedirectToken::acquire(&self.root)?;
        debug!("entered chroot {}", self.root);
        let session = ChrootSession {
            chroot: self,
            _token: token,
        };
        let result = f(&session);
        drop(session);
        debug!("left chroot {}", self.root);
        result
    }
}

/// Validates an absolute in-image path with no `..` components.
fn validate_image_path(path: &Utf8Path) -> Result<(), CustomizeError> {
    if !path.is_absolute() {
        return Err(CustomizeError::Validation(format!(
            "image path must be absolute: {}",
            path
        )));
    }
    if path.components().any(|c| c == Utf8Component::ParentDir) {
        return Err(CustomizeError::Validation(format!(
            "image path '{}' contains '..' components, \
            which is not allowed for security reasons",
            path
        )));
    }
    Ok(())
}

/// Capability for running commands with the image as their root.
///
/// Exists only inside [`Chroot::unsafe_run`].
pub struct ChrootSession<'a> {
    chroot: &'a Chroot,
    _token: RedirectToken,
}

impl ChrootSession<'_> {
    pub fn root_dir(&self) -> &Utf8Path {
        self.chroot.root_dir()
    }

    /// Builds the host-side command that runs `command` inside the image.
    pub fn command_spec(&self, command: &[String]) -> CommandSpec {
        let mut args = Vec::with_capacity(command.len() + 1);
        args.push(self.chroot.root.to_string());
        args.extend(command.iter().cloned());
        CommandSpec::new("chroot", args).with_privilege(self.chroot.privilege)
    }

    /// Executes `command` inside the image and returns its raw status.
    pub fn execute(&self, command: &[String]) -> Result<ExecutionResult> {
        if command.is_empty() {
            return Err(CustomizeError::Isolation(
                "cannot execute an empty command in chroot".to_string(),
            )
            .into());
        }
        self.chroot.executor.execute(&self.command_spec(command))
    }

    /// Runs a shell command line inside the image via `/bin/sh -c`.
    ///
    /// A non-zero exit becomes [`CustomizeError::Execution`].
    pub fn run_shell(&self, command_line: &str) -> Result<()> {
        let command = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            command_line.to_string(),
        ];
        let result = self.execute(&command)?;
        if !result.success() {
            return Err(CustomizeError::execution(&command, result.status_display()).into());
        }
        Ok(())
    }
}
