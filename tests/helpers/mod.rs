use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use imgcustomizer::executor::{CommandExecutor, CommandSpec, ExecutionResult};
use imgcustomizer::isolation::Chroot;
use tempfile::TempDir;

/// Records executed commands in order, optionally failing matching calls.
///
/// A call fails with exit code 1 when its joined command line contains any
/// of the configured patterns.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<Vec<String>>>,
    fail_patterns: Vec<String>,
}

#[allow(dead_code)]
impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_when(pattern: impl Into<String>) -> Self {
        Self {
            fail_patterns: vec![pattern.into()],
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the recorded calls whose program is `command`.
    pub fn calls_to(&self, command: &str) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|c| c.first().is_some_and(|p| p == command))
            .collect()
    }

    /// Returns the recorded calls rendered as single command lines.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.join(" ")).collect()
    }
}

impl CommandExecutor for MockExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<ExecutionResult> {
        let argv = spec.argv();
        let line = argv.join(" ");
        self.calls.lock().unwrap().push(argv);

        let code = if self.fail_patterns.iter().any(|p| line.contains(p.as_str())) {
            1
        } else {
            0
        };
        Ok(ExecutionResult {
            status: Some(ExitStatus::from_raw(code << 8)),
        })
    }
}

/// Scratch layout for one customization run:
/// `<tmp>/root` (image), `<tmp>/config` (config directory),
/// `<tmp>/build` and a host resolv.conf at `<tmp>/host-resolv.conf`.
#[allow(dead_code)]
pub struct ImageFixture {
    _dir: TempDir,
    pub base: Utf8PathBuf,
    pub root: Utf8PathBuf,
    pub config_dir: Utf8PathBuf,
    pub build_dir: Utf8PathBuf,
    pub host_resolv_conf: Utf8PathBuf,
}

#[allow(dead_code)]
impl ImageFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap()
            .canonicalize_utf8()
            .unwrap();
        let root = base.join("root");
        let config_dir = base.join("config");
        let build_dir = base.join("build");
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::create_dir_all(&config_dir).unwrap();
        fs::create_dir_all(&build_dir).unwrap();
        fs::write(root.join("etc/hostname"), "localhost\n").unwrap();

        let host_resolv_conf = base.join("host-resolv.conf");
        fs::write(&host_resolv_conf, "nameserver 192.0.2.53\n").unwrap();

        Self {
            _dir: dir,
            base,
            root,
            config_dir,
            build_dir,
            host_resolv_conf,
        }
    }

    pub fn chroot(&self, executor: Arc<dyn CommandExecutor>) -> Chroot {
        Chroot::new(&self.root, executor, None, false).unwrap()
    }

    /// Writes `content` to `relative` under the config directory.
    pub fn write_config_file(&self, relative: &str, content: &str) -> Utf8PathBuf {
        let path = self.config_dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn image_path(&self, path: &str) -> Utf8PathBuf {
        self.root.join(Utf8Path::new(path).strip_prefix("/").unwrap())
    }
}

/// Returns the `mount` and `umount` calls targeting `target`.
#[allow(dead_code)]
pub fn mount_calls_for(executor: &MockExecutor, target: &Utf8Path) -> (usize, usize) {
    let target = target.as_str();
    let mounts = executor
        .calls_to("mount")
        .iter()
        .filter(|c| c.last().is_some_and(|t| t == target))
        .count();
    let umounts = executor
        .calls_to("umount")
        .iter()
        .filter(|c| c.last().is_some_and(|t| t == target))
        .count();
    (mounts, umounts)
}
