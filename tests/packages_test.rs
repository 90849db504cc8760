//! Tests for the tdnf-backed package step.

mod helpers;

use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use helpers::{ImageFixture, MockExecutor, mount_calls_for};
use imgcustomizer::CustomizeError;
use imgcustomizer::config::PackageConfig;
use imgcustomizer::customize::packages::PACKAGE_CACHE_MOUNT_PATH;
use imgcustomizer::customize::{PackageManager, PackageRequest, TdnfPackageManager};
use serial_test::serial;

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn request<'a>(
    fx: &'a ImageFixture,
    packages: &'a PackageConfig,
    rpm_sources: &'a [Utf8PathBuf],
    use_base_image_rpm_repos: bool,
) -> PackageRequest<'a> {
    PackageRequest {
        build_dir: &fx.build_dir,
        base_config_path: &fx.config_dir,
        packages,
        rpm_sources,
        use_base_image_rpm_repos,
    }
}

/// The tdnf argv recorded inside `chroot <root> ...` calls.
fn tdnf_calls(executor: &MockExecutor) -> Vec<Vec<String>> {
    executor
        .calls_to("chroot")
        .into_iter()
        .map(|c| c[2..].to_vec())
        .collect()
}

#[test]
#[serial]
fn test_no_package_work_is_noop() {
    let fx = ImageFixture::new();
    let executor = Arc::new(MockExecutor::new());
    let chroot = fx.chroot(executor.clone());
    let packages = PackageConfig::default();

    TdnfPackageManager
        .add_remove_and_update_packages(&request(&fx, &packages, &[], true), &chroot)
        .unwrap();

    assert!(executor.calls().is_empty());
    assert!(!fx.build_dir.join("package-cache").exists());
}

#[test]
#[serial]
fn test_operations_run_in_order() {
    let fx = ImageFixture::new();
    fx.write_config_file("lists/extra.yaml", "packages:\n  - jq\n");
    let executor = Arc::new(MockExecutor::new());
    let chroot = fx.chroot(executor.clone());
    let packages = PackageConfig {
        install: names(&["openssh-server"]),
        install_lists: vec!["lists/extra.yaml".into()],
        remove: names(&["vim"]),
        update: names(&["bash"]),
        update_existing: true,
        ..Default::default()
    };

    TdnfPackageManager
        .add_remove_and_update_packages(&request(&fx, &packages, &[], true), &chroot)
        .unwrap();

    let prefix = names(&["tdnf", "-y", "--setopt=cachedir=/_pkgcache"]);
    let with = |rest: &[&str]| [prefix.clone(), names(rest)].concat();
    assert_eq!(
        tdnf_calls(&executor),
        vec![
            with(&["remove", "vim"]),
            with(&["update"]),
            with(&["install", "openssh-server", "jq"]),
            with(&["update", "bash"]),
        ]
    );

    let cache_target = fx.image_path(PACKAGE_CACHE_MOUNT_PATH);
    assert_eq!(mount_calls_for(&executor, &cache_target), (1, 1));
    assert!(fx.build_dir.join("package-cache").is_dir());
    assert!(!cache_target.exists());
}

#[test]
#[serial]
fn test_local_sources_are_mounted_and_base_repos_disabled() {
    let fx = ImageFixture::new();
    let rpms = fx.base.join("rpms");
    fs::create_dir_all(&rpms).unwrap();
    let sources = vec![rpms.clone()];
    let executor = Arc::new(MockExecutor::new());
    let chroot = fx.chroot(executor.clone());
    let packages = PackageConfig {
        install: names(&["custom-agent"]),
        ..Default::default()
    };

    TdnfPackageManager
        .add_remove_and_update_packages(&request(&fx, &packages, &sources, false), &chroot)
        .unwrap();

    let source_target = fx.image_path("/_localrpms/0");
    let mounts = executor.calls_to("mount");
    assert_eq!(
        mounts[0],
        names(&["mount", "-o", "bind,ro", rpms.as_str(), source_target.as_str()])
    );
    assert_eq!(mount_calls_for(&executor, &source_target), (1, 1));

    let calls = tdnf_calls(&executor);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].contains(&"--disablerepo=*".to_string()));
    assert!(calls[0].contains(&"--repofrompath=localrpms0,/_localrpms/0".to_string()));
    assert!(calls[0].contains(&"--enablerepo=localrpms0".to_string()));

    // released in reverse order of acquisition
    let umounts = executor.calls_to("umount");
    assert_eq!(umounts.len(), 2);
    assert_eq!(umounts[0][1], fx.image_path(PACKAGE_CACHE_MOUNT_PATH).as_str());
    assert_eq!(umounts[1][1], source_target.as_str());
}

#[test]
#[serial]
fn test_failed_operation_stops_and_releases_mounts() {
    let fx = ImageFixture::new();
    let executor = Arc::new(MockExecutor::failing_when(" install "));
    let chroot = fx.chroot(executor.clone());
    let packages = PackageConfig {
        install: names(&["broken"]),
        update: names(&["bash"]),
        ..Default::default()
    };

    let err = TdnfPackageManager
        .add_remove_and_update_packages(&request(&fx, &packages, &[], true), &chroot)
        .unwrap_err();

    let calls = tdnf_calls(&executor);
    assert_eq!(calls.len(), 1, "update must not run after a failed install");
    let typed = err.downcast_ref::<CustomizeError>();
    assert!(
        matches!(typed, Some(CustomizeError::PackageOperation(msg)) if msg.contains("install")),
        "got {:#}",
        err
    );
    assert_eq!(
        mount_calls_for(&executor, &fx.image_path(PACKAGE_CACHE_MOUNT_PATH)),
        (1, 1)
    );
}

#[test]
#[serial]
fn test_missing_rpm_source_is_rejected_before_running() {
    let fx = ImageFixture::new();
    let sources = vec![Utf8Path::new("/nonexistent/rpms").to_path_buf()];
    let executor = Arc::new(MockExecutor::new());
    let chroot = fx.chroot(executor.clone());
    let packages = PackageConfig {
        install: names(&["x"]),
        ..Default::default()
    };

    let err = TdnfPackageManager
        .add_remove_and_update_packages(&request(&fx, &packages, &sources, true), &chroot)
        .unwrap_err();

    assert!(executor.calls().is_empty());
    assert!(matches!(
        err.downcast_ref::<CustomizeError>(),
        Some(CustomizeError::PackageOperation(_))
    ));
}
