mod helpers;

use anyhow::Result;
use camino::Utf8PathBuf;
use helpers::ImageFixture;
use imgcustomizer::CustomizeError;
use imgcustomizer::config::{FilePermissions, load_config};

const FULL_CONFIG: &str = r#"---
system_config:
  hostname: myhost
  packages:
    install: [openssh-server]
    remove: [vim]
    update_existing: true
    install_lists: [lists/base.yaml]
  additional_files:
    files/a.txt:
      - path: /opt/a
        permissions: "0644"
      - path: /opt/b
  post_install_scripts:
    - path: scripts/setup.sh
      args: --verbose
  finalize_image_scripts:
    - path: scripts/finalize.sh
"#;

fn write_supporting_files(fx: &ImageFixture) {
    fx.write_config_file("lists/base.yaml", "packages:\n  - curl\n");
    fx.write_config_file("files/a.txt", "a\n");
    fx.write_config_file("scripts/setup.sh", "#!/bin/sh\n");
    fx.write_config_file("scripts/finalize.sh", "#!/bin/sh\n");
}

#[test]
fn test_load_config_full() -> Result<()> {
    let fx = ImageFixture::new();
    write_supporting_files(&fx);
    let path = fx.write_config_file("config.yaml", FULL_CONFIG);

    let loaded = load_config(&path)?;
    loaded.validate()?;

    assert_eq!(loaded.base_config_path, fx.config_dir);
    let system = &loaded.config.system_config;
    assert_eq!(system.hostname(), Some("myhost"));
    assert_eq!(system.packages.install, vec!["openssh-server"]);
    assert_eq!(system.packages.remove, vec!["vim"]);
    assert!(system.packages.update_existing);
    assert_eq!(system.packages.install_lists, vec![Utf8PathBuf::from("lists/base.yaml")]);

    let destinations = &system.additional_files[&Utf8PathBuf::from("files/a.txt")];
    assert_eq!(destinations.len(), 2);
    assert_eq!(destinations[0].path, "/opt/a");
    assert_eq!(destinations[0].permissions, Some(FilePermissions(0o644)));
    assert_eq!(destinations[1].permissions, None);

    assert_eq!(system.post_install_scripts[0].path, "scripts/setup.sh");
    assert_eq!(system.post_install_scripts[0].args, "--verbose");
    assert_eq!(system.finalize_image_scripts[0].args, "");

    Ok(())
}

#[test]
fn test_load_config_empty_system_config() -> Result<()> {
    let fx = ImageFixture::new();
    let path = fx.write_config_file("config.yaml", "system_config: {}\n");

    let loaded = load_config(&path)?;
    loaded.validate()?;

    let system = &loaded.config.system_config;
    assert_eq!(system.hostname(), None);
    assert!(system.additional_files.is_empty());
    assert!(system.post_install_scripts.is_empty());
    Ok(())
}

#[test]
fn test_load_config_missing_file_returns_io_error() {
    let err = load_config(&Utf8PathBuf::from("/nonexistent/config.yaml")).unwrap_err();
    assert!(matches!(err, CustomizeError::Io { .. }), "got {:?}", err);
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_load_config_unknown_key_returns_config_error() {
    let fx = ImageFixture::new();
    let path = fx.write_config_file("config.yaml", "system_config:\n  hostnme: typo\n");

    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, CustomizeError::Config(_)), "got {:?}", err);
    assert!(err.to_string().contains("hostnme"));
}

#[test]
fn test_load_config_invalid_permissions_returns_config_error() {
    let fx = ImageFixture::new();
    let path = fx.write_config_file(
        "config.yaml",
        "system_config:\n  additional_files:\n    a.txt:\n      - path: /a\n        permissions: \"0999\"\n",
    );

    let err = load_config(&path).unwrap_err();
    assert!(matches!(err, CustomizeError::Config(_)), "got {:?}", err);
}

#[test]
fn test_validate_rejects_missing_script() -> Result<()> {
    let fx = ImageFixture::new();
    let path = fx.write_config_file(
        "config.yaml",
        "system_config:\n  post_install_scripts:\n    - path: scripts/missing.sh\n",
    );

    let err = load_config(&path)?.validate().unwrap_err();
    assert!(err.to_string().contains("scripts/missing.sh"), "got {}", err);
    Ok(())
}

#[test]
fn test_validate_rejects_script_escaping_config_dir() -> Result<()> {
    let fx = ImageFixture::new();
    let path = fx.write_config_file(
        "config.yaml",
        "system_config:\n  finalize_image_scripts:\n    - path: ../outside.sh\n",
    );

    let err = load_config(&path)?.validate().unwrap_err();
    assert!(matches!(err, CustomizeError::Validation(_)), "got {:?}", err);
    Ok(())
}

#[test]
fn test_validate_rejects_relative_destination() -> Result<()> {
    let fx = ImageFixture::new();
    fx.write_config_file("a.txt", "a");
    let path = fx.write_config_file(
        "config.yaml",
        "system_config:\n  additional_files:\n    a.txt:\n      - path: opt/a\n",
    );

    let err = load_config(&path)?.validate().unwrap_err();
    assert!(matches!(err, CustomizeError::Validation(_)), "got {:?}", err);
    Ok(())
}

#[test]
fn test_validate_rejects_invalid_hostname() -> Result<()> {
    let fx = ImageFixture::new();
    let path = fx.write_config_file("config.yaml", "system_config:\n  hostname: -bad-\n");

    let err = load_config(&path)?.validate().unwrap_err();
    assert!(err.to_string().contains("invalid hostname"), "got {}", err);
    Ok(())
}

#[test]
fn test_validate_rejects_missing_package_list() -> Result<()> {
    let fx = ImageFixture::new();
    let path = fx.write_config_file(
        "config.yaml",
        "system_config:\n  packages:\n    remove_lists: [lists/none.yaml]\n",
    );

    let err = load_config(&path)?.validate().unwrap_err();
    assert!(err.to_string().contains("lists/none.yaml"), "got {}", err);
    Ok(())
}
