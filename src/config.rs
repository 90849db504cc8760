//! Customization config file parsing and validation.
//!
//! A config file is YAML with a single `system_config` section. Paths inside
//! it (additional file sources, scripts, package list files) are relative to
//! the directory containing the config file, the "base config path".

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::sync::LazyLock;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::error::CustomizeError;

/// RFC 1123 hostname: dot-separated labels of 1-63 alphanumerics/hyphens,
/// not starting or ending with a hyphen.
static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$")
        .expect("hostname regex is valid")
});

const MAX_HOSTNAME_LEN: usize = 253;

/// Unix permission bits for a file placed in the image.
///
/// Deserializes from an octal string (`"0644"`, `"755"`) or an integer,
/// which is read as the mode value itself. Serializes as a four-digit
/// octal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePermissions(pub u32);

impl FilePermissions {
    pub fn mode(self) -> u32 {
        self.0
    }

    /// Parses an octal permission string.
    pub fn parse(s: &str) -> Result<Self, CustomizeError> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
        let mode = u32::from_str_radix(digits, 8).map_err(|_| {
            CustomizeError::Validation(format!("invalid octal file permissions: '{}'", s))
        })?;
        Self::checked(mode)
    }

    fn checked(mode: u32) -> Result<Self, CustomizeError> {
        if mode > 0o7777 {
            return Err(CustomizeError::Validation(format!(
                "file permissions {:o} exceed 7777",
                mode
            )));
        }
        Ok(Self(mode))
    }
}

impl fmt::Display for FilePermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl<'de> Deserialize<'de> for FilePermissions {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PermissionsVisitor;

        impl Visitor<'_> for PermissionsVisitor {
            type Value = FilePermissions;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an octal permission string such as \"0644\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                FilePermissions::parse(v).map_err(E::custom)
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let mode = u32::try_from(v).map_err(E::custom)?;
                FilePermissions::checked(mode).map_err(E::custom)
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let mode = u32::try_from(v).map_err(E::custom)?;
                FilePermissions::checked(mode).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(PermissionsVisitor)
    }
}

impl Serialize for FilePermissions {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// One destination for an additional file.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Absolute destination path inside the image.
    pub path: Utf8PathBuf,
    /// Mode to apply; the source file's mode is kept when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<FilePermissions>,
}

/// A script run inside the image.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Path relative to the config directory.
    pub path: Utf8PathBuf,
    /// Argument string appended to the command line verbatim.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub args: String,
}

/// Package add/remove/update directives.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_lists: Vec<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_lists: Vec<Utf8PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_lists: Vec<Utf8PathBuf>,
    /// Update every package already installed in the image.
    #[serde(default)]
    pub update_existing: bool,
}

impl PackageConfig {
    fn list_files(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.install_lists
            .iter()
            .chain(&self.remove_lists)
            .chain(&self.update_lists)
    }
}

/// Contents of a package list file.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageList {
    #[serde(default)]
    pub packages: Vec<String>,
}

/// Loads a package list file.
pub fn load_package_list(path: &Utf8Path) -> Result<PackageList, CustomizeError> {
    let file = File::open(path)
        .map_err(|e| CustomizeError::io(format!("failed to open package list {}", path), e))?;
    serde_yaml::from_reader(BufReader::new(file)).map_err(|e| {
        CustomizeError::Config(format!("failed to parse package list {}: {}", path, e))
    })
}

/// The customization request applied to one image.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SystemConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default)]
    pub packages: PackageConfig,
    /// Source path (relative to the config directory) to its destinations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_files: BTreeMap<Utf8PathBuf, Vec<FileConfig>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_install_scripts: Vec<Script>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalize_image_scripts: Vec<Script>,
}

impl SystemConfig {
    /// Returns the configured hostname, treating an empty string as unset.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref().filter(|h| !h.is_empty())
    }

    /// Validates the request against the config directory.
    pub fn validate(&self, base_config_path: &Utf8Path) -> Result<(), CustomizeError> {
        if let Some(hostname) = self.hostname() {
            validate_hostname(hostname)?;
        }

        for (source, destinations) in &self.additional_files {
            validate_relative_path(source, "additional file")?;
            validate_host_file_exists(&base_config_path.join(source), "additional file")?;
            if destinations.is_empty() {
                return Err(CustomizeError::Validation(format!(
                    "additional file '{}' has no destinations",
                    source
                )));
            }
            for destination in destinations {
                validate_destination(&destination.path)?;
            }
        }

        for script in self
            .post_install_scripts
            .iter()
            .chain(&self.finalize_image_scripts)
        {
            validate_relative_path(&script.path, "script")?;
            validate_host_file_exists(&base_config_path.join(&script.path), "script")?;
        }

        for list in self.packages.list_files() {
            validate_relative_path(list, "package list")?;
            validate_host_file_exists(&base_config_path.join(list), "package list")?;
        }

        Ok(())
    }
}

/// Top-level config file.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub system_config: SystemConfig,
}

/// A loaded config together with the directory it was read from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub base_config_path: Utf8PathBuf,
}

impl LoadedConfig {
    pub fn validate(&self) -> Result<(), CustomizeError> {
        self.config.system_config.validate(&self.base_config_path)
    }
}

/// Loads a config file from `path`.
pub fn load_config(path: &Utf8Path) -> Result<LoadedConfig, CustomizeError> {
    let file = File::open(path)
        .map_err(|e| CustomizeError::io(format!("failed to open config {}", path), e))?;
    let config: Config = serde_yaml::from_reader(BufReader::new(file))
        .map_err(|e| CustomizeError::Config(format!("failed to parse {}: {}", path, e)))?;

    let parent = match path.parent() {
        Some(p) if !p.as_str().is_empty() => p,
        _ => Utf8Path::new("."),
    };
    let base_config_path = parent.canonicalize_utf8().map_err(|e| {
        CustomizeError::io(format!("failed to resolve config directory {}", parent), e)
    })?;
    debug!("loaded config {} (base directory {})", path, base_config_path);

    Ok(LoadedConfig {
        config,
        base_config_path,
    })
}

fn validate_hostname(hostname: &str) -> Result<(), CustomizeError> {
    if hostname.len() > MAX_HOSTNAME_LEN || !HOSTNAME_RE.is_match(hostname) {
        return Err(CustomizeError::Validation(format!("invalid hostname: '{}'", hostname)));
    }
    Ok(())
}

fn validate_relative_path(path: &Utf8Path, label: &str) -> Result<(), CustomizeError> {
    if path.as_str().is_empty() {
        return Err(CustomizeError::Validation(format!("{} path must not be empty", label)));
    }
    if path.is_absolute() {
        return Err(CustomizeError::Validation(format!(
            "{} path '{}' must be relative to the config directory",
            label, path
        )));
    }
    if path.components().any(|c| c == Utf8Component::ParentDir) {
        return Err(CustomizeError::Validation(format!(
            "{} path '{}' contains '..' components, \
            which is not allowed for security reasons",
            label, path
        )));
    }
    Ok(())
}

fn validate_destination(path: &Utf8Path) -> Result<(), CustomizeError> {
    if !path.is_absolute() {
        return Err(CustomizeError::Validation(format!(
            "additional file destination '{}' must be absolute",
            path
        )));
    }
    if path.components().any(|c| c == Utf8Component::ParentDir) {
        return Err(CustomizeError::Validation(format!(
            "additional file destination '{}' contains '..' components",
            path
        )));
    }
    if path == Utf8Path::new("/") {
        return Err(CustomizeError::Validation(
            "additional file destination must not be '/'".to_string(),
        ));
    }
    Ok(())
}

fn validate_host_file_exists(path: &Utf8Path, label: &str) -> Result<(), CustomizeError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CustomizeError::io(format!("failed to read {} metadata: {}", label, path), e))?;
    if !metadata.is_file() {
        return Err(CustomizeError::Validation(format!("{} is not a file: {}", label, path)));
    }
    Ok(())
}
