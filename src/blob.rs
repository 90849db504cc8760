//! Blob storage for build artifacts.
//!
//! [`BlobStore`] moves files between the local filesystem and named blobs
//! grouped in containers. [`BlobStorageConfig`] describes a remote storage
//! account and how to access it; [`FsBlobStore`] keeps blobs in a local
//! directory tree and is used for artifact staging.

use std::fmt;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::error::CustomizeError;
use crate::fsutil;

/// Storage account names: 3-24 lowercase letters and digits.
static ACCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{3,24}$").expect("account regex is valid"));

/// How a client authenticates against the storage account.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlobAccess {
    /// Read-only access to public containers.
    Anonymous,
    /// Service principal credentials. Carried as-is; never logged.
    ClientSecret {
        tenant_id: String,
        client_id: String,
        client_secret: String,
    },
}

impl fmt::Debug for BlobAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::ClientSecret {
                tenant_id,
                client_id,
                ..
            } => f
                .debug_struct("ClientSecret")
                .field("tenant_id", tenant_id)
                .field("client_id", client_id)
                .field("client_secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Remote storage account settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BlobStorageConfig {
    pub account: String,
    pub access: BlobAccess,
}

impl BlobStorageConfig {
    pub fn validate(&self) -> Result<(), CustomizeError> {
        if !ACCOUNT_RE.is_match(&self.account) {
            return Err(CustomizeError::Validation(format!(
                "invalid storage account name '{}': expected 3-24 lowercase letters or digits",
                self.account
            )));
        }
        if let BlobAccess::ClientSecret {
            tenant_id,
            client_id,
            client_secret,
        } = &self.access
        {
            for (name, value) in [
                ("tenant_id", tenant_id),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ] {
                if value.is_empty() {
                    return Err(CustomizeError::Validation(format!(
                        "blob storage client secret access requires a non-empty {}",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Service endpoint, `https://<account>.blob.core.windows.net/`.
    pub fn endpoint(&self) -> Result<Url, CustomizeError> {
        self.validate()?;
        let endpoint = format!("https://{}.blob.core.windows.net/", self.account);
        Url::parse(&endpoint).map_err(|e| {
            CustomizeError::Storage(format!("invalid endpoint {}: {}", endpoint, e))
        })
    }

    /// URL of one blob under the endpoint.
    pub fn blob_url(&self, container: &str, blob: &str) -> Result<Url, CustomizeError> {
        validate_name(container, "container")?;
        validate_name(blob, "blob")?;
        self.endpoint()?
            .join(&format!("{}/{}", container, blob))
            .map_err(|e| {
                CustomizeError::Storage(format!("invalid blob URL for {}/{}: {}", container, blob, e))
            })
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self.access, BlobAccess::Anonymous)
    }
}

/// Transfers files to and from blob storage.
pub trait BlobStore: Send + Sync {
    /// Uploads `local` as `<container>/<blob>`, replacing an existing blob.
    fn upload(&self, local: &Utf8Path, container: &str, blob: &str) -> Result<(), CustomizeError>;

    /// Downloads `<container>/<blob>` to `local`, replacing an existing file.
    fn download(&self, container: &str, blob: &str, local: &Utf8Path) -> Result<(), CustomizeError>;
}

/// Relative, non-empty and free of `..` and `.` components.
fn validate_name(name: &str, kind: &str) -> Result<(), CustomizeError> {
    let path = Utf8Path::new(name);
    let valid = !name.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Utf8Component::Normal(_)));
    if !valid {
        return Err(CustomizeError::Validation(format!("invalid {} name: '{}'", kind, name)));
    }
    Ok(())
}

/// [`BlobStore`] that keeps blobs at `<root>/<container>/<blob>`.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: Utf8PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn blob_path(&self, container: &str, blob: &str) -> Result<Utf8PathBuf, CustomizeError> {
        validate_name(container, "container")?;
        validate_name(blob, "blob")?;
        Ok(self.root.join(container).join(blob))
    }
}

impl BlobStore for FsBlobStore {
    fn upload(&self, local: &Utf8Path, container: &str, blob: &str) -> Result<(), CustomizeError> {
        let target = self.blob_path(container, blob)?;
        let start = Instant::now();

        if !local.is_file() {
            warn!("failed to open local file for upload: {}", local);
            return Err(CustomizeError::Storage(format!(
                "local file for upload does not exist: {}",
                local
            )));
        }
        fsutil::copy(local, &target).map_err(|e| {
            CustomizeError::Storage(format!(
                "failed to upload {} to {}/{}: {}",
                local,
                container,
                blob,
                crate::error::io_error_kind_message(&e)
            ))
        })?;

        info!("uploaded {} to {}/{} in {:?}", local, container, blob, start.elapsed());
        Ok(())
    }

    fn download(&self, container: &str, blob: &str, local: &Utf8Path) -> Result<(), CustomizeError> {
        let source = self.blob_path(container, blob)?;
        let start = Instant::now();

        if !source.is_file() {
            return Err(CustomizeError::Storage(format!(
                "blob not found: {}/{}",
                container, blob
            )));
        }
        fsutil::copy(&source, local).map_err(|e| {
            CustomizeError::Storage(format!(
                "failed to download {}/{} to {}: {}",
                container,
                blob,
                local,
                crate::error::io_error_kind_message(&e)
            ))
        })?;

        info!("downloaded {}/{} to {} in {:?}", container, blob, local, start.elapsed());
        Ok(())
    }
}
