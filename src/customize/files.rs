//! Additional file placement.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

use crate::config::FileConfig;
use crate::error::CustomizeError;
use crate::isolation::{Chroot, FileToCopy};

/// Copies every configured additional file into the image.
///
/// Sources resolve against `base_config_path`. A source with several
/// destinations is copied to each of them. Stops at the first failure.
pub fn copy_additional_files(
    base_config_path: &Utf8Path,
    additional_files: &BTreeMap<Utf8PathBuf, Vec<FileConfig>>,
    chroot: &Chroot,
) -> Result<(), CustomizeError> {
    if additional_files.is_empty() {
        return Ok(());
    }

    let files = files_to_copy(base_config_path, additional_files);
    info!("copying {} additional file(s)", files.len());
    for file in &files {
        debug!("additional file {} -> {}", file.src, file.dest);
    }
    chroot.add_files(&files)
}

fn files_to_copy(
    base_config_path: &Utf8Path,
    additional_files: &BTreeMap<Utf8PathBuf, Vec<FileConfig>>,
) -> Vec<FileToCopy> {
    additional_files
        .iter()
        .flat_map(|(source, destinations)| {
            let src = base_config_path.join(source);
            destinations.iter().map(move |destination| FileToCopy {
                src: src.clone(),
                dest: destination.path.clone(),
                permissions: destination.permissions.map(|p| p.mode()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilePermissions;

    #[test]
    fn expands_each_destination_in_source_order() {
        let mut map = BTreeMap::new();
        map.insert(
            Utf8PathBuf::from("b.txt"),
            vec![FileConfig {
                path: "/opt/b".into(),
                permissions: None,
            }],
        );
        map.insert(
            Utf8PathBuf::from("a.txt"),
            vec![
                FileConfig {
                    path: "/opt/a1".into(),
                    permissions: Some(FilePermissions(0o600)),
                },
                FileConfig {
                    path: "/opt/a2".into(),
                    permissions: None,
                },
            ],
        );

        let files = files_to_copy(Utf8Path::new("/cfg"), &map);
        assert_eq!(
            files,
            vec![
                FileToCopy {
                    src: "/cfg/a.txt".into(),
                    dest: "/opt/a1".into(),
                    permissions: Some(0o600),
                },
                FileToCopy {
                    src: "/cfg/a.txt".into(),
                    dest: "/opt/a2".into(),
                    permissions: None,
                },
                FileToCopy {
                    src: "/cfg/b.txt".into(),
                    dest: "/opt/b".into(),
                    permissions: None,
                },
            ]
        );
    }
}
