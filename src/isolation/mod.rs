//! Sandbox resources for mutating an image root.
//!
//! - [`chroot`] — the jail over the image root and its root-redirection session
//! - [`mount`] — scoped mounts that expose host directories inside the jail

pub mod chroot;
pub mod mount;

pub use chroot::{Chroot, ChrootSession, FileToCopy};
pub use mount::{Mount, MountFlag, MountSpec};
