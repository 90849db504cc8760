//! Privilege escalation for host-side commands.
//!
//! Mounting, unmounting, chrooting and package installation need root.
//! When the tool itself runs unprivileged, those commands are wrapped with
//! `sudo` or `doas` as selected on the command line.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Privilege escalation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeMethod {
    /// Use `sudo` for privilege escalation.
    Sudo,
    /// Use `doas` for privilege escalation.
    Doas,
}

impl PrivilegeMethod {
    /// Returns the command name for this privilege method.
    pub fn command_name(&self) -> &'static str {
        match self {
            Self::Sudo => "sudo",
            Self::Doas => "doas",
        }
    }

    /// Prefixes `command args...` with the escalation command.
    ///
    /// Returns the new `(command, args)` pair, e.g. `("sudo", ["mount", ...])`.
    pub fn wrap(&self, command: &str, args: &[String]) -> (String, Vec<String>) {
        let mut wrapped = Vec::with_capacity(args.len() + 1);
        wrapped.push(command.to_string());
        wrapped.extend(args.iter().cloned());
        (self.command_name().to_string(), wrapped)
    }
}

impl std::fmt::Display for PrivilegeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command_name())
    }
}
