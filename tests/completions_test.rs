//! Tests for shell completion functionality.
//!
//! This module tests the completions subcommand, ensuring that:
//! - Completions can be parsed for all supported shells
//! - Generation produces valid output without panicking
//! - The binary prints completions without needing a config file

use anyhow::Result;
use clap::{CommandFactory, Parser, ValueEnum};
use clap_complete::{Shell, generate};
use imgcustomizer::cli::{Cli, Commands};

/// Test parsing the completions command for all supported shells.
#[test]
fn test_completions_command_parsing() -> Result<()> {
    let shells = [
        ("bash", Shell::Bash),
        ("zsh", Shell::Zsh),
        ("fish", Shell::Fish),
        ("powershell", Shell::PowerShell),
        ("elvish", Shell::Elvish),
    ];

    for (shell_str, expected_shell) in shells {
        let args = Cli::parse_from(["imgcustomizer", "completions", shell_str]);
        match args.command {
            Commands::Completions(opts) => {
                assert_eq!(opts.shell, expected_shell, "Mismatched shell for '{}'", shell_str);
            }
            _ => panic!("Expected Completions command for shell '{}'", shell_str),
        }
    }

    Ok(())
}

/// Test that completion generation doesn't panic for any supported shell.
#[test]
fn test_completions_generation() -> Result<()> {
    let mut cmd = Cli::command();
    let mut buffer = Vec::new();

    for shell in Shell::value_variants() {
        buffer.clear();
        generate(*shell, &mut cmd, "imgcustomizer", &mut buffer);
        assert!(!buffer.is_empty(), "Generated completion for {:?} was empty", shell);
    }

    Ok(())
}

/// Test that completions for various shells contain the subcommands.
#[test]
fn test_completion_contents() -> Result<()> {
    let mut cmd = Cli::command();

    let test_cases = [
        (Shell::Bash, &["imgcustomizer", "customize", "validate", "completions"] as &[_]),
        (Shell::Zsh, &["#compdef imgcustomizer", "customize", "validate"]),
        (Shell::Fish, &["imgcustomizer", "customize", "rpm-source"]),
    ];

    for (shell, patterns) in test_cases {
        let mut buffer = Vec::new();
        generate(shell, &mut cmd, "imgcustomizer", &mut buffer);
        let output = String::from_utf8(buffer)?;

        for pattern in patterns {
            assert!(
                output.contains(pattern),
                "Pattern '{}' not found in {:?} completions",
                pattern,
                shell
            );
        }
    }

    Ok(())
}

/// Runs the built binary and checks the completions it prints.
#[test]
fn test_binary_prints_completions() -> Result<()> {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_imgcustomizer"))
        .args(["completions", "bash"])
        .output()?;

    assert!(output.status.success(), "completions command failed");
    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("imgcustomizer"));
    assert!(stdout.contains("customize"));

    Ok(())
}

/// Test that invalid shell names are rejected.
#[test]
fn test_invalid_shell_rejected() {
    let result = Cli::try_parse_from(["imgcustomizer", "completions", "invalid-shell"]);
    assert!(result.is_err(), "Expected parsing to fail for invalid shell");
}
