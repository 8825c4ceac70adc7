use anyhow::Result;
use clap::Parser;
use rsimgstrap::cli::{Cli, Commands, LogLevel};

#[test]
fn test_parse_apply_command() -> Result<()> {
    let args = Cli::parse_from(["rsimgstrap", "apply", "--file", "test.yml"]);

    match args.command {
        Commands::Apply(opts) => {
            assert_eq!(opts.common.file, "test.yml");
            assert_eq!(opts.common.log_level, LogLevel::Info);
            assert!(!opts.dry_run);
        }
        _ => panic!("Expected Apply command"),
    }

    Ok(())
}

#[test]
fn test_parse_apply_command_with_flags() -> Result<()> {
    let args = Cli::parse_from([
        "rsimgstrap",
        "apply",
        "-f",
        "gentoo.yml",
        "--log-level",
        "debug",
        "--dry-run",
    ]);

    match args.command {
        Commands::Apply(opts) => {
            assert_eq!(opts.common.file, "gentoo.yml");
            assert_eq!(opts.common.log_level, LogLevel::Debug);
            assert!(opts.dry_run);
        }
        _ => panic!("Expected Apply command"),
    }

    Ok(())
}

#[test]
fn test_parse_apply_default_profile() -> Result<()> {
    let args = Cli::parse_from(["rsimgstrap", "apply"]);

    match args.command {
        Commands::Apply(opts) => assert_eq!(opts.common.file, "profile.yml"),
        _ => panic!("Expected Apply command"),
    }

    Ok(())
}

#[test]
fn test_parse_validate_command() -> Result<()> {
    let args = Cli::parse_from(["rsimgstrap", "validate", "--file", "test.yml", "-l", "warn"]);

    match &args.command {
        Commands::Validate(opts) => {
            assert_eq!(opts.common.file, "test.yml");
        }
        _ => panic!("Expected Validate command"),
    }
    assert_eq!(args.command.log_level(), Some(LogLevel::Warn));

    Ok(())
}

#[test]
fn test_parse_distros_command() -> Result<()> {
    let args = Cli::parse_from(["rsimgstrap", "distros"]);
    assert!(matches!(args.command, Commands::Distros));
    assert_eq!(args.command.log_level(), None);
    Ok(())
}

#[test]
fn test_validate_rejects_dry_run_flag() {
    let result = Cli::try_parse_from(["rsimgstrap", "validate", "--dry-run"]);
    assert!(result.is_err());
}

#[test]
fn test_invalid_log_level_rejected() {
    let result = Cli::try_parse_from(["rsimgstrap", "apply", "--log-level", "verbose"]);
    assert!(result.is_err());
}
