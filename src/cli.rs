//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Crawl a site level by level and download what it links to.
///
/// Harvester follows the extraction rules in a TOML config, hands the
/// records found at the last level to a resumable, chunked downloader, and
/// records progress so interrupted downloads can be resumed.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl the configured target and download every final-level record
    Crawl {
        /// Path to the harvest config (TOML)
        config: PathBuf,
    },
    /// Resubmit downloads left unfinished by an earlier run
    Resume {
        /// Path to the harvest config (TOML)
        config: PathBuf,
    },
    /// Merge every `*.chunk` directory found in DIR
    Merge {
        /// Directory holding chunk directories
        dir: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_crawl_parses_config_path() {
        let args = Args::try_parse_from(["harvester", "crawl", "site.toml"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(matches!(args.command, Command::Crawl { config } if config == PathBuf::from("site.toml")));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["harvester", "-v", "merge", "out"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["harvester", "merge", "out", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["harvester", "--quiet", "resume", "site.toml"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        let result = Args::try_parse_from(["harvester"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["harvester", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["harvester", "crawl", "x.toml", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
