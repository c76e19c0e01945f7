use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "gphotobackup",
    version,
    about = "Back up Google Photos media to a local directory"
)]
pub struct Cli {
    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Directory holding token.json and oauth_client.json (default: ~/.config/gphotobackup)
    #[arg(long, global = true)]
    pub config_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download all photos/videos found in the given album or date range
    Backup(BackupArgs),
    /// Inspect the remote library
    #[command(subcommand)]
    Print(PrintCommand),
}

#[derive(Args, Debug, Clone, Default)]
pub struct BackupArgs {
    /// Back up one album by id
    #[arg(long)]
    pub album_id: Option<String>,

    /// Back up items created in the last N days
    #[arg(long)]
    pub since_days: Option<u32>,

    /// Back up items created on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<String>,

    /// Last date of the --start range (YYYY-MM-DD, default: today)
    #[arg(long, requires = "start")]
    pub end: Option<String>,

    /// Also back up every album into albums/<title>
    #[arg(long)]
    pub albums: bool,

    /// Also back up favorites into favorites/
    #[arg(long)]
    pub favorites: bool,

    /// Destination root
    #[arg(long, default_value = ".")]
    pub out: String,

    /// Concurrent download workers
    #[arg(long, default_value_t = 3)]
    pub workers: usize,

    /// Emit details of every media item
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum PrintCommand {
    /// List all albums as JSON lines, sorted by name
    Albums {
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<String>,
    },
    /// Print every item of one album
    Album {
        /// Album id
        #[arg(long)]
        id: String,
    },
    /// Print one media item
    Item {
        /// Media item id
        #[arg(long)]
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_defaults() {
        let cli = Cli::try_parse_from(["gphotobackup", "backup", "--since-days", "7"]).unwrap();
        let Command::Backup(args) = cli.command else {
            panic!("expected backup");
        };
        assert_eq!(args.since_days, Some(7));
        assert_eq!(args.out, ".");
        assert_eq!(args.workers, 3);
        assert!(!args.verbose && !args.albums && !args.favorites);
        assert_eq!(cli.log_level, LogLevel::Info);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "gphotobackup",
            "print",
            "albums",
            "--log-level",
            "debug",
            "--config-dir",
            "/tmp/cfg",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert_eq!(cli.config_dir.as_deref(), Some("/tmp/cfg"));
        assert!(matches!(
            cli.command,
            Command::Print(PrintCommand::Albums { out: None })
        ));
    }

    #[test]
    fn test_end_requires_start() {
        assert!(Cli::try_parse_from(["gphotobackup", "backup", "--end", "2024-01-01"]).is_err());
    }

    #[test]
    fn test_print_item_requires_id() {
        assert!(Cli::try_parse_from(["gphotobackup", "print", "item"]).is_err());
        let cli = Cli::try_parse_from(["gphotobackup", "print", "item", "--id", "X"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Print(PrintCommand::Item { ref id }) if id == "X"
        ));
    }
}
