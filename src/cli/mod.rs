pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::domain::UpdateConfig;

#[derive(Parser)]
#[command(name = "filtersync")]
#[command(about = "Keeps ad-block filter subscriptions up to date", long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.config/filtersync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one sync pass now
    Sync {
        /// Download every subscription even if nothing changed
        #[arg(short, long)]
        force: bool,
    },
    /// Background daemon for scheduled updates
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Send the daily user-counting ping
    Count,
    /// Check that a subscription URL is reachable
    Validate {
        /// URL of the filter list
        url: String,
    },
    /// Show subscriptions and last sync state
    Status,
    /// Print the path of the consolidated filter file
    Path,
    /// Write the filter list a content blocker would load to stdout
    Show,
    /// Add a filter list subscription
    Subscribe {
        /// URL of the list, or a local path with --file
        url: String,
        /// Display title
        #[arg(short, long)]
        title: Option<String>,
        /// Read rules from a local file instead of downloading
        #[arg(long)]
        file: bool,
        /// Add as a primary subscription
        #[arg(long)]
        primary: bool,
    },
    /// Remove a filter list subscription
    Unsubscribe {
        /// URL or path of the subscription
        url: String,
    },
    /// Never block on a domain
    Allow {
        domain: String,
        /// Remove the domain from the list instead
        #[arg(long)]
        remove: bool,
    },
    /// Always block a domain
    Block {
        domain: String,
        /// Remove the domain from the list instead
        #[arg(long)]
        remove: bool,
    },
    /// Turn the Acceptable Ads list on or off
    AcceptableAds {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Choose when periodic updates may use the network
    Cadence {
        #[arg(value_enum)]
        mode: Cadence,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the daemon in the foreground
    Start,
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Cadence {
    /// Only on unmetered networks
    Wifi,
    /// On any connection
    Always,
}

impl From<Cadence> for UpdateConfig {
    fn from(c: Cadence) -> Self {
        match c {
            Cadence::Wifi => UpdateConfig::WifiOnly,
            Cadence::Always => UpdateConfig::Always,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sync_force() {
        let cli = Cli::parse_from(["filtersync", "sync", "--force"]);
        assert!(matches!(cli.command, Commands::Sync { force: true }));
    }

    #[test]
    fn test_parse_global_config() {
        let cli = Cli::parse_from(["filtersync", "status", "--config", "/tmp/c.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
    }

    #[test]
    fn test_parse_settings_commands() {
        let cli = Cli::parse_from(["filtersync", "acceptable-ads", "off"]);
        assert!(matches!(
            cli.command,
            Commands::AcceptableAds { state: Toggle::Off }
        ));

        let cli = Cli::parse_from(["filtersync", "cadence", "always"]);
        match cli.command {
            Commands::Cadence { mode } => {
                assert_eq!(UpdateConfig::from(mode), UpdateConfig::Always)
            }
            _ => panic!("expected cadence"),
        }
    }

    #[test]
    fn test_parse_subscribe_file() {
        let cli = Cli::parse_from(["filtersync", "subscribe", "/tmp/my.txt", "--file", "-t", "Mine"]);
        match cli.command {
            Commands::Subscribe { url, title, file, primary } => {
                assert_eq!(url, "/tmp/my.txt");
                assert_eq!(title.as_deref(), Some("Mine"));
                assert!(file);
                assert!(!primary);
            }
            _ => panic!("expected subscribe"),
        }
    }
}
