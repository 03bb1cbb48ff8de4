use clap::{Parser, Subcommand};

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "safekeep",
    about = "Tiered secret storage that keeps working when the keychain does not",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the value stored under a key.
    Get { key: String },
    /// Store a value. Reads it from stdin when omitted.
    Set { key: String, value: Option<String> },
    /// Remove a key from the serving backend.
    Remove { key: String },
    /// Report whether a key is present.
    Contains { key: String },
    /// Probe every backend and print the resulting health snapshot.
    Health,
    /// List configured backends, best tier first.
    Backends,
    /// Move to the next viable backend.
    Failover,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
