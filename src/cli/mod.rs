//! Command-line interface.

use clap::{Parser, Subcommand};

/// Atelier - drawings, games and a micro-blog behind one account system
#[derive(Parser)]
#[command(name = "atelier")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP API (default)
    #[command(alias = "daemon")]
    Serve,

    /// Remove an account and everything that references it.
    /// Safe to repeat; use it to finish a cascade that stopped partway.
    Purge {
        /// Username (soft-deleted accounts included) or internal id
        target: String,
    },

    /// Write a default config.toml if none exists
    InitConfig,
}

impl Cli {
    #[must_use]
    pub fn command(&self) -> &Commands {
        self.command.as_ref().unwrap_or(&Commands::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::parse_from(["atelier"]);
        assert_eq!(cli.command(), &Commands::Serve);
    }

    #[test]
    fn purge_takes_a_target() {
        let cli = Cli::parse_from(["atelier", "purge", "alice"]);
        assert_eq!(
            cli.command(),
            &Commands::Purge {
                target: "alice".to_string()
            }
        );
    }

    #[test]
    fn init_config_is_kebab_case() {
        let cli = Cli::parse_from(["atelier", "init-config"]);
        assert_eq!(cli.command(), &Commands::InitConfig);
    }
}
