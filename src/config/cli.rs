use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "guidewise")]
#[command(about = "Guidebook publishing backend for short-term rental hosts")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, global = true, default_value = "guidewise.toml")]
    pub config: String,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve {
        /// Override server.port from config
        #[arg(long)]
        port: Option<u16>,

        /// Override database.path from config
        #[arg(long)]
        database: Option<String>,
    },

    /// Load and validate the configuration without side effects
    CheckConfig,

    /// Purge stale inactive drafts and orphaned hosts/properties
    Cleanup {
        /// Override maintenance.stale_draft_days from config
        #[arg(long)]
        days: Option<u32>,
    },

    /// Sign a bearer token for local testing
    DevToken {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        email: Option<String>,

        /// Token lifetime in hours
        #[arg(long, default_value = "24")]
        hours: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let cli = CliConfig::parse_from([
            "guidewise",
            "--config",
            "dev.toml",
            "serve",
            "--port",
            "8080",
        ]);
        assert_eq!(cli.config, "dev.toml");
        assert!(matches!(
            cli.command,
            Command::Serve {
                port: Some(8080),
                database: None
            }
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = CliConfig::parse_from(["guidewise", "cleanup", "--days", "7", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, "guidewise.toml");
        assert!(matches!(cli.command, Command::Cleanup { days: Some(7) }));
    }
}
