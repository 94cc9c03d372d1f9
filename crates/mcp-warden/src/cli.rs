use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mcp-warden", version, about = "Secret-blocking gateway for MCP over SSE")]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "mcp-warden.yaml", global = true)]
    pub config: PathBuf,

    /// Listen port (overrides config file and SERVER_PORT)
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Path to an extra secret rule pack (overrides config file setting)
    #[arg(short, long, global = true)]
    pub rules: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the gateway (the default)
    Serve {
        /// Skip rewriting client config files on startup
        #[arg(long)]
        no_rewrite: bool,
    },

    /// Point MCP client config files at the gateway and exit
    RewriteConfig {
        /// Files to rewrite (defaults to the configured paths)
        paths: Vec<PathBuf>,

        /// Report what would change without writing anything
        #[arg(long)]
        dry_run: bool,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Serve { no_rewrite: false })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve() {
        let cli = Cli::try_parse_from(["mcp-warden"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("mcp-warden.yaml"));
        assert_eq!(cli.port, None);
        assert_eq!(cli.command(), Command::Serve { no_rewrite: false });
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["mcp-warden", "serve", "--no-rewrite", "--port", "9000"]).unwrap();
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.command(), Command::Serve { no_rewrite: true });
    }

    #[test]
    fn rewrite_config_paths() {
        let cli = Cli::try_parse_from([
            "mcp-warden",
            "rewrite-config",
            "--dry-run",
            "a/mcp.json",
            "b/settings.json",
        ])
        .unwrap();
        assert_eq!(
            cli.command(),
            Command::RewriteConfig {
                paths: vec![PathBuf::from("a/mcp.json"), PathBuf::from("b/settings.json")],
                dry_run: true,
            }
        );
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Cli::try_parse_from(["mcp-warden", "--port", "70000"]).is_err());
    }
}
