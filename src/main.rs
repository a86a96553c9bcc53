use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hookline::config::HostConfig;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "hookline")]
#[command(version, about = "Run CLI commands through user hooks and out-of-process plugins")]
pub struct Cli {
    /// Debug logging (overridden by HOOKLINE_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration directory (default: HOOKLINE_CONFIG_DIR or the platform config dir)
    #[arg(long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Data directory (default: HOOKLINE_DATA_DIR or the platform data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List, scaffold, test and trace hooks
    Hook {
        #[command(subcommand)]
        command: HookCommands,
    },
    /// Inspect installed plugins
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum HookCommands {
    /// Show every registered hook and any load diagnostics
    List,
    /// Scaffold an executable hook script in the hooks directory
    Create {
        /// Dotted command name, e.g. todo.add
        command: String,
        /// prevalidate, preexec, postexec or notify
        stage: String,
    },
    /// Dry-run a hook script against a sample context
    Test { path: PathBuf },
    /// Run a command name through the full pipeline around an echo handler
    Run {
        /// Dotted command name whose hooks should run
        command: String,
        /// Positional arguments for the command
        args: Vec<String>,
        /// Flags as key=value, repeatable
        #[arg(short = 'f', long = "flag", value_parser = parse_flag)]
        flags: Vec<(String, String)>,
    },
}

#[derive(Subcommand, Clone)]
pub enum PluginCommands {
    /// Show installed plugins, their hooks and permissions
    List,
    /// Show everything a plugin's manifest declares
    Info { name: String },
    /// Send a health check to one plugin or all of them
    Health { name: Option<String> },
    /// Run a custom command provided by a plugin
    Run {
        /// Plugin name
        plugin: String,
        /// Command declared in the plugin's manifest
        command: String,
        /// Positional arguments passed to the plugin
        args: Vec<String>,
        /// Flags as key=value, repeatable
        #[arg(short = 'f', long = "flag", value_parser = parse_flag)]
        flags: Vec<(String, String)>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
}

fn parse_flag(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("invalid flag '{}': expected key=value", raw))?;
    if key.trim().is_empty() {
        anyhow::bail!("invalid flag '{}': key is empty", raw);
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HostConfig::with_cli_args(cli.config_dir.clone(), cli.data_dir.clone(), cli.verbose)?;
    let _logging = hookline::logging::init(cli.verbose, Some(&config.paths.log_dir()));

    let host = cmd::Host::start(config);
    host.announce_init();

    let result = match &cli.command {
        Commands::Hook { command } => cmd::cmd_hook(&host, command).await,
        Commands::Plugin { command } => cmd::cmd_plugin(&host, command).await,
        Commands::Config { command } => cmd::cmd_config(&host, command.as_ref()).await,
    };

    if let Ok(output) = &result {
        cmd::print_output(output);
    }

    host.shutdown().await;

    result.map(|_| ())
}
