//! ferryctl - journal content transfer CLI.
//!
//! Thin front end over the ferry-core engine: configure servers, prepare
//! the data directory, and run the three transfer stages.

mod config;
mod render;

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use ferry_core::{ServerDefinition, ServerKind, TransferCoordinator};
use tracing_subscriber::{fmt, EnvFilter};

use config::Config;
use render::ConsoleReporter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CLI for transferring journal content between publishing servers.
#[derive(Parser)]
#[command(name = "ferryctl")]
#[command(about = "Pull journal content from one server and push it into another")]
#[command(version)]
struct Cli {
    /// Config file path (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print detail progress and request traces
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the initial config and create the data directory
    Init {
        /// Where transferred data is staged
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Add or update a named server definition
    DefineServer {
        name: String,

        #[arg(long)]
        host: String,

        /// Server type: http or ssh
        #[arg(long, default_value = "http", value_parser = parse_server_kind)]
        kind: ServerKind,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// List configured servers
    Servers,

    /// Reset the active run directory, discarding staged data
    Prepare,

    /// Stage 1: fetch indexes for the whole resource tree
    Index {
        /// Source server name (default: config default_source)
        #[arg(long)]
        source: Option<String>,

        /// Journal paths/codes to include
        paths: Vec<String>,

        /// Continue past recoverable errors without prompting
        #[arg(long)]
        yes: bool,
    },

    /// Stage 2: fetch record details and attachments
    Fetch {
        #[arg(long)]
        source: Option<String>,

        paths: Vec<String>,

        #[arg(long)]
        yes: bool,
    },

    /// Stage 3: push staged data into the target server
    Push {
        /// Target server name (default: config default_target)
        #[arg(long)]
        target: Option<String>,

        paths: Vec<String>,

        #[arg(long)]
        yes: bool,
    },

    /// Run all three stages back to back
    Transfer {
        #[arg(long)]
        source: Option<String>,

        #[arg(long)]
        target: Option<String>,

        paths: Vec<String>,

        #[arg(long)]
        yes: bool,
    },
}

fn main() -> eyre::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load_from(&config_path)?;

    match cli.command {
        Command::Init { data_dir } => {
            if data_dir.is_some() {
                config.data_directory = data_dir;
            }
            let data_dir = config.data_directory();
            fs::create_dir_all(data_dir.join("current"))
                .wrap_err_with(|| format!("cannot create {}", data_dir.display()))?;
            config.save_to(&config_path)?;
            println!("Config written to {}", config_path.display());
            println!("Data directory: {}", data_dir.display());
        }

        Command::DefineServer {
            name,
            host,
            kind,
            username,
            password,
            port,
        } => {
            config.servers.insert(
                name.clone(),
                ServerDefinition {
                    kind,
                    host,
                    username,
                    password,
                    port,
                },
            );
            config.save_to(&config_path)?;
            println!("Server `{name}` saved.");
        }

        Command::Servers => {
            if config.servers.is_empty() {
                println!("No servers defined.");
            } else {
                for (name, server) in &config.servers {
                    let auth = if server.username.is_some() {
                        "basic auth"
                    } else {
                        "no auth"
                    };
                    println!("{name:<20} {:<6} {} ({auth})", kind_str(server.kind), server.host);
                }
            }
        }

        Command::Prepare => {
            let current = config.data_directory().join("current");
            if current.exists() {
                fs::remove_dir_all(&current)
                    .wrap_err_with(|| format!("cannot remove {}", current.display()))?;
            }
            fs::create_dir_all(&current)
                .wrap_err_with(|| format!("cannot create {}", current.display()))?;
            println!("Prepared {}", current.display());
        }

        Command::Index { source, paths, yes } => {
            let coordinator = open_coordinator(&config, source.as_deref(), None)?;
            let mut reporter = ConsoleReporter::new(cli.verbose, yes);
            coordinator
                .fetch_indexes(&paths, &mut reporter)
                .wrap_err("indexing failed")?;
            println!("\nIndexing finished.");
        }

        Command::Fetch { source, paths, yes } => {
            let coordinator = open_coordinator(&config, source.as_deref(), None)?;
            let mut reporter = ConsoleReporter::new(cli.verbose, yes);
            coordinator
                .fetch_data(&paths, &mut reporter)
                .wrap_err("fetch failed")?;
            println!("\nFetch finished.");
        }

        Command::Push { target, paths, yes } => {
            let coordinator = open_coordinator(&config, None, target.as_deref())?;
            let mut reporter = ConsoleReporter::new(cli.verbose, yes);
            coordinator
                .push_data(&paths, &mut reporter)
                .wrap_err("push failed")?;
            println!("\nPush finished.");
        }

        Command::Transfer {
            source,
            target,
            paths,
            yes,
        } => {
            let coordinator =
                open_coordinator(&config, source.as_deref(), target.as_deref())?;
            let mut reporter = ConsoleReporter::new(cli.verbose, yes);
            coordinator
                .fetch_indexes(&paths, &mut reporter)
                .wrap_err("indexing failed")?;
            coordinator
                .fetch_data(&paths, &mut reporter)
                .wrap_err("fetch failed")?;
            coordinator
                .push_data(&paths, &mut reporter)
                .wrap_err("push failed")?;
            println!("\nTransfer finished.");
        }
    }

    Ok(())
}

fn open_coordinator(
    config: &Config,
    source: Option<&str>,
    target: Option<&str>,
) -> eyre::Result<TransferCoordinator> {
    let source_def = config.resolve_server(source, config.default_source.as_deref())?;
    let target_def = config.resolve_server(target, config.default_target.as_deref())?;
    TransferCoordinator::new(config.data_directory(), source_def, target_def)
        .wrap_err("failed to open workspace")
}

fn parse_server_kind(raw: &str) -> Result<ServerKind, String> {
    match raw {
        "http" => Ok(ServerKind::Http),
        "ssh" => Ok(ServerKind::Ssh),
        other => Err(format!("unknown server type `{other}` (expected http or ssh)")),
    }
}

fn kind_str(kind: ServerKind) -> &'static str {
    match kind {
        ServerKind::Http => "http",
        ServerKind::Ssh => "ssh",
    }
}
