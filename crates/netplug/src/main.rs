mod cli;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info, warn};
use netplug_core::plugin_system::{LoadedPlugin, PluginLoader, PluginModule};
use netplug_core::LoaderConfig;

/// netplug: inspect versioned network-transport plugins
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List supported ABI generations and their exported symbol names
    Generations,
    /// Open a plugin library and report what each family resolved to
    Probe {
        /// Library to open; defaults to the configured candidates
        library: Option<PathBuf>,

        /// Loader configuration file (.json, .toml, .yaml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Also initialize the adopted transports (and finalize them afterwards)
        #[arg(long)]
        init: bool,

        /// Communicator id passed to init
        #[arg(long, default_value_t = 0)]
        comm_id: u64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Logs go to stderr so `--json` output stays parseable.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

    match args.command {
        Commands::Generations => {
            print!("{}", cli::render_generations());
            ExitCode::SUCCESS
        }
        Commands::Probe {
            library,
            config,
            json,
            init,
            comm_id,
        } => probe(library, config, json, init, comm_id).await,
    }
}

async fn load_config(path: Option<PathBuf>) -> Result<LoaderConfig, netplug_core::Error> {
    let mut config = match path {
        Some(path) => LoaderConfig::load(&path).await?,
        None => LoaderConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

async fn probe(
    library: Option<PathBuf>,
    config: Option<PathBuf>,
    json: bool,
    init: bool,
    comm_id: u64,
) -> ExitCode {
    let config = match load_config(config).await {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };
    let loader = PluginLoader::new(config);

    let plugin: Option<LoadedPlugin> = match library {
        Some(path) => match PluginModule::open(&path) {
            Ok(module) => Some(loader.adopt(Arc::new(module))),
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => loader.load(),
    };

    let Some(mut plugin) = plugin else {
        println!("No network plugin loaded");
        return ExitCode::SUCCESS;
    };

    if init {
        plugin.initialize(comm_id);
    }

    let status = match cli::render_report(&plugin.report(), json) {
        Ok(text) => {
            print!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to render report: {}", e);
            ExitCode::FAILURE
        }
    };

    if init {
        if let Err(e) = plugin.finalize() {
            warn!("{}", e);
        }
    }
    info!("Unloading {}", plugin.label());
    status
}
