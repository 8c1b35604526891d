use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hpi::cache::{self, CacheBackend};
use hpi::config::{self, Config};
use hpi::module::ModuleRegistry;
use hpi::modules::create_registry;

/// Log filter directive, e.g. `debug` or `hpi::cache=debug`.
const LOG_ENV: &str = "HPI_LOGS";

#[derive(Parser)]
#[command(name = "hpi")]
#[command(version)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Bypass the cache for this run
    #[arg(long, global = true)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Output per-module statistics as JSON
    Stats(StatsArgs),
    /// List the files each module would read
    Inputs {
        /// Only this module
        #[arg(long)]
        module: Option<String>,
    },
    /// Manage configuration
    Config(ConfigArgs),
    /// Manage the cache
    Cache(CacheArgs),
}

#[derive(Args)]
struct StatsArgs {
    /// Only this module
    #[arg(long)]
    module: Option<String>,

    /// Pretty-print JSON instead of a single line
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    subcommand: ConfigSubcommands,
}

#[derive(Subcommand)]
enum ConfigSubcommands {
    /// Create default configuration file
    Init {
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// Show current configuration
    Show,
    /// Set configuration value
    Set {
        /// Configuration key, `section.field` (cache.enabled, zsh.export-path, commits.emails, ...)
        key: String,
        /// Configuration value; lists are comma separated
        value: String,
    },
}

#[derive(Args)]
struct CacheArgs {
    #[command(subcommand)]
    subcommand: CacheSubcommands,
}

#[derive(Subcommand)]
enum CacheSubcommands {
    /// Remove cached entries
    Clear {
        /// Only this module's entries
        #[arg(long)]
        module: Option<String>,
    },
    /// Show where the cache lives
    Path,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    if cli.no_cache {
        cache::set_enabled(false);
    }

    let result = match cli.command {
        Commands::Stats(args) => run_stats(args).context("Failed to generate stats"),
        Commands::Inputs { module } => run_inputs(module.as_deref()),
        Commands::Config(args) => handle_config_subcommand(args),
        Commands::Cache(args) => handle_cache_subcommand(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn load_registry() -> Result<(ModuleRegistry, std::sync::Arc<dyn CacheBackend>)> {
    let config = Config::load_or_default()?;
    let store = cache::open_store(&config);
    Ok((create_registry(&config, std::sync::Arc::clone(&store)), store))
}

fn run_stats(args: StatsArgs) -> Result<()> {
    let (registry, _) = load_registry()?;

    let stats = match args.module.as_deref() {
        Some(name) => {
            let module = registry
                .get_by_name(name)
                .with_context(|| format!("Module '{name}' is not configured"))?;
            vec![module.stats()?]
        }
        None => registry.all_stats(),
    };

    if args.pretty {
        let json = simd_json::to_string_pretty(&stats)?;
        println!("{json}");
    } else {
        let json = simd_json::to_string(&stats)?;
        println!("{json}");
    }

    Ok(())
}

fn run_inputs(only: Option<&str>) -> Result<()> {
    let (registry, _) = load_registry()?;

    for module in registry.available_modules() {
        if only.is_some_and(|name| name != module.name()) {
            continue;
        }
        println!("{}:", module.name());
        match module.inputs() {
            Ok(paths) => {
                for path in paths {
                    println!("   {}", path.display());
                }
            }
            Err(e) => println!("   error: {e:#}"),
        }
    }
    Ok(())
}

fn handle_config_subcommand(config_args: ConfigArgs) -> Result<()> {
    match config_args.subcommand {
        ConfigSubcommands::Init { overwrite } => {
            config::create_default_config(overwrite).context("Error creating config")
        }
        ConfigSubcommands::Show => config::show_config().context("Error showing config"),
        ConfigSubcommands::Set { key, value } => {
            config::set_config_value(&key, &value).context("Error setting config")
        }
    }
}

fn handle_cache_subcommand(cache_args: CacheArgs) -> Result<()> {
    let config = Config::load_or_default()?;
    let store = cache::open_store(&config);

    match cache_args.subcommand {
        CacheSubcommands::Clear { module } => {
            let removed = store.clear(module.as_deref())?;
            println!("Removed {removed} cache entries");
        }
        CacheSubcommands::Path => println!("{}", store.describe()),
    }
    Ok(())
}
