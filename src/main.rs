//! ij-devkit CLI
//!
//! Entry point for the `ij-devkit` command-line tool.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ij_cache::{CacheStore, CancellationToken, HttpTransport, Transport};
use ij_devkit::catalog::{JetbrainsCatalog, ReleaseCatalog, StaticCatalog};
use ij_devkit::config::{self, toml_to_json, BuildConfig, CatalogMode, EffectiveConfig};
use ij_devkit::pipeline::{self, PrepareOptions};
use ij_devkit::{Error, HostPlatform, Resolver};
use serde_json::{json, Map, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter
const LOG_ENV: &str = "IJ_DEVKIT_LOG";

#[derive(Parser)]
#[command(name = "ij-devkit")]
#[command(about = "Dependency resolution and sandbox provisioning for IntelliJ plugin builds", version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Project directory (default: current directory)
    #[arg(long, short = 'p', global = true, default_value = ".")]
    project: PathBuf,

    /// User config file (default: <config dir>/ij-devkit/config.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Never access the network
    #[arg(long, global = true)]
    offline: bool,

    /// Override a configuration value, e.g. --set platform.version=221.6008.13
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the artifact coordinates the build needs
    Resolve {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Download all required artifacts into the cache
    Fetch,

    /// Resolve, fetch and compose the sandbox
    Prepare {
        /// Verify the plugin under test after composing
        #[arg(long)]
        verify: bool,

        /// Plugin under test (directory, jar or plugin.xml)
        #[arg(long)]
        plugin: Option<PathBuf>,
    },

    /// Prepare the sandbox and verify the plugin under test against it
    Verify {
        /// Plugin under test (directory, jar or plugin.xml)
        #[arg(long)]
        plugin: Option<PathBuf>,

        /// Output the report in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Cache maintenance
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },

    /// Print the effective configuration with its sources
    Config,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached artifacts
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove abandoned staging directories
    Sweep {
        /// Only remove staging directories older than this
        #[arg(long, default_value_t = 24)]
        older_than_hours: u64,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("Cancelling...");
        handler_token.cancel();
    }) {
        debug!(error = %e, "cannot install Ctrl-C handler");
    }

    let result = match &cli.command {
        Commands::Resolve { json } => run_resolve(&cli, *json),
        Commands::Fetch => run_fetch(&cli, &cancel),
        Commands::Prepare { verify, plugin } => run_prepare(&cli, &cancel, *verify, plugin.clone()),
        Commands::Verify { plugin, json } => run_verify(&cli, &cancel, plugin.clone(), *json),
        Commands::Cache { action } => match action {
            CacheCommands::List { json } => run_cache_list(&cli, *json),
            CacheCommands::Sweep { older_than_hours } => run_cache_sweep(&cli, *older_than_hours),
        },
        Commands::Config => run_config(&cli),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(e.kind().exit_code());
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_resolve(cli: &Cli, json_output: bool) -> Result<(), Error> {
    let (_, config) = load_config(cli)?;
    let transport = http_transport(&config)?;
    let catalog = catalog(&config, transport);
    let resolution = Resolver::new(catalog.as_ref(), HostPlatform::current()).resolve(&config)?;

    if json_output {
        print_json(&resolution)?;
        return Ok(());
    }

    println!(
        "Platform: {} {}",
        resolution.platform.platform_type, resolution.platform.version
    );
    for plugin in &resolution.plugins {
        match &plugin.coordinate {
            Some(coord) => println!("  {}  {}", plugin.dependency, coord.url()),
            None => println!("  {}", plugin.dependency),
        }
    }
    println!("Artifacts:");
    for coord in resolution.coordinates() {
        println!("  {}", coord.url());
    }
    Ok(())
}

fn run_fetch(cli: &Cli, cancel: &CancellationToken) -> Result<(), Error> {
    let (_, config) = load_config(cli)?;
    let transport = http_transport(&config)?;
    let catalog = catalog(&config, transport.clone());
    let resolution = Resolver::new(catalog.as_ref(), HostPlatform::current()).resolve(&config)?;

    let entries =
        pipeline::fetcher(&config, transport, cancel, None).try_fetch_all(&resolution.coordinates())?;
    for entry in entries {
        println!("{}  {}", entry.coordinate, entry.content_path.display());
    }
    Ok(())
}

fn run_prepare(
    cli: &Cli,
    cancel: &CancellationToken,
    verify: bool,
    plugin: Option<PathBuf>,
) -> Result<(), Error> {
    let (_, config) = load_config(cli)?;
    let transport = http_transport(&config)?;
    let catalog = catalog(&config, transport.clone());

    let options = PrepareOptions {
        verify,
        plugin_under_test: plugin,
        cancel: cancel.clone(),
        ..PrepareOptions::default()
    };
    let prepared = pipeline::prepare(&config, transport, catalog.as_ref(), &options)?;
    let layout = prepared.sandbox.layout();

    println!(
        "Sandbox {} ({})",
        layout.root.display(),
        if prepared.sandbox.reused { "reused" } else { "composed" }
    );
    println!("  Platform: {} ({})", layout.platform_build, layout.platform.display());
    println!("  Config:   {}", layout.config.display());
    println!("  Plugins:  {}", layout.plugins.display());
    println!("  System:   {}", layout.system.display());
    println!("  Log:      {}", layout.log.display());
    if let Some(runtime) = &prepared.runtime_path {
        println!("  Runtime:  {}", runtime.display());
    }
    if let Some(sources) = &prepared.sources_path {
        println!("  Sources:  {}", sources.display());
    }
    if let Some(report) = &prepared.report {
        println!("Verification of {} passed", report.plugin_id);
    }
    Ok(())
}

fn run_verify(
    cli: &Cli,
    cancel: &CancellationToken,
    plugin: Option<PathBuf>,
    json_output: bool,
) -> Result<(), Error> {
    let (_, config) = load_config(cli)?;
    let transport = http_transport(&config)?;
    let catalog = catalog(&config, transport.clone());

    let options = PrepareOptions {
        verify: true,
        plugin_under_test: plugin,
        cancel: cancel.clone(),
        ..PrepareOptions::default()
    };

    match pipeline::prepare(&config, transport, catalog.as_ref(), &options) {
        Ok(prepared) => {
            if let Some(report) = &prepared.report {
                if json_output {
                    print_json(report)?;
                } else {
                    println!(
                        "{} is compatible with {}",
                        report.plugin_id, report.platform_build
                    );
                }
            }
            prepared.sandbox.finish()?;
            Ok(())
        }
        Err(Error::Verification(failure)) if json_output => {
            print_json(&json!({
                "plugin_id": failure.plugin_id,
                "platform_build": failure.platform_build,
                "findings": failure.findings,
            }))?;
            Err(Error::Verification(failure))
        }
        Err(e) => Err(e),
    }
}

fn run_cache_list(cli: &Cli, json_output: bool) -> Result<(), Error> {
    let (_, config) = load_config(cli)?;
    let store = CacheStore::new(config.cache_root());
    let entries = store.list_entries()?;
    let stats = store.stats()?;

    if json_output {
        let list: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "coordinate": e.coordinate.to_string(),
                    "key": e.key,
                    "path": e.content_path.display().to_string(),
                    "size": e.marker.size,
                    "created_at": e.marker.created_at,
                })
            })
            .collect();
        return print_json(&json!({ "entries": list, "stats": stats }));
    }

    println!("Cache root: {}", store.root().display());
    for entry in &entries {
        println!("  {}  {}", entry.coordinate, entry.content_path.display());
    }
    println!(
        "{} entries, {} bytes downloaded, {} bytes on disk, {} staging dirs",
        stats.entries, stats.download_bytes, stats.disk_bytes, stats.staging_dirs
    );
    Ok(())
}

fn run_cache_sweep(cli: &Cli, older_than_hours: u64) -> Result<(), Error> {
    let (_, config) = load_config(cli)?;
    let store = CacheStore::new(config.cache_root());
    let report = store.sweep_staging(Duration::from_secs(older_than_hours * 3600))?;
    println!(
        "Removed {} staging directories ({} bytes)",
        report.removed.len(),
        report.bytes
    );
    Ok(())
}

fn run_config(cli: &Cli) -> Result<(), Error> {
    let (effective, _) = load_config(cli)?;
    let json = effective.to_json().map_err(|e| Error::Io {
        path: cli.project.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    println!("{}", json);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<(EffectiveConfig, BuildConfig), Error> {
    let overrides = cli_overrides(cli)?;
    let project = absolute(&cli.project)?;
    Ok(config::load(&project, cli.config.as_deref(), overrides)?)
}

/// Build the CLI layer from `--offline` and `--set` flags.
fn cli_overrides(cli: &Cli) -> Result<Option<Value>, Error> {
    let mut root = Map::new();
    if cli.offline {
        root.insert("fetch".to_string(), json!({ "offline": true }));
    }

    for entry in &cli.overrides {
        let (key, raw) = entry.split_once('=').ok_or_else(|| {
            config::ConfigError::Validation(format!("--set expects KEY=VALUE, got '{}'", entry))
        })?;
        let value = match toml::from_str::<toml::Table>(&format!("v = {}", raw)) {
            Ok(mut table) => table.remove("v").map(toml_to_json).unwrap_or(Value::Null),
            Err(_) => Value::String(raw.to_string()),
        };
        insert_path(&mut root, key.trim(), value);
    }

    Ok((!root.is_empty()).then_some(Value::Object(root)))
}

fn insert_path(root: &mut Map<String, Value>, key: &str, value: Value) {
    let mut parts: Vec<&str> = key.split('.').collect();
    let last = parts.pop().unwrap_or(key);
    let mut current = root;
    for part in parts {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        current = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

fn absolute(path: &Path) -> Result<PathBuf, Error> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn http_transport(config: &BuildConfig) -> Result<Arc<dyn Transport>, Error> {
    let transport = HttpTransport::new(
        Duration::from_secs(config.fetch.connect_timeout_seconds),
        Duration::from_secs(config.fetch.request_timeout_seconds),
    )?;
    Ok(Arc::new(transport))
}

fn catalog(config: &BuildConfig, transport: Arc<dyn Transport>) -> Box<dyn ReleaseCatalog> {
    match config.catalog.mode {
        CatalogMode::Static => Box::new(StaticCatalog::from_config(&config.catalog)),
        CatalogMode::Jetbrains => Box::new(JetbrainsCatalog::new(transport)),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Error> {
    let text = serde_json::to_string_pretty(value).map_err(|e| Error::Io {
        path: PathBuf::from("<stdout>"),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;
    println!("{}", text);
    Ok(())
}
