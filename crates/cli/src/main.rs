mod settings;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use facetrack_core::persistence::directory_store::DirectoryStore;
use facetrack_core::registry::domain::template_comparator::TemplateComparator;
use facetrack_core::registry::identity_registry::Registry;
use facetrack_core::registry::infrastructure::cosine_comparator::CosineComparator;
use facetrack_core::shared::template::Template;

use settings::Settings;

/// Label, match and merge face identities stored in a directory.
#[derive(Parser)]
#[command(name = "facetrack")]
struct Cli {
    /// Identity store directory (defaults to the platform data directory).
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Embedding width of template files, in f32 values.
    #[arg(long, global = true)]
    dim: Option<usize>,

    /// Worker threads for match scans (defaults to one per core).
    #[arg(long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print effective settings as JSON.
    Config {
        /// Also write them to the settings file.
        #[arg(long)]
        write: bool,
    },
    #[command(flatten)]
    Identity(IdentityCommand),
}

/// Commands that open the identity store.
#[derive(Subcommand)]
enum IdentityCommand {
    /// Register a new identity from a template file.
    Enroll { name: String, template: PathBuf },
    /// Add another template to an existing identity.
    Add { name: String, template: PathBuf },
    /// Find the identity closest to a template.
    Match {
        template: PathBuf,
        /// Minimum confidence (0.0-1.0) to report a known identity.
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Move all templates of one identity into another.
    Merge {
        /// Identity that survives the merge.
        #[arg(long)]
        into: String,
        /// Identity that is absorbed and removed.
        #[arg(long)]
        from: String,
    },
    /// Delete an identity.
    Remove { name: String },
    /// Set the display name shown for an identity.
    Rename { name: String, display_name: String },
    /// List stored identities.
    List,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let settings = effective_settings(&cli, Settings::load());
    validate(&cli, &settings)?;

    let store_dir = settings
        .store_dir()
        .ok_or("Could not determine store directory; pass --store")?;
    let store = DirectoryStore::new(&store_dir);

    match cli.command {
        Command::Config { write } => show_config(&settings, write),
        Command::Identity(command) => execute(command, &store, &settings),
    }
}

fn show_config(settings: &Settings, write: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(settings)?);
    if write {
        let path = Settings::config_path().ok_or("Could not determine config directory")?;
        settings.save_to(&path)?;
        log::info!("Settings written to {}", path.display());
    }
    Ok(())
}

fn execute(
    command: IdentityCommand,
    store: &DirectoryStore,
    settings: &Settings,
) -> Result<(), Box<dyn std::error::Error>> {
    let registry = open_registry(store, settings)?;

    match command {
        IdentityCommand::Enroll { name, template } => {
            registry.enroll(name.clone(), read_template(&template)?)?;
            store.save(&registry)?;
            println!("Enrolled {name}");
        }
        IdentityCommand::Add { name, template } => {
            registry.add_template(&name, read_template(&template)?)?;
            store.save(&registry)?;
            println!("Added template to {name}");
        }
        IdentityCommand::Match {
            template,
            threshold,
        } => {
            let threshold = threshold.unwrap_or(settings.match_threshold);
            let result = registry.identify(&read_template(&template)?, threshold);
            match result.key.and_then(|k| registry.get(&k).map(|r| (k, r))) {
                Some((key, record)) => println!(
                    "{key}\t{}\t{:.4}",
                    record.display_name(),
                    result.confidence
                ),
                None => println!("unknown"),
            }
        }
        IdentityCommand::Merge { into, from } => {
            registry.merge(&into, &from)?;
            store.save(&registry)?;
            println!("Merged {from} into {into}");
        }
        IdentityCommand::Remove { name } => {
            if !registry.remove(&name) {
                return Err(format!("Identity not found: {name}").into());
            }
            store.save(&registry)?;
            println!("Removed {name}");
        }
        IdentityCommand::Rename { name, display_name } => {
            registry.rename(&name, display_name.as_str())?;
            store.save(&registry)?;
            println!("Renamed {name} to {display_name}");
        }
        IdentityCommand::List => {
            let mut entries = registry.snapshot();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, record) in entries {
                println!("{key}\t{}\t{}", record.display_name(), record.len());
            }
        }
    }

    Ok(())
}

/// Command-line flags override the settings file.
fn effective_settings(cli: &Cli, mut settings: Settings) -> Settings {
    if let Some(store) = &cli.store {
        settings.store_dir = Some(store.clone());
    }
    if let Some(dim) = cli.dim {
        settings.embedding_dim = dim;
    }
    if let Some(threads) = cli.threads {
        settings.worker_threads = Some(threads);
    }
    settings
}

fn open_registry(
    store: &DirectoryStore,
    settings: &Settings,
) -> Result<Registry<String>, Box<dyn std::error::Error>> {
    let comparator: Arc<dyn TemplateComparator> =
        Arc::new(CosineComparator::new(settings.embedding_dim));
    let mut registry = Registry::new(comparator);
    if let Some(threads) = settings.worker_threads {
        registry = registry.with_worker_threads(threads)?;
    }

    if !store.dir().exists() {
        log::info!("Starting empty store at {}", store.dir().display());
        return Ok(registry);
    }

    let report = store.load_into(registry)?;
    for failure in &report.failures {
        eprintln!(
            "Warning: skipped {}: {}",
            failure.path.display(),
            failure.reason
        );
    }
    Ok(report.registry)
}

fn read_template(path: &Path) -> Result<Template, Box<dyn std::error::Error>> {
    let bytes = fs::read(path)
        .map_err(|e| format!("Cannot read template {}: {e}", path.display()))?;
    Ok(Template::new(bytes))
}

fn validate(cli: &Cli, settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    if settings.embedding_dim == 0 {
        return Err("Embedding dimension must be positive".into());
    }
    if settings.worker_threads == Some(0) {
        return Err("Worker threads must be positive".into());
    }
    if !(0.0..=1.0).contains(&settings.match_threshold) {
        return Err(format!(
            "Match threshold must be between 0.0 and 1.0, got {}",
            settings.match_threshold
        )
        .into());
    }
    if let Command::Identity(IdentityCommand::Match {
        threshold: Some(t), ..
    }) = &cli.command
    {
        if !(0.0..=1.0).contains(t) {
            return Err(format!("Threshold must be between 0.0 and 1.0, got {t}").into());
        }
    }
    Ok(())
}
