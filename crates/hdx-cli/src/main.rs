//! # hdx-cli
//!
//! Command-line front end for the schema engine.
//!
//! Loads schema trees through the same reader the services use, so a schema
//! that validates here validates in the pipeline.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use hdx_schema::resolution::ClasspathProvider;
use hdx_schema::{Flavor, SchemaConfig, SchemaReader, Scheme};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hdx")]
#[command(about = "Mapping schema loader and validator")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a schema tree and report every validation issue
    Validate {
        /// Schema name or location
        name: String,

        /// Schema flavor (generic, converter, transform)
        #[arg(short, long, value_parser = parse_flavor)]
        flavor: Flavor,

        /// Base location for relative names
        #[arg(short, long)]
        base: Option<String>,

        /// Schemas merged over the first one, in order
        #[arg(short, long)]
        overlay: Vec<String>,
    },

    /// Print a composed schema tree
    Show {
        /// Schema name or location
        name: String,

        /// Schema flavor (generic, converter, transform)
        #[arg(short, long, value_parser = parse_flavor)]
        flavor: Flavor,

        /// Base location for relative names
        #[arg(short, long)]
        base: Option<String>,

        /// Schemas merged over the first one, in order
        #[arg(short, long)]
        overlay: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// List the registered schema providers
    Providers,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

fn parse_flavor(value: &str) -> Result<Flavor, String> {
    value.parse::<Flavor>().map_err(|e| e.to_string())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&str>) -> anyhow::Result<SchemaConfig> {
    let config = match path {
        Some(path) => SchemaConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load config file {path}"))?,
        None => SchemaConfig::default(),
    };
    Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
}

/// `name` followed by its overlays, in merge order
fn layer_names<'a>(name: &'a str, overlays: &'a [String]) -> Vec<&'a str> {
    std::iter::once(name)
        .chain(overlays.iter().map(String::as_str))
        .collect()
}

fn validate(
    reader: &SchemaReader,
    name: &str,
    overlays: &[String],
    base: Option<&str>,
    flavor: Flavor,
) -> anyhow::Result<ExitCode> {
    let names = layer_names(name, overlays);
    let mut schema = match reader.read_overlaid_tree(&names, base, flavor) {
        Ok(schema) => schema,
        Err(e) => {
            println!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let issues = schema.validate(reader.compiler(), false);
    if issues.is_empty() {
        println!("valid");
        return Ok(ExitCode::SUCCESS);
    }

    tracing::warn!(
        "Schema {} has {} validation issue(s)",
        schema.display_name(),
        issues.len()
    );
    for issue in &issues {
        println!("{issue}");
    }
    Ok(ExitCode::FAILURE)
}

fn show(
    reader: &SchemaReader,
    name: &str,
    overlays: &[String],
    base: Option<&str>,
    flavor: Flavor,
    format: OutputFormat,
) -> anyhow::Result<ExitCode> {
    let schema = reader
        .read_overlaid_tree(&layer_names(name, overlays), base, flavor)
        .with_context(|| format!("Failed to load schema {name}"))?;

    let rendered = match format {
        OutputFormat::Yaml => serde_yaml::to_string(&schema)?,
        OutputFormat::Json => serde_json::to_string_pretty(&schema)?,
    };
    println!("{}", rendered.trim_end());
    Ok(ExitCode::SUCCESS)
}

fn providers(reader: &SchemaReader, config: &SchemaConfig) -> ExitCode {
    for scheme in reader.resolution().schemes() {
        let detail = match scheme {
            Scheme::File => "local filesystem".to_string(),
            Scheme::Classpath => format!(
                "{} bundled document(s)",
                ClasspathProvider::bundled().paths().len()
            ),
            Scheme::Azure => match config.blob_storage() {
                Some(storage) => format!("blob container {}", storage.container),
                None => "not configured".to_string(),
            },
        };
        println!("{scheme}\t{detail}");
    }
    ExitCode::SUCCESS
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    let reader = SchemaReader::from_config(&config);
    tracing::debug!("Using schema reader {:?}", reader);

    match cli.command {
        Commands::Validate {
            name,
            flavor,
            base,
            overlay,
        } => {
            tracing::info!("Validating {} schema {}", flavor, name);
            validate(&reader, &name, &overlay, base.as_deref(), flavor)
        }
        Commands::Show {
            name,
            flavor,
            base,
            overlay,
            format,
        } => show(&reader, &name, &overlay, base.as_deref(), flavor, format),
        Commands::Providers => Ok(providers(&reader, &config)),
    }
}
