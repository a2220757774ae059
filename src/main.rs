use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use queryforge::{
    compiler::{QueryCache, QueryCompiler},
    config, model, server,
    sql_generator::load_dialect,
};

/// QueryForge - compiles method-chain queries over an entity model to SQL
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile one query and print the SQL
    Compile {
        /// Model definition file (YAML)
        #[arg(long)]
        model: String,

        /// Built-in dialect name or dialect file
        #[arg(long, default_value = "sqlserver")]
        dialect: String,

        /// Query text, e.g. `Orders.Where(o => o.Total > 10)`
        query: String,

        /// Also print the result shaper as JSON
        #[arg(long)]
        shaper: bool,

        /// Also print the relational IR as JSON
        #[arg(long)]
        ir: bool,
    },

    /// Run the HTTP compilation server
    Serve {
        /// YAML server configuration; command line flags override it
        #[arg(long)]
        config: Option<String>,

        /// HTTP server host address
        #[arg(long)]
        http_host: Option<String>,

        /// HTTP server port
        #[arg(long)]
        http_port: Option<u16>,

        /// Model definition file; repeat for several models
        #[arg(long = "model")]
        models: Vec<String>,

        /// Default dialect for requests that don't name one
        #[arg(long)]
        dialect: Option<String>,

        /// Disable the compiled query cache
        #[arg(long)]
        disable_cache: bool,

        /// Run server in daemon mode (exit cleanly on SIGTERM/SIGINT)
        #[arg(long)]
        daemon: bool,
    },
}

fn compile(model_path: &str, dialect: &str, query: &str, shaper: bool, ir: bool) -> anyhow::Result<()> {
    let model = model::load_model(model_path)
        .with_context(|| format!("loading model {}", model_path))?;
    let dialect = load_dialect(dialect).with_context(|| format!("loading dialect {}", dialect))?;
    let compiler = QueryCompiler::with_cache(model, dialect, Arc::new(QueryCache::with_defaults()));

    let compiled = compiler.compile_text(query)?;
    println!("{}", compiled.sql);
    if !compiled.parameters.is_empty() {
        println!("-- parameters: {}", compiled.parameters.join(", "));
    }
    if shaper {
        println!("{}", serde_json::to_string_pretty(&compiled.shaper)?);
    }
    if ir {
        println!("{}", serde_json::to_string_pretty(&compiled.select)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger - defaults to INFO level, can be overridden with RUST_LOG env var
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Compile {
            model,
            dialect,
            query,
            shaper,
            ir,
        } => compile(&model, &dialect, &query, shaper, ir),
        Command::Serve {
            config: config_path,
            http_host,
            http_port,
            models,
            dialect,
            disable_cache,
            daemon,
        } => {
            let cli_config = config::CliConfig {
                http_host,
                http_port,
                model_paths: models,
                dialect,
                disable_cache,
                daemon,
            };
            let config = match config_path {
                Some(path) => config::ServerConfig::from_yaml_file(&path)
                    .with_context(|| format!("loading server configuration {}", path))?
                    .with_cli(cli_config)?,
                None => config::ServerConfig::from_cli(cli_config)?,
            };

            println!("\nQueryForge v{}\n", env!("CARGO_PKG_VERSION"));
            server::run_with_config(config).await?;
            Ok(())
        }
    }
}
