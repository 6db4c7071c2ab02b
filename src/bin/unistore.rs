use clap::{Parser, Subcommand};
use tracing::Level;
use unistore::*;

mod commands;

use commands::config::ConfigArgs;
use commands::records::{AddArgs, GetArgs, ListArgs, RemoveArgs, UpdateArgs};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.unistore/unistore.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long, global = true)]
    debug: bool,

    /// Output format: table (default), json, json-pretty, json-line
    #[clap(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the store version and record counts per container
    Status,

    /// Show configuration and store file paths
    Config(ConfigArgs),

    /// List the containers the store is provisioned with
    Containers,

    /// List all records of a container
    List(ListArgs),

    /// Get a single record by id
    Get(GetArgs),

    /// Add a record; any id in the record is ignored
    Add(AddArgs),

    /// Replace (or create) the record with the given id
    Update(UpdateArgs),

    /// Remove a record by id
    Remove(RemoveArgs),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level INFO or higher.
            .with_max_level(Level::INFO)
            .init();
    }

    let config = match UnistoreConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let format = cli.format;
    let result = match cli.command {
        Commands::Config(args) => {
            commands::config::run(&config, args, format);
            Ok(())
        }
        command => match HubStore::open_sqlite(&config) {
            Ok(store) => match command {
                Commands::Status => commands::status::run(&store, format).await,
                Commands::Containers => commands::status::run_containers(&store, format).await,
                Commands::List(args) => commands::records::list(&store, args, format).await,
                Commands::Get(args) => commands::records::get(&store, args, format).await,
                Commands::Add(args) => commands::records::add(&store, args, format).await,
                Commands::Update(args) => commands::records::update(&store, args, format).await,
                Commands::Remove(args) => commands::records::remove(&store, args).await,
                Commands::Config(_) => Ok(()),
            },
            Err(e) => Err(e.into()),
        },
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}
