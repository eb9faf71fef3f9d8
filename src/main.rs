mod association;
mod cli;
mod db;
mod error;
mod loader;
mod models;
mod reader;
mod reference;
mod resolver;
mod settings;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();

    let settings = match settings::load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    init_tracing(cli.log_level.as_deref().unwrap_or(&settings.log_level));

    let db = cli.db.as_deref();
    let result = match cli.command {
        Commands::Init { save } => cli::init::run(db, save, &settings),
        Commands::Load {
            files,
            product_identity,
            strict,
            allow_failures,
        } => cli::load::run(
            cli::load::LoadArgs {
                files: &files,
                db,
                product_identity,
                strict,
                allow_failures,
            },
            &settings,
        ),
        Commands::Status => cli::status::run(db, &settings),
        Commands::History { limit } => cli::history::run(db, limit, &settings),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
