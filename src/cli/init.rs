use crate::cli::store_config;
use crate::db::connect;
use crate::error::Result;
use crate::settings::{save_settings, settings_path, Settings};

pub fn run(db: Option<&str>, save: bool, settings: &Settings) -> Result<()> {
    let config = store_config(db, settings);
    if let Some(dir) = config.database.parent() {
        std::fs::create_dir_all(dir)?;
    }
    connect(&config)?;
    println!("Database ready at {}", config.database.display());

    if save {
        let mut updated = settings.clone();
        updated.database = config.database.to_string_lossy().to_string();
        save_settings(&updated)?;
        println!("Saved settings to {}", settings_path().display());
    }
    Ok(())
}
