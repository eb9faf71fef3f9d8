use comfy_table::{Cell, Table};

use crate::cli::store_config;
use crate::db::{connect, recent_loads};
use crate::error::Result;
use crate::settings::Settings;

pub fn run(db: Option<&str>, limit: usize, settings: &Settings) -> Result<()> {
    let config = store_config(db, settings);
    if !config.database.exists() {
        println!("Database not found. Run `salesload init` to set up.");
        return Ok(());
    }

    let conn = connect(&config)?;
    let loads = recent_loads(&conn, limit)?;
    if loads.is_empty() {
        println!("No files loaded yet.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "File", "Loaded", "Rows", "Transactions", "Line Items", "Checksum"]);
    for load in loads {
        table.add_row(vec![
            Cell::new(load.id),
            Cell::new(load.filename),
            Cell::new(load.loaded_at),
            Cell::new(load.row_count),
            Cell::new(load.transactions),
            Cell::new(load.line_items),
            Cell::new(&load.checksum[..12.min(load.checksum.len())]),
        ]);
    }
    println!("Load history\n{table}");
    Ok(())
}
