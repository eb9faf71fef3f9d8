use comfy_table::{Cell, Table};

use crate::cli::store_config;
use crate::db::{connect, table_counts};
use crate::error::Result;
use crate::settings::Settings;

pub fn run(db: Option<&str>, settings: &Settings) -> Result<()> {
    let config = store_config(db, settings);
    println!("Database:   {}", config.database.display());

    if !config.database.exists() {
        println!();
        println!("Database not found. Run `salesload init` to set up.");
        return Ok(());
    }

    let conn = connect(&config)?;
    let mut table = Table::new();
    table.set_header(vec!["Table", "Rows"]);
    for (name, count) in table_counts(&conn)? {
        table.add_row(vec![Cell::new(name), Cell::new(count)]);
    }
    println!("{table}");
    Ok(())
}
