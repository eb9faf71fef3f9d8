use std::path::{Path, PathBuf};

use rusqlite::{Connection, Params};

use crate::error::{LoadError, Result};
use crate::models::{LoadRecord, LoadReport};

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS stores (
    store_id INTEGER PRIMARY KEY,
    store_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS clients (
    client_id INTEGER PRIMARY KEY,
    client_name TEXT NOT NULL,
    email_address TEXT NOT NULL DEFAULT '',
    phone_number TEXT NOT NULL DEFAULT '',
    UNIQUE (client_name, email_address, phone_number)
);

CREATE TABLE IF NOT EXISTS sales_representatives (
    sales_rep_id INTEGER PRIMARY KEY,
    sales_representative_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS products (
    product_id INTEGER PRIMARY KEY,
    product_name TEXT NOT NULL,
    store_id INTEGER NOT NULL,
    price REAL NOT NULL,
    UNIQUE (product_name, store_id),
    FOREIGN KEY (store_id) REFERENCES stores(store_id)
);

CREATE TABLE IF NOT EXISTS transactions (
    transaction_id TEXT PRIMARY KEY,
    transaction_date TEXT NOT NULL,
    store_id INTEGER,
    client_id INTEGER,
    sales_rep_id INTEGER,
    FOREIGN KEY (store_id) REFERENCES stores(store_id),
    FOREIGN KEY (client_id) REFERENCES clients(client_id),
    FOREIGN KEY (sales_rep_id) REFERENCES sales_representatives(sales_rep_id)
);

CREATE TABLE IF NOT EXISTS transaction_products (
    id INTEGER PRIMARY KEY,
    transaction_id TEXT NOT NULL,
    product_id INTEGER,
    quantity INTEGER NOT NULL,
    UNIQUE (transaction_id, product_id),
    FOREIGN KEY (transaction_id) REFERENCES transactions(transaction_id),
    FOREIGN KEY (product_id) REFERENCES products(product_id)
);

CREATE TABLE IF NOT EXISTS load_history (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    checksum TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    stores INTEGER NOT NULL DEFAULT 0,
    clients INTEGER NOT NULL DEFAULT 0,
    sales_reps INTEGER NOT NULL DEFAULT 0,
    products INTEGER NOT NULL DEFAULT 0,
    transactions INTEGER NOT NULL DEFAULT 0,
    line_items INTEGER NOT NULL DEFAULT 0,
    loaded_at TEXT DEFAULT (datetime('now'))
);
";

/// Tables shown by `status`, in foreign-key order.
pub const TABLES: &[&str] = &[
    "stores",
    "clients",
    "sales_representatives",
    "products",
    "transactions",
    "transaction_products",
];

/// Where the store lives. Passed explicitly to every file pass.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub database: PathBuf,
}

impl StoreConfig {
    pub fn new(database: impl Into<PathBuf>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

pub fn get_connection(db_path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

/// Open the store and make sure the schema is in place.
pub fn connect(config: &StoreConfig) -> Result<Connection> {
    let connection_error = |source| LoadError::Connection {
        database: config.database.display().to_string(),
        source,
    };
    let conn = get_connection(&config.database).map_err(connection_error)?;
    init_db(&conn).map_err(connection_error)?;
    Ok(conn)
}

/// Run one prepared statement over every row. Returns the number of rows changed.
pub fn execute_many<P, I>(conn: &Connection, sql: &str, rows: I) -> rusqlite::Result<usize>
where
    P: Params,
    I: IntoIterator<Item = P>,
{
    let mut stmt = conn.prepare_cached(sql)?;
    let mut changed = 0usize;
    for params in rows {
        changed += stmt.execute(params)?;
    }
    Ok(changed)
}

pub fn record_load(
    conn: &Connection,
    filename: &str,
    checksum: &str,
    report: &LoadReport,
) -> Result<()> {
    conn.execute(
        "INSERT INTO load_history (filename, checksum, row_count, stores, clients, sales_reps, products, transactions, line_items) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            filename,
            checksum,
            report.rows_read as i64,
            report.stores as i64,
            report.clients as i64,
            report.sales_reps as i64,
            report.products as i64,
            report.transactions as i64,
            report.line_items as i64,
        ],
    )?;
    Ok(())
}

pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let count: i64 =
            conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))?;
        counts.push((*table, count));
    }
    Ok(counts)
}

pub fn recent_loads(conn: &Connection, limit: usize) -> Result<Vec<LoadRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, filename, checksum, row_count, transactions, line_items, loaded_at \
         FROM load_history ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(LoadRecord {
                id: row.get(0)?,
                filename: row.get(1)?,
                checksum: row.get(2)?,
                row_count: row.get(3)?,
                transactions: row.get(4)?,
                line_items: row.get(5)?,
                loaded_at: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
