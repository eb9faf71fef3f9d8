use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use rusqlite::{Connection, ToSql};

use crate::db::execute_many;
use crate::error::{LoadError, Result};
use crate::models::{ClientKey, NewProduct, SaleRow};
use crate::resolver::ProductIndex;
use crate::settings::ReferencePolicy;

const INSERT_STORE: &str = "INSERT INTO stores (store_name) VALUES (?1)";

const INSERT_CLIENT: &str =
    "INSERT INTO clients (client_name, email_address, phone_number) VALUES (?1, ?2, ?3)";

// The no-op update leaves a concurrently inserted name in place.
const INSERT_SALES_REP: &str = "INSERT INTO sales_representatives (sales_representative_name) VALUES (?1) \
     ON CONFLICT(sales_representative_name) DO UPDATE SET sales_representative_name = sales_representative_name";

const UPSERT_PRODUCT: &str = "INSERT INTO products (product_name, store_id, price) VALUES (?1, ?2, ?3) \
     ON CONFLICT(product_name, store_id) DO UPDATE SET price = excluded.price";

/// Unique values in first-seen order.
pub(crate) fn distinct<T, I>(items: I) -> Vec<T>
where
    T: Eq + Hash + Clone,
    I: IntoIterator<Item = T>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

pub fn new_store_names(rows: &[SaleRow], known: &HashMap<String, i64>) -> Vec<String> {
    distinct(rows.iter().map(|r| r.store_name.clone()))
        .into_iter()
        .filter(|name| !known.contains_key(name))
        .collect()
}

pub fn insert_stores(
    conn: &Connection,
    rows: &[SaleRow],
    known: &HashMap<String, i64>,
) -> Result<usize> {
    let new_stores = new_store_names(rows, known);
    if new_stores.is_empty() {
        return Ok(0);
    }
    let inserted = execute_many(conn, INSERT_STORE, new_stores.iter().map(|s| [s]))?;
    tracing::info!(inserted, "inserted new stores");
    Ok(inserted)
}

pub fn new_clients(rows: &[SaleRow], known: &HashMap<ClientKey, i64>) -> Vec<ClientKey> {
    distinct(rows.iter().map(SaleRow::client_key))
        .into_iter()
        .filter(|key| !known.contains_key(key))
        .collect()
}

pub fn insert_clients(
    conn: &Connection,
    rows: &[SaleRow],
    known: &HashMap<ClientKey, i64>,
) -> Result<usize> {
    let queued = new_clients(rows, known);
    if queued.is_empty() {
        return Ok(0);
    }
    let inserted = execute_many(
        conn,
        INSERT_CLIENT,
        queued.iter().map(|c| [&c.name, &c.email, &c.phone]),
    )?;
    tracing::info!(inserted, "inserted new clients");
    Ok(inserted)
}

pub fn new_sales_rep_names(rows: &[SaleRow], known: &HashMap<String, i64>) -> Vec<String> {
    distinct(rows.iter().map(|r| r.sales_representative_name.clone()))
        .into_iter()
        .filter(|name| !known.contains_key(name))
        .collect()
}

pub fn insert_sales_reps(
    conn: &Connection,
    rows: &[SaleRow],
    known: &HashMap<String, i64>,
) -> Result<usize> {
    let new_reps = new_sales_rep_names(rows, known);
    if new_reps.is_empty() {
        return Ok(0);
    }
    let inserted = execute_many(conn, INSERT_SALES_REP, new_reps.iter().map(|s| [s]))?;
    tracing::info!(inserted, "inserted new sales representatives");
    Ok(inserted)
}

/// Last observed price per (product, store), in first-seen order.
fn observed_prices(rows: &[SaleRow]) -> Vec<(&str, &str, f64)> {
    let mut order = Vec::new();
    let mut prices: HashMap<(&str, &str), f64> = HashMap::new();
    for row in rows {
        let key = (row.product_name.as_str(), row.store_name.as_str());
        if prices.insert(key, row.price).is_none() {
            order.push(key);
        }
    }
    order
        .into_iter()
        .map(|key| (key.0, key.1, prices[&key]))
        .collect()
}

/// Products that need writing: unseen identities plus, under store-scoped
/// identity, known products whose last observed price differs.
pub fn pending_products(
    rows: &[SaleRow],
    stores: &HashMap<String, i64>,
    known: &ProductIndex,
    policy: ReferencePolicy,
) -> Result<Vec<NewProduct>> {
    let mut pending = Vec::new();
    for (name, store_name, price) in observed_prices(rows) {
        let Some(&store_id) = stores.get(store_name) else {
            if policy == ReferencePolicy::Strict {
                return Err(LoadError::UnresolvedReference {
                    entity: "store",
                    key: store_name.to_string(),
                });
            }
            tracing::warn!(
                product = name,
                store = store_name,
                "skipping product with unknown store"
            );
            continue;
        };
        if known.is_current(name, store_id, price) {
            continue;
        }
        pending.push(NewProduct {
            name: name.to_string(),
            store_id,
            price,
        });
    }
    Ok(pending)
}

pub fn upsert_products(
    conn: &Connection,
    rows: &[SaleRow],
    stores: &HashMap<String, i64>,
    known: &ProductIndex,
    policy: ReferencePolicy,
) -> Result<usize> {
    let pending = pending_products(rows, stores, known, policy)?;
    if pending.is_empty() {
        return Ok(0);
    }
    let written = execute_many(
        conn,
        UPSERT_PRODUCT,
        pending
            .iter()
            .map(|p| [&p.name as &dyn ToSql, &p.store_id, &p.price]),
    )?;
    tracing::info!(written, "inserted or repriced products");
    Ok(written)
}
