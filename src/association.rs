use std::collections::HashMap;

use rusqlite::{Connection, ToSql};

use crate::db::execute_many;
use crate::error::{LoadError, Result};
use crate::models::{NewLineItem, NewTransaction, SaleRow};
use crate::reference::distinct;
use crate::resolver::IdentityMaps;
use crate::settings::ReferencePolicy;

const INSERT_TRANSACTION: &str = "INSERT INTO transactions \
     (transaction_id, transaction_date, store_id, client_id, sales_rep_id) VALUES (?1, ?2, ?3, ?4, ?5)";

const INSERT_LINE_ITEM: &str =
    "INSERT INTO transaction_products (transaction_id, product_id, quantity) VALUES (?1, ?2, ?3)";

fn require<T>(
    found: Option<T>,
    policy: ReferencePolicy,
    entity: &'static str,
    key: impl FnOnce() -> String,
) -> Result<Option<T>> {
    match (found, policy) {
        (Some(id), _) => Ok(Some(id)),
        (None, ReferencePolicy::Lenient) => Ok(None),
        (None, ReferencePolicy::Strict) => {
            Err(LoadError::UnresolvedReference { entity, key: key() })
        }
    }
}

/// Distinct transaction headers with their foreign keys resolved.
pub fn project_transactions(
    rows: &[SaleRow],
    maps: &IdentityMaps,
    policy: ReferencePolicy,
) -> Result<Vec<NewTransaction>> {
    let headers = distinct(rows.iter().map(|r| {
        (
            r.transaction_id.as_str(),
            r.transaction_date.as_str(),
            r.store_name.as_str(),
            r.sales_representative_name.as_str(),
            r.client_key(),
        )
    }));

    headers
        .into_iter()
        .map(|(transaction_id, date, store, rep, client)| {
            let store_id = require(maps.stores.get(store).copied(), policy, "store", || {
                store.to_string()
            })?;
            let sales_rep_id = require(
                maps.sales_reps.get(rep).copied(),
                policy,
                "sales representative",
                || rep.to_string(),
            )?;
            let client_id = require(maps.clients.get(&client).copied(), policy, "client", || {
                client.to_string()
            })?;
            Ok(NewTransaction {
                transaction_id: transaction_id.to_string(),
                transaction_date: date.to_string(),
                store_id,
                client_id,
                sales_rep_id,
            })
        })
        .collect()
}

/// Distinct line items with their product resolved through the owning store.
/// A (transaction, product) pair seen with two quantities is rejected.
pub fn project_line_items(
    rows: &[SaleRow],
    maps: &IdentityMaps,
    policy: ReferencePolicy,
) -> Result<Vec<NewLineItem>> {
    let items = distinct(rows.iter().map(|r| {
        (
            r.transaction_id.as_str(),
            r.product_name.as_str(),
            r.store_name.as_str(),
            r.quantity,
        )
    }));

    let mut quantities = HashMap::new();
    for &(transaction_id, product, store, quantity) in &items {
        if let Some(&seen) = quantities.get(&(transaction_id, product, store)) {
            if seen != quantity {
                return Err(LoadError::ConflictingLineItem {
                    transaction_id: transaction_id.to_string(),
                    product: product.to_string(),
                });
            }
        }
        quantities.insert((transaction_id, product, store), quantity);
    }

    items
        .into_iter()
        .map(|(transaction_id, product, store, quantity)| {
            let product_id = maps
                .stores
                .get(store)
                .and_then(|&store_id| maps.products.lookup(product, store_id));
            let product_id = require(product_id, policy, "product", || {
                format!("{product} @ {store}")
            })?;
            Ok(NewLineItem {
                transaction_id: transaction_id.to_string(),
                product_id,
                quantity,
            })
        })
        .collect()
}

pub fn insert_transactions(
    conn: &Connection,
    rows: &[SaleRow],
    maps: &IdentityMaps,
    policy: ReferencePolicy,
) -> Result<usize> {
    let transactions = project_transactions(rows, maps, policy)?;
    if transactions.is_empty() {
        return Ok(0);
    }
    let inserted = execute_many(
        conn,
        INSERT_TRANSACTION,
        transactions.iter().map(|t| {
            [
                &t.transaction_id as &dyn ToSql,
                &t.transaction_date,
                &t.store_id,
                &t.client_id,
                &t.sales_rep_id,
            ]
        }),
    )?;
    tracing::info!(inserted, "inserted new transactions");
    Ok(inserted)
}

pub fn insert_line_items(
    conn: &Connection,
    rows: &[SaleRow],
    maps: &IdentityMaps,
    policy: ReferencePolicy,
) -> Result<usize> {
    let items = project_line_items(rows, maps, policy)?;
    if items.is_empty() {
        return Ok(0);
    }
    let inserted = execute_many(
        conn,
        INSERT_LINE_ITEM,
        items
            .iter()
            .map(|i| [&i.transaction_id as &dyn ToSql, &i.product_id, &i.quantity]),
    )?;
    tracing::info!(inserted, "inserted new transaction-product links");
    Ok(inserted)
}
