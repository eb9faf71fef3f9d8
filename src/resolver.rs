use std::collections::HashMap;

use rusqlite::Connection;

use crate::error::Result;
use crate::models::ClientKey;
use crate::settings::ProductIdentity;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnownProduct {
    pub id: i64,
    pub price: f64,
}

/// Persisted products, looked up by name or by (name, store) depending on
/// the configured identity.
#[derive(Debug, Clone)]
pub struct ProductIndex {
    identity: ProductIdentity,
    by_name: HashMap<String, KnownProduct>,
    by_name_and_store: HashMap<(String, i64), KnownProduct>,
}

impl ProductIndex {
    pub fn new(identity: ProductIdentity) -> Self {
        Self {
            identity,
            by_name: HashMap::new(),
            by_name_and_store: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, store_id: i64, product: KnownProduct) {
        self.by_name.insert(name.to_string(), product);
        self.by_name_and_store
            .insert((name.to_string(), store_id), product);
    }

    pub fn get(&self, name: &str, store_id: i64) -> Option<KnownProduct> {
        match self.identity {
            ProductIdentity::Name => self.by_name.get(name).copied(),
            ProductIdentity::NameAndStore => self
                .by_name_and_store
                .get(&(name.to_string(), store_id))
                .copied(),
        }
    }

    pub fn lookup(&self, name: &str, store_id: i64) -> Option<i64> {
        self.get(name, store_id).map(|p| p.id)
    }

    /// Whether an observation needs no write: under name identity any known
    /// name is skipped, otherwise only an exact (name, store, price) match.
    pub fn is_current(&self, name: &str, store_id: i64, price: f64) -> bool {
        match self.identity {
            ProductIdentity::Name => self.by_name.contains_key(name),
            ProductIdentity::NameAndStore => self
                .get(name, store_id)
                .is_some_and(|known| known.price == price),
        }
    }

    pub fn len(&self) -> usize {
        match self.identity {
            ProductIdentity::Name => self.by_name.len(),
            ProductIdentity::NameAndStore => self.by_name_and_store.len(),
        }
    }
}

/// Snapshot of identity key -> surrogate key for every reference table.
#[derive(Debug, Clone)]
pub struct IdentityMaps {
    pub stores: HashMap<String, i64>,
    pub clients: HashMap<ClientKey, i64>,
    pub sales_reps: HashMap<String, i64>,
    pub products: ProductIndex,
}

impl IdentityMaps {
    #[cfg(test)]
    pub fn empty(identity: ProductIdentity) -> Self {
        Self {
            stores: HashMap::new(),
            clients: HashMap::new(),
            sales_reps: HashMap::new(),
            products: ProductIndex::new(identity),
        }
    }
}

fn name_map(conn: &Connection, sql: &str) -> Result<HashMap<String, i64>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(0)?)))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

pub fn resolve_stores(conn: &Connection) -> Result<HashMap<String, i64>> {
    name_map(conn, "SELECT store_id, store_name FROM stores")
}

pub fn resolve_sales_reps(conn: &Connection) -> Result<HashMap<String, i64>> {
    name_map(
        conn,
        "SELECT sales_rep_id, sales_representative_name FROM sales_representatives",
    )
}

pub fn resolve_clients(conn: &Connection) -> Result<HashMap<ClientKey, i64>> {
    let mut stmt =
        conn.prepare("SELECT client_id, client_name, email_address, phone_number FROM clients")?;
    let rows = stmt
        .query_map([], |row| {
            let key = ClientKey {
                name: row.get(1)?,
                email: row.get(2)?,
                phone: row.get(3)?,
            };
            Ok((key, row.get::<_, i64>(0)?))
        })?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

pub fn resolve_products(conn: &Connection, identity: ProductIdentity) -> Result<ProductIndex> {
    // Ascending id: with name identity the newest row for a name wins.
    let mut stmt = conn.prepare(
        "SELECT product_id, product_name, store_id, price FROM products ORDER BY product_id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                KnownProduct {
                    id: row.get(0)?,
                    price: row.get(3)?,
                },
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut index = ProductIndex::new(identity);
    for (name, store_id, product) in rows {
        index.insert(&name, store_id, product);
    }
    Ok(index)
}

/// Read every reference table. Must be called again after each insert phase,
/// since new surrogate keys are only known once written.
pub fn resolve(conn: &Connection, identity: ProductIdentity) -> Result<IdentityMaps> {
    let maps = IdentityMaps {
        stores: resolve_stores(conn)?,
        clients: resolve_clients(conn)?,
        sales_reps: resolve_sales_reps(conn)?,
        products: resolve_products(conn, identity)?,
    };
    tracing::debug!(
        stores = maps.stores.len(),
        clients = maps.clients.len(),
        sales_reps = maps.sales_reps.len(),
        products = maps.products.len(),
        "resolved identities"
    );
    Ok(maps)
}
