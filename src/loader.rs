use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, Transaction};

use crate::association::{insert_line_items, insert_transactions};
use crate::db::{connect, record_load, StoreConfig};
use crate::error::{LoadError, PhaseExt, Result};
use crate::models::{LoadReport, SaleRow};
use crate::reader::{compute_checksum, read_rows};
use crate::reference::{insert_clients, insert_sales_reps, insert_stores, upsert_products};
use crate::resolver::{resolve, resolve_stores};
use crate::settings::LoadOptions;

/// Stages of one file pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    ReferenceInsert,
    ReferenceCommit,
    AssociationInsert,
    AssociationCommit,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReferenceInsert => "reference insert",
            Self::ReferenceCommit => "reference commit",
            Self::AssociationInsert => "association insert",
            Self::AssociationCommit => "association commit",
        };
        f.write_str(name)
    }
}

/// Identifies the file a batch came from, for the load history.
#[derive(Debug, Clone)]
pub struct BatchSource {
    pub filename: String,
    pub checksum: String,
}

fn rollback(tx: Transaction<'_>, phase: LoadPhase) {
    match tx.rollback() {
        Ok(()) => tracing::warn!(%phase, "rolled back"),
        Err(e) => tracing::error!(%phase, error = %e, "rollback failed"),
    }
}

/// Run `body` inside a transaction. Commits on success; on any error the
/// transaction is rolled back before the error is returned.
fn in_transaction<T>(
    conn: &mut Connection,
    insert: LoadPhase,
    commit: LoadPhase,
    body: impl FnOnce(&Transaction<'_>) -> Result<T>,
) -> Result<T> {
    let tx = conn.transaction().in_phase(insert)?;
    match body(&tx) {
        Ok(value) => {
            // A failed COMMIT rolls back when the transaction is dropped.
            tx.commit().in_phase(commit)?;
            Ok(value)
        }
        Err(e) => {
            rollback(tx, insert);
            Err(e.at(insert))
        }
    }
}

/// Load one batch in two committed phases: reference entities first, then
/// the associative records that point at them.
pub fn load_batch(
    conn: &mut Connection,
    rows: &[SaleRow],
    options: LoadOptions,
    source: Option<&BatchSource>,
) -> Result<LoadReport> {
    let mut report = LoadReport {
        rows_read: rows.len(),
        ..Default::default()
    };

    in_transaction(
        conn,
        LoadPhase::ReferenceInsert,
        LoadPhase::ReferenceCommit,
        |tx| {
            let known = resolve(tx, options.product_identity)?;
            report.stores = insert_stores(tx, rows, &known.stores)?;
            report.clients = insert_clients(tx, rows, &known.clients)?;
            report.sales_reps = insert_sales_reps(tx, rows, &known.sales_reps)?;
            // Products of a store created just above need its new key.
            let stores = if report.stores > 0 {
                resolve_stores(tx)?
            } else {
                known.stores
            };
            report.products =
                upsert_products(tx, rows, &stores, &known.products, options.reference_policy)?;
            Ok(())
        },
    )?;
    tracing::info!(
        inserted = report.reference_rows(),
        stores = report.stores,
        clients = report.clients,
        sales_reps = report.sales_reps,
        products = report.products,
        "reference data committed"
    );

    in_transaction(
        conn,
        LoadPhase::AssociationInsert,
        LoadPhase::AssociationCommit,
        |tx| {
            let maps = resolve(tx, options.product_identity)?;
            report.transactions = insert_transactions(tx, rows, &maps, options.reference_policy)?;
            report.line_items = insert_line_items(tx, rows, &maps, options.reference_policy)?;
            if let Some(source) = source {
                record_load(tx, &source.filename, &source.checksum, &report)?;
            }
            Ok(())
        },
    )?;
    tracing::info!(
        transactions = report.transactions,
        line_items = report.line_items,
        "association data committed"
    );

    Ok(report)
}

/// Process one file end to end. The connection is opened here and released
/// when this returns, whatever the outcome.
pub fn process_file(
    file_path: &Path,
    config: &StoreConfig,
    options: LoadOptions,
) -> Result<LoadReport> {
    let _span = tracing::info_span!("file", file = %file_path.display()).entered();

    let mut conn = connect(config)?;
    tracing::info!(database = %config.database.display(), "database connection successful");

    let rows = read_rows(file_path)?;
    let source = BatchSource {
        filename: file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        checksum: compute_checksum(file_path)?,
    };
    tracing::info!(rows = rows.len(), "read file");

    load_batch(&mut conn, &rows, options, Some(&source))
}

pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<LoadReport>,
}

#[derive(Default)]
pub struct RunSummary {
    pub outcomes: Vec<FileOutcome>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }
}

/// Process each file in order. A failed file is logged and does not stop
/// the ones after it.
pub fn run<P: AsRef<Path>>(files: &[P], config: &StoreConfig, options: LoadOptions) -> RunSummary {
    let mut summary = RunSummary::default();
    for file in files {
        let path = file.as_ref();
        let result = process_file(path, config, options);
        match &result {
            Ok(report) => tracing::info!(
                file = %path.display(),
                transactions = report.transactions,
                line_items = report.line_items,
                "data uploaded successfully"
            ),
            Err(e @ LoadError::Connection { .. }) => tracing::error!(
                file = %path.display(),
                error = %e,
                "database connection failed, skipping file"
            ),
            Err(e) => tracing::error!(file = %path.display(), error = %e, "error processing file"),
        }
        summary.outcomes.push(FileOutcome {
            path: path.to_path_buf(),
            result,
        });
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::table_counts;
    use crate::settings::{ProductIdentity, ReferencePolicy};

    fn test_db() -> (tempfile::TempDir, StoreConfig, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("test.db"));
        let conn = connect(&config).unwrap();
        (dir, config, conn)
    }

    fn sale(
        txn: &str,
        store: &str,
        client: (&str, &str, &str),
        rep: &str,
        product: &str,
        price: f64,
        qty: i64,
    ) -> SaleRow {
        SaleRow {
            transaction_id: txn.into(),
            transaction_date: "2024-01-01".into(),
            store_name: store.into(),
            sales_representative_name: rep.into(),
            client_name: client.0.into(),
            email_address: client.1.into(),
            phone_number: client.2.into(),
            product_name: product.into(),
            price,
            quantity: qty,
        }
    }

    fn joe() -> (&'static str, &'static str, &'static str) {
        ("Joe", "joe@x.com", "555")
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    const HEADER: &str = "transaction_id,transaction_date,store_name,sales_representative_name,client_name,email_address,phone_number,product_name,price,quantity\n";

    #[test]
    fn test_end_to_end_single_row() {
        let (_dir, _config, mut conn) = test_db();
        let rows = vec![sale("T1", "Cafe", joe(), "Ann", "Mocha", 4.0, 2)];

        let report = load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap();
        assert_eq!(
            report,
            LoadReport {
                rows_read: 1,
                stores: 1,
                clients: 1,
                sales_reps: 1,
                products: 1,
                transactions: 1,
                line_items: 1,
            }
        );

        let (store_id, client_id, rep_id): (i64, i64, i64) = conn
            .query_row(
                "SELECT s.store_id, c.client_id, r.sales_rep_id FROM stores s, clients c, sales_representatives r \
                 WHERE s.store_name = 'Cafe' AND c.client_name = 'Joe' AND r.sales_representative_name = 'Ann'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        let txn: (Option<i64>, Option<i64>, Option<i64>) = conn
            .query_row(
                "SELECT store_id, client_id, sales_rep_id FROM transactions WHERE transaction_id = 'T1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(txn, (Some(store_id), Some(client_id), Some(rep_id)));

        let (product_id, product_store, price): (i64, i64, f64) = conn
            .query_row(
                "SELECT product_id, store_id, price FROM products WHERE product_name = 'Mocha'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(product_store, store_id);
        assert_eq!(price, 4.0);

        let (line_txn, line_product, qty): (String, Option<i64>, i64) = conn
            .query_row(
                "SELECT transaction_id, product_id, quantity FROM transaction_products",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(line_txn, "T1");
        assert_eq!(line_product, Some(product_id));
        assert_eq!(qty, 2);
    }

    #[test]
    fn test_reprocessing_known_references_inserts_nothing() {
        let (_dir, _config, mut conn) = test_db();
        let first = vec![
            sale("T1", "Cafe", joe(), "Ann", "Mocha", 4.0, 2),
            sale("T2", "Bistro", ("Sue", "sue@x.com", "556"), "Bob", "Latte", 3.5, 1),
        ];
        load_batch(&mut conn, &first, LoadOptions::default(), None).unwrap();

        let second: Vec<SaleRow> = first
            .iter()
            .cloned()
            .map(|mut r| {
                r.transaction_id.push_str("-b");
                r
            })
            .collect();
        let report = load_batch(&mut conn, &second, LoadOptions::default(), None).unwrap();
        assert_eq!(report.reference_rows(), 0);
        assert_eq!(report.transactions, 2);
        assert_eq!(count(&conn, "stores"), 2);
        assert_eq!(count(&conn, "products"), 2);
    }

    #[test]
    fn test_reprocessing_same_transactions_fails_in_association_phase() {
        let (_dir, _config, mut conn) = test_db();
        let rows = vec![sale("T1", "Cafe", joe(), "Ann", "Mocha", 4.0, 2)];
        load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap();

        let err = load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap_err();
        assert!(
            matches!(err, LoadError::Store { phase: LoadPhase::AssociationInsert, .. }),
            "got {err:?}"
        );
        assert_eq!(count(&conn, "transactions"), 1);
        assert_eq!(count(&conn, "transaction_products"), 1);
    }

    #[test]
    fn test_new_store_resolves_to_real_key() {
        let (_dir, _config, mut conn) = test_db();
        conn.execute_batch("INSERT INTO stores (store_name) VALUES ('Old'), ('Older');").unwrap();
        let rows = vec![sale("T9", "Brand New", joe(), "Ann", "Mocha", 4.0, 1)];
        load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap();

        let (txn_store, new_store): (Option<i64>, i64) = conn
            .query_row(
                "SELECT t.store_id, s.store_id FROM transactions t, stores s \
                 WHERE t.transaction_id = 'T9' AND s.store_name = 'Brand New'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(txn_store, Some(new_store));
        let line_product: Option<i64> = conn
            .query_row("SELECT product_id FROM transaction_products", [], |r| r.get(0))
            .unwrap();
        assert!(line_product.is_some());
    }

    #[test]
    fn test_reference_failure_rolls_back_everything() {
        let (_dir, _config, mut conn) = test_db();
        conn.execute_batch(
            "CREATE TRIGGER reject_products BEFORE INSERT ON products \
             BEGIN SELECT RAISE(ABORT, 'products are locked'); END;",
        )
        .unwrap();
        let rows = vec![sale("T1", "Cafe", joe(), "Ann", "Mocha", 4.0, 2)];

        let err = load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap_err();
        assert!(
            matches!(err, LoadError::Store { phase: LoadPhase::ReferenceInsert, .. }),
            "got {err:?}"
        );
        for (table, n) in table_counts(&conn).unwrap() {
            assert_eq!(n, 0, "{table} should be empty");
        }
    }

    #[test]
    fn test_price_overwrite_across_batches() {
        let (_dir, _config, mut conn) = test_db();
        load_batch(
            &mut conn,
            &[sale("T1", "Cafe", joe(), "Ann", "Latte", 4.0, 1)],
            LoadOptions::default(),
            None,
        )
        .unwrap();
        let report = load_batch(
            &mut conn,
            &[sale("T2", "Cafe", joe(), "Ann", "Latte", 4.5, 1)],
            LoadOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(report.products, 1);

        assert_eq!(count(&conn, "products"), 1);
        assert_eq!(latte_price(&conn), 4.5);
    }

    fn latte_price(conn: &Connection) -> f64 {
        conn.query_row("SELECT price FROM products WHERE product_name = 'Latte'", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_two_prices_in_one_file_keep_the_last() {
        let (_dir, _config, mut conn) = test_db();
        let rows = vec![
            sale("T1", "Cafe", joe(), "Ann", "Latte", 4.0, 1),
            sale("T2", "Cafe", joe(), "Ann", "Latte", 4.5, 1),
        ];
        let report = load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap();
        assert_eq!(report.products, 1);
        assert_eq!(latte_price(&conn), 4.5);

        let again: Vec<SaleRow> = rows
            .iter()
            .cloned()
            .map(|mut r| {
                r.transaction_id.push_str("-b");
                r
            })
            .collect();
        let report = load_batch(&mut conn, &again, LoadOptions::default(), None).unwrap();
        assert_eq!(report.reference_rows(), 0);
        assert_eq!(latte_price(&conn), 4.5);
    }

    #[test]
    fn test_failed_reload_leaves_prices_alone() {
        let (_dir, _config, mut conn) = test_db();
        let rows = vec![
            sale("T1", "Cafe", joe(), "Ann", "Latte", 4.0, 1),
            sale("T2", "Cafe", joe(), "Ann", "Latte", 4.5, 1),
        ];
        load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap();

        let err = load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap_err();
        assert!(
            matches!(err, LoadError::Store { phase: LoadPhase::AssociationInsert, .. }),
            "got {err:?}"
        );
        assert_eq!(count(&conn, "products"), 1);
        assert_eq!(latte_price(&conn), 4.5);
    }

    #[test]
    fn test_conflicting_quantities_fail_before_any_association_write() {
        let (_dir, _config, mut conn) = test_db();
        let rows = vec![
            sale("T1", "Cafe", joe(), "Ann", "Mocha", 4.0, 1),
            sale("T1", "Cafe", joe(), "Ann", "Mocha", 4.0, 2),
        ];
        let err = load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap_err();
        assert!(matches!(err, LoadError::ConflictingLineItem { .. }), "got {err:?}");
        assert_eq!(count(&conn, "products"), 1);
        assert_eq!(count(&conn, "transactions"), 0);
        assert_eq!(count(&conn, "transaction_products"), 0);
    }

    #[test]
    fn test_same_named_clients_are_both_inserted() {
        let (_dir, _config, mut conn) = test_db();
        let rows = vec![
            sale("T1", "Cafe", ("Joe", "joe@x.com", "555"), "Ann", "Mocha", 4.0, 1),
            sale("T2", "Cafe", ("Joe", "joe@y.com", "555"), "Ann", "Mocha", 4.0, 1),
        ];
        let report = load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap();
        assert_eq!(report.clients, 2);
        let distinct_clients: i64 = conn
            .query_row(
                "SELECT count(DISTINCT client_id) FROM transactions",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(distinct_clients, 2);
    }

    #[test]
    fn test_same_product_in_two_stores_keeps_both() {
        let (_dir, _config, mut conn) = test_db();
        let rows = vec![
            sale("T1", "Cafe", joe(), "Ann", "Latte", 4.0, 1),
            sale("T2", "Bistro", joe(), "Ann", "Latte", 5.0, 1),
        ];
        load_batch(&mut conn, &rows, LoadOptions::default(), None).unwrap();
        let distinct_products: i64 = conn
            .query_row(
                "SELECT count(DISTINCT product_id) FROM transaction_products",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(distinct_products, 2);
    }

    #[test]
    fn test_name_identity_collapses_products_across_stores() {
        let (_dir, _config, mut conn) = test_db();
        let options = LoadOptions {
            product_identity: ProductIdentity::Name,
            ..Default::default()
        };
        let cafe = [sale("T1", "Cafe", joe(), "Ann", "Latte", 4.0, 1)];
        load_batch(&mut conn, &cafe, options, None).unwrap();
        let bistro = [sale("T2", "Bistro", joe(), "Ann", "Latte", 5.0, 1)];
        let report = load_batch(&mut conn, &bistro, options, None).unwrap();
        assert_eq!(report.products, 0);
        assert_eq!(count(&conn, "products"), 1);
        let ids: Vec<Option<i64>> = conn
            .prepare("SELECT product_id FROM transaction_products ORDER BY id")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(ids[0], ids[1]);
    }

    #[test]
    fn test_strict_policy_rolls_back_association_phase() {
        let (_dir, _config, mut conn) = test_db();
        let strict = LoadOptions {
            reference_policy: ReferencePolicy::Strict,
            ..Default::default()
        };
        // The sales rep vanishes between the two phases.
        conn.execute_batch(
            "CREATE TRIGGER drop_rep AFTER INSERT ON products \
             BEGIN DELETE FROM sales_representatives; END;",
        )
        .unwrap();
        let rows = vec![sale("T1", "Cafe", joe(), "Ann", "Mocha", 4.0, 1)];

        let err = load_batch(&mut conn, &rows, strict, None).unwrap_err();
        assert!(
            matches!(err, LoadError::UnresolvedReference { entity: "sales representative", .. }),
            "got {err:?}"
        );
        assert_eq!(count(&conn, "stores"), 1);
        assert_eq!(count(&conn, "transactions"), 0);
    }

    #[test]
    fn test_process_file_records_history() {
        let (dir, config, conn) = test_db();
        let path = dir.path().join("sales.csv");
        std::fs::write(
            &path,
            format!(
                "{HEADER}T1,2024-01-01,Cafe,Ann,Joe,joe@x.com,555,Mocha,4.0,2\n\
                 T1,2024-01-01,Cafe,Ann,Joe,joe@x.com,555,Latte,3.0,1\n"
            ),
        )
        .unwrap();

        let report = process_file(&path, &config, LoadOptions::default()).unwrap();
        assert_eq!(report.rows_read, 2);
        assert_eq!(report.transactions, 1);
        assert_eq!(report.line_items, 2);

        let (filename, checksum): (String, String) = conn
            .query_row("SELECT filename, checksum FROM load_history", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(filename, "sales.csv");
        assert_eq!(checksum, compute_checksum(&path).unwrap());
    }

    #[test]
    fn test_run_continues_after_failed_file() {
        let (dir, config, conn) = test_db();
        let bad = dir.path().join("bad.csv");
        let bad_row = "T1,2024-01-01,Cafe,Ann,Joe,joe@x.com,555,Mocha,oops,2\n";
        std::fs::write(&bad, format!("{HEADER}{bad_row}")).unwrap();
        let good = dir.path().join("good.csv");
        let good_row = "T2,2024-01-02,Cafe,Ann,Joe,joe@x.com,555,Mocha,4.0,2\n";
        std::fs::write(&good, format!("{HEADER}{good_row}")).unwrap();
        let missing = dir.path().join("missing.csv");

        let summary = run(&[&bad, &missing, &good], &config, LoadOptions::default());
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.failed(), 2);
        assert!(summary.has_failures());
        assert!(matches!(summary.outcomes[0].result, Err(LoadError::InvalidRow { .. })));
        assert!(summary.outcomes[2].result.is_ok());
        assert_eq!(count(&conn, "transactions"), 1);
    }

    #[test]
    fn test_run_skips_file_when_connection_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path().join("no-such-dir").join("test.db"));
        let file = dir.path().join("sales.csv");
        std::fs::write(&file, HEADER).unwrap();

        let summary = run(&[&file], &config, LoadOptions::default());
        assert!(matches!(summary.outcomes[0].result, Err(LoadError::Connection { .. })));
    }
}
