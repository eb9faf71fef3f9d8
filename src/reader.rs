use std::path::Path;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{LoadError, Result};
use crate::models::SaleRow;

pub const COLUMNS: &[&str] = &[
    "transaction_id",
    "transaction_date",
    "store_name",
    "sales_representative_name",
    "client_name",
    "email_address",
    "phone_number",
    "product_name",
    "price",
    "quantity",
];

/// A row exactly as it appears in the file, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRow {
    pub transaction_id: String,
    pub transaction_date: String,
    pub store_name: String,
    pub sales_representative_name: String,
    pub client_name: String,
    pub email_address: String,
    pub phone_number: String,
    pub product_name: String,
    pub price: String,
    pub quantity: String,
}

// ---------------------------------------------------------------------------
// Field parsing
// ---------------------------------------------------------------------------

pub fn parse_price(raw: &str) -> Option<f64> {
    let s = raw.replace(',', "").replace('$', "");
    let price: f64 = s.trim().parse().ok()?;
    (price.is_finite() && price >= 0.0).then_some(price)
}

pub fn parse_quantity(raw: &str) -> Option<i64> {
    let s = raw.trim();
    let qty = match s.parse::<i64>() {
        Ok(q) => q,
        Err(_) => {
            // Spreadsheet exports often write whole numbers as 2.0
            let f: f64 = s.parse().ok()?;
            if f.fract() != 0.0 || f.abs() >= i64::MAX as f64 {
                return None;
            }
            f as i64
        }
    };
    (qty > 0).then_some(qty)
}

pub fn parse_date_mdy(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let m: u32 = parts[0].parse().ok()?;
    let d: u32 = parts[1].parse().ok()?;
    let y: i32 = parts[2].parse().ok()?;
    chrono::NaiveDate::from_ymd_opt(y, m, d).map(|dt| dt.format("%Y-%m-%d").to_string())
}

/// Accepts YYYY-MM-DD or MM/DD/YYYY, returns YYYY-MM-DD.
pub fn parse_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .or_else(|| parse_date_mdy(raw))
}

#[cfg(any(feature = "xlsx", test))]
pub fn excel_serial_to_date(serial: f64) -> Option<String> {
    // Excel epoch is 1899-12-30 (accounting for the 1900 leap year bug)
    let base = chrono::NaiveDate::from_ymd_opt(1899, 12, 30)?;
    let date = base.checked_add_signed(chrono::Duration::days(serial as i64))?;
    Some(date.format("%Y-%m-%d").to_string())
}

fn required(value: String, column: &str, line: u64) -> Result<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(LoadError::InvalidRow {
            line,
            message: format!("{column} is empty"),
        });
    }
    Ok(value)
}

pub fn validate(raw: RawRow, line: u64) -> Result<SaleRow> {
    let invalid = |message: String| LoadError::InvalidRow { line, message };

    let transaction_date = parse_date(&raw.transaction_date)
        .ok_or_else(|| invalid(format!("bad transaction_date {:?}", raw.transaction_date)))?;
    let price = parse_price(&raw.price)
        .ok_or_else(|| invalid(format!("bad price {:?}", raw.price)))?;
    let quantity = parse_quantity(&raw.quantity)
        .ok_or_else(|| invalid(format!("bad quantity {:?}", raw.quantity)))?;

    Ok(SaleRow {
        transaction_id: required(raw.transaction_id, "transaction_id", line)?,
        transaction_date,
        store_name: required(raw.store_name, "store_name", line)?,
        sales_representative_name: required(
            raw.sales_representative_name,
            "sales_representative_name",
            line,
        )?,
        client_name: required(raw.client_name, "client_name", line)?,
        email_address: raw.email_address.trim().to_string(),
        phone_number: raw.phone_number.trim().to_string(),
        product_name: required(raw.product_name, "product_name", line)?,
        price,
        quantity,
    })
}

fn check_columns<'a>(headers: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let present: Vec<&str> = headers.into_iter().map(str::trim).collect();
    match COLUMNS.iter().find(|c| !present.contains(c)) {
        Some(missing) => Err(LoadError::MissingColumn(missing.to_string())),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// File readers
// ---------------------------------------------------------------------------

pub fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

pub fn read_csv(file_path: &Path) -> Result<Vec<SaleRow>> {
    let file = std::fs::File::open(file_path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(std::io::BufReader::new(file));
    let headers = rdr.headers()?.clone();
    check_columns(headers.iter())?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.iter().all(|f| f.is_empty()) {
            continue;
        }
        let line = record.position().map_or(0, |p| p.line());
        let raw: RawRow = record.deserialize(Some(&headers))?;
        rows.push(validate(raw, line)?);
    }
    Ok(rows)
}

#[cfg(feature = "xlsx")]
pub fn read_xlsx(file_path: &Path) -> Result<Vec<SaleRow>> {
    use calamine::{Data, Reader};

    let mut workbook = calamine::open_workbook_auto(file_path)
        .map_err(|e| LoadError::Xlsx(format!("Failed to open {}: {e}", file_path.display())))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| LoadError::Xlsx("workbook has no sheets".into()))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| LoadError::Xlsx(e.to_string()))?;

    // calamine trims leading empty rows, so the range may not begin at row 1.
    let first_row = range.start().map_or(0, |(row, _)| u64::from(row));
    let mut sheet_rows = range
        .rows()
        .enumerate()
        .filter(|(_, cells)| !cells.iter().all(|c| matches!(c, Data::Empty)));
    let Some((_, header)) = sheet_rows.next() else {
        return Ok(Vec::new());
    };
    let header: Vec<String> = header.iter().map(|c| c.to_string()).collect();
    check_columns(header.iter().map(String::as_str))?;
    let column = |name: &str| header.iter().position(|h| h.trim() == name);

    let cell_text = |cell: &Data, is_date: bool| -> String {
        match cell {
            Data::Float(f) if is_date => excel_serial_to_date(*f).unwrap_or_default(),
            Data::Int(i) if is_date => excel_serial_to_date(*i as f64).unwrap_or_default(),
            Data::DateTime(dt) => excel_serial_to_date(dt.as_f64()).unwrap_or_default(),
            Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
            Data::Empty => String::new(),
            other => other.to_string(),
        }
    };

    let mut rows = Vec::new();
    for (index, cells) in sheet_rows {
        let field = |name: &str| -> String {
            column(name)
                .and_then(|i| cells.get(i))
                .map(|c| cell_text(c, name == "transaction_date"))
                .unwrap_or_default()
        };
        let raw = RawRow {
            transaction_id: field("transaction_id"),
            transaction_date: field("transaction_date"),
            store_name: field("store_name"),
            sales_representative_name: field("sales_representative_name"),
            client_name: field("client_name"),
            email_address: field("email_address"),
            phone_number: field("phone_number"),
            product_name: field("product_name"),
            price: field("price"),
            quantity: field("quantity"),
        };
        rows.push(validate(raw, first_row + index as u64 + 1)?);
    }
    Ok(rows)
}

fn is_spreadsheet(file_path: &Path) -> bool {
    file_path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| ["xlsx", "xlsm", "xls", "ods"].iter().any(|x| e.eq_ignore_ascii_case(x)))
}

/// Read and validate every row of a CSV or spreadsheet file.
pub fn read_rows(file_path: &Path) -> Result<Vec<SaleRow>> {
    if is_spreadsheet(file_path) {
        #[cfg(feature = "xlsx")]
        return read_xlsx(file_path);
        #[cfg(not(feature = "xlsx"))]
        return Err(LoadError::Other(format!(
            "{}: spreadsheet input requires the `xlsx` feature",
            file_path.display()
        )));
    }
    read_csv(file_path)
}


#[cfg(all(test, feature = "xlsx"))]
mod xlsx_tests {
    use std::path::PathBuf;

    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    #[test]
    fn test_read_xlsx() {
        let rows = read_rows(&fixture("sales.xlsx")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].transaction_id, "T1");
        assert_eq!(rows[0].transaction_date, "2025-01-10");
        assert_eq!(rows[0].price, 4.0);
        assert_eq!(rows[0].quantity, 2);
        assert_eq!(rows[1].transaction_date, "2024-01-02");
        assert_eq!(rows[1].price, 3.5);
        assert_eq!(rows[1].email_address, "");
    }

    #[test]
    fn test_read_xlsx_reports_sheet_row_of_bad_row() {
        // Header sits on sheet row 3 below two empty rows.
        match read_rows(&fixture("bad_price.xlsx")) {
            Err(LoadError::InvalidRow { line, message }) => {
                assert_eq!(line, 5);
                assert!(message.contains("price"), "{message}");
            }
            other => panic!("expected InvalidRow, got {other:?}"),
        }
    }

    #[test]
    fn test_read_xlsx_missing_column() {
        match read_rows(&fixture("missing_column.xlsx")) {
            Err(LoadError::MissingColumn(col)) => assert_eq!(col, "transaction_date"),
            other => panic!("expected MissingColumn, got {other:?}"),
        }
    }
}
