/// One validated line of an input file, as handed to the loaders.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRow {
    pub transaction_id: String,
    /// Normalized to YYYY-MM-DD.
    pub transaction_date: String,
    pub store_name: String,
    pub sales_representative_name: String,
    pub client_name: String,
    pub email_address: String,
    pub phone_number: String,
    pub product_name: String,
    pub price: f64,
    pub quantity: i64,
}

impl SaleRow {
    pub fn client_key(&self) -> ClientKey {
        ClientKey {
            name: self.client_name.clone(),
            email: self.email_address.clone(),
            phone: self.phone_number.clone(),
        }
    }
}

/// Natural key of a client. Two clients may share a name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub name: String,
    pub email: String,
    pub phone: String,
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.phone)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub store_id: i64,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub transaction_id: String,
    pub transaction_date: String,
    pub store_id: Option<i64>,
    pub client_id: Option<i64>,
    pub sales_rep_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLineItem {
    pub transaction_id: String,
    pub product_id: Option<i64>,
    pub quantity: i64,
}

/// Rows written per entity for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub rows_read: usize,
    pub stores: usize,
    pub clients: usize,
    pub sales_reps: usize,
    pub products: usize,
    pub transactions: usize,
    pub line_items: usize,
}

impl LoadReport {
    pub fn reference_rows(&self) -> usize {
        self.stores + self.clients + self.sales_reps + self.products
    }
}

#[derive(Debug, Clone)]
pub struct LoadRecord {
    pub id: i64,
    pub filename: String,
    pub checksum: String,
    pub row_count: i64,
    pub transactions: i64,
    pub line_items: i64,
    pub loaded_at: String,
}
