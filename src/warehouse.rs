use crate::error::{PipelineError, Result};
use crate::structs::{Batch, DATE_FORMAT, Entity, Value};
use crate::transform::parse_date;
use log::{debug, info, warn};
use rusqlite::{Connection, Transaction};
use rusqlite::types::Value as SqlValue;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS customer (
    customer_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    region TEXT,
    join_date TEXT,
    open_invoices_num INTEGER,
    retention_category TEXT
);
CREATE TABLE IF NOT EXISTS product (
    product_id INTEGER PRIMARY KEY,
    product_name TEXT NOT NULL,
    category TEXT,
    unit_price_usd REAL,
    restock_days INTEGER,
    supplier TEXT
);
CREATE TABLE IF NOT EXISTS sale (
    sale_id INTEGER PRIMARY KEY,
    customer_id INTEGER REFERENCES customer(customer_id),
    product_id INTEGER REFERENCES product(product_id),
    sale_amount_usd REAL,
    sale_date TEXT,
    payment_type TEXT
);
";

/// Destination type of a warehouse column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Integer primary key; rows without one are dropped.
    Key,
    /// Integer reference to another entity's key; rows without a match are dropped.
    ForeignKey(Entity),
    /// Text that must be present; rows with a null are dropped.
    RequiredText,
    Text,
    Real,
    Integer,
    /// Calendar date stored as `YYYY-MM-DD` text.
    Date,
}

/// Maps a cleaned-file column onto a warehouse column.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub source: &'static str,
    pub dest: &'static str,
    pub kind: FieldKind,
}

static NULL: Value = Value::Null;

const fn field(source: &'static str, dest: &'static str, kind: FieldKind) -> FieldMapping {
    FieldMapping { source, dest, kind }
}

static CUSTOMER_FIELDS: [FieldMapping; 6] = [
    field("CustomerID", "customer_id", FieldKind::Key),
    field("Name", "name", FieldKind::RequiredText),
    field("Region", "region", FieldKind::Text),
    field("JoinDate", "join_date", FieldKind::Date),
    field("OpenInvoices_num", "open_invoices_num", FieldKind::Integer),
    field("RetentionCategory_Cat", "retention_category", FieldKind::Text),
];

static PRODUCT_FIELDS: [FieldMapping; 6] = [
    field("ProductID", "product_id", FieldKind::Key),
    field("ProductName", "product_name", FieldKind::RequiredText),
    field("Category", "category", FieldKind::Text),
    field("UnitPrice", "unit_price_usd", FieldKind::Real),
    field("RestockTime_days_num", "restock_days", FieldKind::Integer),
    field("Supplier_cat", "supplier", FieldKind::Text),
];

static SALE_FIELDS: [FieldMapping; 6] = [
    field("TransactionID", "sale_id", FieldKind::Key),
    field("CustomerID", "customer_id", FieldKind::ForeignKey(Entity::Customer)),
    field("ProductID", "product_id", FieldKind::ForeignKey(Entity::Product)),
    field("SaleAmount", "sale_amount_usd", FieldKind::Real),
    field("SaleDate", "sale_date", FieldKind::Date),
    field("PaymentType_cat", "payment_type", FieldKind::Text),
];

/// Source-to-destination column mapping for an entity, in table column order.
pub fn field_mappings(entity: Entity) -> &'static [FieldMapping] {
    match entity {
        Entity::Customer => &CUSTOMER_FIELDS,
        Entity::Product => &PRODUCT_FIELDS,
        Entity::Sale => &SALE_FIELDS,
    }
}

/// Name of the primary key column of an entity's table.
pub fn key_column(entity: Entity) -> &'static str {
    field_mappings(entity)
        .iter()
        .find(|f| f.kind == FieldKind::Key)
        .map(|f| f.dest)
        .unwrap_or("rowid")
}

/// Outcome of loading one entity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub entity: String,
    pub rows_in: usize,
    pub inserted: usize,
    pub dropped_missing_key: usize,
    pub dropped_duplicate_key: usize,
    /// Rows whose foreign key was missing, unparseable, or unknown.
    pub dropped_foreign_key: usize,
    /// Rows missing a value for a `NOT NULL` column.
    pub dropped_missing_required: usize,
    /// Non-key values that could not be coerced and were stored as null.
    pub coercion_failures: usize,
    /// Rows of referencing tables deleted because their key is gone after
    /// this load.
    pub orphans_removed: usize,
}

impl LoadReport {
    pub fn dropped(&self) -> usize {
        self.dropped_missing_key
            + self.dropped_duplicate_key
            + self.dropped_foreign_key
            + self.dropped_missing_required
    }
}

/// Maps a cleaned batch onto warehouse rows for `entity`.
///
/// Rows are dropped when their key is missing or non-integral, when their key
/// was already seen (first row wins), or when a foreign key is missing or not
/// present in `known_keys` for the referenced entity, or when a required text
/// field is null. Other fields are coerced to their destination type, falling
/// back to null.
///
/// # Errors
///
/// Returns `PipelineError::ColumnNotFound` if the key, a foreign-key or a
/// required source column is absent. Other absent columns load as null.
pub fn prepare_rows(
    entity: Entity,
    batch: &Batch,
    known_keys: &HashMap<Entity, HashSet<i64>>,
) -> Result<(Vec<Vec<SqlValue>>, LoadReport)> {
    let mappings = field_mappings(entity);
    let mut indices = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let idx = batch.column_index(mapping.source);
        if idx.is_none() {
            if matches!(
                mapping.kind,
                FieldKind::Key | FieldKind::ForeignKey(_) | FieldKind::RequiredText
            ) {
                return Err(PipelineError::ColumnNotFound {
                    entity: entity.to_string(),
                    column: mapping.source.to_string(),
                });
            }
            warn!(
                "Column {} missing from {} batch, loading {} as null",
                mapping.source, entity, mapping.dest
            );
        }
        indices.push(idx);
    }

    let mut report = LoadReport {
        entity: entity.to_string(),
        rows_in: batch.len(),
        ..LoadReport::default()
    };
    let mut seen_keys = HashSet::with_capacity(batch.len());
    let mut rows = Vec::with_capacity(batch.len());

    'rows: for record in &batch.rows {
        let mut row = Vec::with_capacity(mappings.len());
        let mut row_key = None;
        let mut failures = 0;
        for (mapping, idx) in mappings.iter().zip(&indices) {
            let value = idx.map_or(&NULL, |i| &record[i]);
            match mapping.kind {
                FieldKind::Key => match value.as_key() {
                    Some(key) if seen_keys.contains(&key) => {
                        report.dropped_duplicate_key += 1;
                        continue 'rows;
                    }
                    Some(key) => {
                        row_key = Some(key);
                        row.push(SqlValue::Integer(key));
                    }
                    None => {
                        report.dropped_missing_key += 1;
                        continue 'rows;
                    }
                },
                FieldKind::ForeignKey(target) => {
                    let known = known_keys.get(&target);
                    match value.as_key() {
                        Some(key) if known.is_some_and(|keys| keys.contains(&key)) => {
                            row.push(SqlValue::Integer(key));
                        }
                        _ => {
                            report.dropped_foreign_key += 1;
                            continue 'rows;
                        }
                    }
                }
                FieldKind::RequiredText if value.is_null() => {
                    report.dropped_missing_required += 1;
                    continue 'rows;
                }
                kind => {
                    let coerced = coerce(value, kind);
                    if !value.is_null() && coerced == SqlValue::Null {
                        failures += 1;
                    }
                    row.push(coerced);
                }
            }
        }
        // A key is only taken once the whole row is accepted.
        seen_keys.extend(row_key);
        report.coercion_failures += failures;
        rows.push(row);
    }

    report.inserted = rows.len();
    Ok((rows, report))
}

fn coerce(value: &Value, kind: FieldKind) -> SqlValue {
    match (kind, value) {
        (_, Value::Null) => SqlValue::Null,
        (FieldKind::Real, v) => v.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        (FieldKind::Integer, v) => v.as_key().map_or(SqlValue::Null, SqlValue::Integer),
        (FieldKind::Date, Value::Date(d)) => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
        (FieldKind::Date, Value::Str(s)) => parse_date(s).map_or(SqlValue::Null, |d| {
            SqlValue::Text(d.format(DATE_FORMAT).to_string())
        }),
        (FieldKind::Date, _) => SqlValue::Null,
        (_, v) => SqlValue::Text(v.to_string()),
    }
}

/// Empties `entity`'s table and inserts the prepared rows of `batch` within `tx`.
fn replace_table(tx: &Transaction<'_>, entity: Entity, batch: &Batch) -> Result<LoadReport> {
    let table = entity.table_name();

    let mut known_keys = HashMap::new();
    for mapping in field_mappings(entity) {
        if let FieldKind::ForeignKey(target) = mapping.kind {
            let sql = format!(
                "SELECT {} FROM {}",
                key_column(target),
                target.table_name()
            );
            let mut stmt = tx.prepare(&sql)?;
            let keys = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<HashSet<i64>>>()?;
            debug!("{} known {} keys", keys.len(), target);
            known_keys.insert(target, keys);
        }
    }

    let (rows, mut report) = prepare_rows(entity, batch, &known_keys)?;

    let deleted = tx.execute(&format!("DELETE FROM {}", table), [])?;
    debug!("Cleared {} existing rows from {}", deleted, table);

    let columns: Vec<&str> = field_mappings(entity).iter().map(|f| f.dest).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    {
        let mut stmt = tx.prepare(&sql)?;
        for row in &rows {
            stmt.execute(rusqlite::params_from_iter(row.iter()))?;
        }
    }

    report.orphans_removed = remove_orphans(tx, entity)?;

    info!(
        "Loaded {} rows into {} ({} dropped: {} missing key, {} duplicate key, {} foreign key, {} missing required)",
        report.inserted,
        table,
        report.dropped(),
        report.dropped_missing_key,
        report.dropped_duplicate_key,
        report.dropped_foreign_key,
        report.dropped_missing_required
    );
    Ok(report)
}

/// Deletes rows of other tables whose foreign key into `entity` no longer
/// matches a stored key.
fn remove_orphans(tx: &Transaction<'_>, entity: Entity) -> Result<usize> {
    let mut removed = 0;
    for referrer in Entity::ALL {
        for mapping in field_mappings(referrer) {
            if mapping.kind != FieldKind::ForeignKey(entity) {
                continue;
            }
            let deleted = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {} NOT IN (SELECT {} FROM {})",
                    referrer.table_name(),
                    mapping.dest,
                    key_column(entity),
                    entity.table_name()
                ),
                [],
            )?;
            if deleted > 0 {
                warn!(
                    "Removed {} {} rows referencing {} keys no longer present",
                    deleted, referrer, entity
                );
            }
            removed += deleted;
        }
    }
    Ok(removed)
}

/// Connection to the SQLite warehouse.
///
/// The connection is closed when the value is dropped; [`Warehouse::close`]
/// does the same but reports errors.
pub struct Warehouse {
    conn: Connection,
    path: PathBuf,
}

impl Warehouse {
    /// Opens (creating if needed) the warehouse at `path` and makes sure the
    /// three tables exist.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::StoreConnection` if the database cannot be
    /// opened or initialized.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        info!("Connecting to warehouse at {}", path.display());
        let conn = Connection::open(path)
            .and_then(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                conn.execute_batch(SCHEMA_SQL)?;
                Ok(conn)
            })
            .map_err(|source| PipelineError::StoreConnection {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Replaces the contents of `entity`'s table with the rows of `batch`.
    ///
    /// Everything happens in one transaction: the table is emptied, the rows
    /// are inserted through a single prepared statement, rows of other tables
    /// left pointing at removed keys are deleted, and the transaction commits.
    /// Any error rolls the whole load back, so re-running with the same batch
    /// always yields the same table.
    pub fn load(&mut self, entity: Entity, batch: &Batch) -> Result<LoadReport> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
        let report = replace_table(&tx, entity, batch)?;
        tx.commit()?;
        Ok(report)
    }

    /// Loads several entities in a single transaction, dimensions first.
    ///
    /// When the sale table is among them it is emptied before any dimension
    /// is replaced. Nothing is committed unless every load succeeds, so a
    /// failed run leaves the warehouse exactly as it was.
    pub fn load_all(&mut self, batches: &[(Entity, &Batch)]) -> Result<Vec<LoadReport>> {
        let tx = self.conn.transaction()?;
        tx.execute_batch("PRAGMA defer_foreign_keys = ON;")?;

        if batches.iter().any(|(entity, _)| *entity == Entity::Sale) {
            let cleared = tx.execute(&format!("DELETE FROM {}", Entity::Sale.table_name()), [])?;
            debug!("Cleared {} sale rows ahead of reload", cleared);
        }

        let mut reports = Vec::with_capacity(batches.len());
        for entity in Entity::ALL {
            for (_, batch) in batches.iter().filter(|(e, _)| *e == entity) {
                reports.push(replace_table(&tx, entity, batch)?);
            }
        }

        tx.commit()?;
        Ok(reports)
    }

    pub fn row_count(&self, entity: Entity) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", entity.table_name()),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Primary keys currently stored for `entity`, ascending.
    pub fn keys(&self, entity: Entity) -> Result<Vec<i64>> {
        let key = key_column(entity);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM {} ORDER BY {}",
            key,
            entity.table_name(),
            key
        ))?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(keys)
    }

    /// Runs a single-row query against the warehouse, mainly for inspection.
    pub fn query_row<T, F>(&self, sql: &str, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        Ok(self.conn.query_row(sql, [], f)?)
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| PipelineError::Sqlite(e))?;
        info!("Connection to {} closed", self.path.display());
        Ok(())
    }
}
