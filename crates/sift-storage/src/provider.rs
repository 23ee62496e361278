//! SQLite-backed [`DataProvider`].
//!
//! Filters compile to parameterised SQL. Identifiers are only ever emitted
//! for columns read back from the table schema, double-quoted; every value
//! is bound as a parameter.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use sift_core::config::SiftConfig;
use sift_core::error::{Result, SiftError};
use sift_core::filter::{Filter, FilterOp, FilterValue};
use sift_core::provider::{BoxFuture, CountSummary, DataProvider, UNGROUPED};
use sift_core::types::{format_timestamp, value_to_text, CanonicalField, FieldMapping, Record};

use crate::executor::{QueryExecutor, QuerySpec, SqlValue};
use crate::pool::ConnectionPool;

/// Rows sampled when inferring a field mapping.
const INFER_SAMPLE: usize = 100;

/// A table in a SQLite database, read through the pooled executor.
pub struct SqliteProvider {
    executor: Arc<QueryExecutor>,
    table: String,
    fields: Vec<String>,
    mapping: FieldMapping,
}

impl SqliteProvider {
    /// Open `table` in the database at `path`.
    ///
    /// With `mapping` of `None` the roles are inferred from the column names
    /// and a sample of rows. The id field must exist and be unique.
    pub fn open(
        path: &Path,
        table: &str,
        mapping: Option<FieldMapping>,
        config: &SiftConfig,
    ) -> Result<Self> {
        let pool = ConnectionPool::open(path, &config.pool)?;
        let executor = Arc::new(QueryExecutor::new(pool, &config.pool, &config.cache));

        let columns = executor.execute(
            "SELECT name FROM pragma_table_info(?1)",
            &[SqlValue::Text(table.to_string())],
            usize::MAX,
        )?;
        let fields: Vec<String> = columns.rows.iter().filter_map(|r| r.get_text("name")).collect();
        if fields.is_empty() {
            return Err(SiftError::Storage(format!(
                "Table '{}' not found in {}",
                table,
                path.display()
            )));
        }

        let mapping = match mapping {
            Some(mapping) => mapping,
            None => {
                let sample = executor.execute(
                    &format!("SELECT * FROM {} LIMIT ?1", quote_ident(table)),
                    &[SqlValue::Integer(INFER_SAMPLE as i64)],
                    INFER_SAMPLE,
                )?;
                FieldMapping::infer(&fields, &sample.rows)
            }
        };

        let provider = Self {
            executor,
            table: table.to_string(),
            fields,
            mapping,
        };
        provider.validate_ids()?;

        info!(
            table = %provider.table,
            columns = provider.fields.len(),
            path = %path.display(),
            "SQLite provider opened"
        );
        Ok(provider)
    }

    /// Materialise `records` into a new `table` at `path`, then open it.
    ///
    /// Numeric fields become `REAL` columns, the id field keeps the type of
    /// its values, and everything else is `TEXT`.
    pub fn create(
        path: &Path,
        table: &str,
        fields: &[String],
        records: &[Record],
        mapping: FieldMapping,
        config: &SiftConfig,
    ) -> Result<Self> {
        mapping.validate_unique_ids(records)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)
            .map_err(|e| SiftError::Storage(format!("Failed to open database: {}", e)))?;

        let columns: Vec<String> = fields
            .iter()
            .map(|f| {
                let affinity = if mapping.role_of(f) == Some(CanonicalField::Id) {
                    ""
                } else if mapping.is_numeric(f) {
                    " REAL"
                } else {
                    " TEXT"
                };
                format!("{}{}", quote_ident(f), affinity)
            })
            .collect();
        let create = format!("CREATE TABLE {} ({})", quote_ident(table), columns.join(", "));
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            fields.iter().map(|f| quote_ident(f)).collect::<Vec<_>>().join(", "),
            placeholders(fields.len())
        );

        let tx = conn
            .transaction()
            .map_err(|e| SiftError::Storage(format!("Failed to begin transaction: {}", e)))?;
        tx.execute(&create, [])
            .map_err(|e| SiftError::Storage(format!("Failed to create table: {}", e)))?;
        {
            let mut stmt = tx
                .prepare(&insert)
                .map_err(|e| SiftError::Storage(format!("Failed to prepare insert: {}", e)))?;
            for record in records {
                let values: Vec<SqlValue> = fields
                    .iter()
                    .map(|f| record.get(f).map(json_to_sql).unwrap_or(SqlValue::Null))
                    .collect();
                stmt.execute(rusqlite::params_from_iter(values.iter()))
                    .map_err(|e| SiftError::Storage(format!("Failed to insert record: {}", e)))?;
            }
        }
        tx.commit()
            .map_err(|e| SiftError::Storage(format!("Failed to commit: {}", e)))?;
        drop(conn);

        info!(table, rows = records.len(), "Materialised records into SQLite");
        Self::open(path, table, Some(mapping), config)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn executor(&self) -> &Arc<QueryExecutor> {
        &self.executor
    }

    fn has_column(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    fn validate_ids(&self) -> Result<()> {
        let id_field = self
            .mapping
            .id_field()
            .ok_or_else(|| SiftError::InvalidMapping("no id field mapped".into()))?;
        if !self.has_column(id_field) {
            return Err(SiftError::InvalidMapping(format!(
                "id field '{}' is not a column of '{}'",
                id_field, self.table
            )));
        }

        let id = quote_ident(id_field);
        let sql = format!(
            "SELECT COUNT(*) AS total, COUNT({id}) AS present, \
             COUNT(DISTINCT CAST({id} AS TEXT)) AS distinct_ids FROM {}",
            quote_ident(&self.table)
        );
        let result = self.executor.execute(&sql, &[], 1)?;
        let row = result.rows.first().cloned().unwrap_or_default();
        let count = |name: &str| row.get_f64(name).unwrap_or(0.0) as u64;

        if count("present") < count("total") {
            return Err(SiftError::InvalidMapping(format!(
                "{} row(s) have no '{}' value",
                count("total") - count("present"),
                id_field
            )));
        }
        if count("distinct_ids") < count("present") {
            return Err(SiftError::InvalidMapping(format!(
                "duplicate ids in field '{}'",
                id_field
            )));
        }
        Ok(())
    }

    /// The bounded `SELECT` for one filter set.
    fn filter_spec(&self, filters: &[Filter], max_rows: usize) -> QuerySpec {
        let (clause, mut params) = self.compile(filters);
        params.push(SqlValue::Integer(max_rows.min(i64::MAX as usize) as i64));
        let sql = format!(
            "SELECT * FROM {} WHERE {} LIMIT ?",
            quote_ident(&self.table),
            clause
        );
        debug!(sql = %sql, params = params.len(), "Compiled structured filter");
        QuerySpec::new(sql, params, max_rows)
    }

    /// Compile `filters` into a `WHERE` clause and its parameters.
    fn compile(&self, filters: &[Filter]) -> (String, Vec<SqlValue>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        for filter in filters.iter().filter(|f| !f.is_recent()) {
            clauses.push(self.compile_one(filter, &mut params));
        }

        let base = if clauses.is_empty() {
            "1".to_string()
        } else {
            clauses.join(" AND ")
        };

        if !filters.iter().any(Filter::is_recent) {
            return (base, params);
        }

        // Latest timestamp among the rows the other filters keep.
        match self.mapping.timestamp_field().filter(|f| self.has_column(f)) {
            Some(ts) => {
                let ts = quote_ident(ts);
                let clause = format!(
                    "{base} AND datetime({ts}) = (SELECT MAX(datetime({ts})) FROM {} WHERE {base})",
                    quote_ident(&self.table)
                );
                let mut all = params.clone();
                all.extend(params);
                (clause, all)
            }
            None => ("0".to_string(), Vec::new()),
        }
    }

    fn compile_one(&self, filter: &Filter, params: &mut Vec<SqlValue>) -> String {
        if !self.has_column(&filter.field) {
            debug!(field = %filter.field, "Filter on unknown column matches nothing");
            return "0".to_string();
        }
        let col = quote_ident(&filter.field);

        match (&filter.op, &filter.value) {
            (FilterOp::Contains, FilterValue::Text(needle)) => {
                params.push(SqlValue::Text(format!("%{}%", escape_like(needle))));
                format!("{col} LIKE ? ESCAPE '\\'")
            }
            (FilterOp::In, FilterValue::List(options)) if !options.is_empty() => {
                params.extend(options.iter().cloned().map(SqlValue::Text));
                format!("{col} COLLATE NOCASE IN ({})", placeholders(options.len()))
            }
            (FilterOp::Contains | FilterOp::In, _) => "0".to_string(),
            (op, FilterValue::Text(expected)) => {
                params.push(SqlValue::Text(expected.clone()));
                format!("{col} {} ? COLLATE NOCASE", sql_op(*op))
            }
            (FilterOp::Neq, FilterValue::Number(expected)) => {
                // Non-numeric values are "not equal" to any number.
                params.push(SqlValue::Real(*expected));
                format!(
                    "{col} IS NOT NULL AND (typeof({col}) NOT IN ('integer', 'real') \
                     OR CAST({col} AS REAL) <> ?)"
                )
            }
            (op, FilterValue::Number(expected)) => {
                params.push(SqlValue::Real(*expected));
                format!("{col} IS NOT NULL AND CAST({col} AS REAL) {} ?", sql_op(*op))
            }
            (op, FilterValue::Timestamp(ts)) => {
                params.push(SqlValue::Text(format_timestamp(ts)));
                format!("datetime({col}) {} ?", sql_op(*op))
            }
            (FilterOp::Eq | FilterOp::Neq, FilterValue::Bool(expected)) => {
                let (word, digit) = if *expected { ("true", "1") } else { ("false", "0") };
                params.push(SqlValue::Text(word.to_string()));
                params.push(SqlValue::Text(digit.to_string()));
                let negate = if filter.op == FilterOp::Neq { "NOT " } else { "" };
                format!("{col} IS NOT NULL AND lower(CAST({col} AS TEXT)) {negate}IN (?, ?)")
            }
            (_, FilterValue::Bool(_)) | (_, FilterValue::List(_)) => "0".to_string(),
        }
    }
}

impl DataProvider for SqliteProvider {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn records(&self) -> Result<Vec<Record>> {
        let sql = format!("SELECT * FROM {} ORDER BY rowid", quote_ident(&self.table));
        self.executor.execute_streaming(&sql, &[])?.collect()
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Record>> {
        let Some(id_field) = self.mapping.id_field().filter(|f| self.has_column(f)) else {
            return Ok(None);
        };
        let sql = format!(
            "SELECT * FROM {} WHERE CAST({} AS TEXT) = ?1 LIMIT 1",
            quote_ident(&self.table),
            quote_ident(id_field)
        );
        let result = self
            .executor
            .execute(&sql, &[SqlValue::Text(id.to_string())], 1)?;
        Ok(result.rows.into_iter().next())
    }

    fn filter(&self, filters: &[Filter], max_rows: usize) -> Result<Vec<Record>> {
        let spec = self.filter_spec(filters, max_rows);
        Ok(self.executor.execute(&spec.sql, &spec.params, max_rows)?.rows)
    }

    fn filter_batch<'a>(
        &'a self,
        batches: Vec<Vec<Filter>>,
        max_rows: usize,
    ) -> BoxFuture<'a, Vec<Vec<Record>>> {
        let specs: Vec<QuerySpec> = batches
            .iter()
            .map(|filters| self.filter_spec(filters, max_rows))
            .collect();
        Box::pin(async move {
            self.executor
                .execute_many(specs)
                .await
                .into_iter()
                .map(|result| result.rows)
                .collect()
        })
    }

    fn count(&self, filters: &[Filter], group_by: Option<&str>) -> Result<CountSummary> {
        let (clause, params) = self.compile(filters);
        let table = quote_ident(&self.table);

        let grouped = group_by.filter(|g| self.has_column(g));
        let mut groups = BTreeMap::new();
        let count = match grouped {
            Some(field) => {
                let col = quote_ident(field);
                let sql = format!(
                    "SELECT {col} AS grp, COUNT(*) AS n FROM {table} WHERE {clause} GROUP BY {col}"
                );
                let result = self.executor.execute(&sql, &params, usize::MAX)?;
                let mut total = 0usize;
                for row in &result.rows {
                    let n = row.get_f64("n").unwrap_or(0.0) as usize;
                    let key = row.get_text("grp").unwrap_or_else(|| UNGROUPED.to_string());
                    *groups.entry(key).or_insert(0) += n;
                    total += n;
                }
                total
            }
            None => {
                let sql = format!("SELECT COUNT(*) AS n FROM {table} WHERE {clause}");
                let result = self.executor.execute(&sql, &params, 1)?;
                let n = result
                    .rows
                    .first()
                    .and_then(|r| r.get_f64("n"))
                    .unwrap_or(0.0) as usize;
                if group_by.is_some() {
                    groups.insert(UNGROUPED.to_string(), n);
                }
                n
            }
        };

        Ok(CountSummary {
            count,
            target: None,
            group_by: group_by.map(str::to_string),
            groups: if count == 0 { BTreeMap::new() } else { groups },
        })
    }

    fn distinct_values(&self, field: &str) -> Result<Vec<String>> {
        if !self.has_column(field) {
            return Ok(Vec::new());
        }
        let col = quote_ident(field);
        let sql = format!(
            "SELECT DISTINCT {col} AS v FROM {} WHERE {col} IS NOT NULL",
            quote_ident(&self.table)
        );
        let values: BTreeSet<String> = self
            .executor
            .execute(&sql, &[], usize::MAX)?
            .rows
            .iter()
            .filter_map(|r| r.get_text("v"))
            .collect();
        Ok(values.into_iter().collect())
    }
}

impl std::fmt::Debug for SqliteProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteProvider")
            .field("table", &self.table)
            .field("fields", &self.fields)
            .finish()
    }
}

// =============================================================================
// SQL helpers
// =============================================================================

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn sql_op(op: FilterOp) -> &'static str {
    match op {
        FilterOp::Eq => "=",
        FilterOp::Neq => "<>",
        FilterOp::Gt => ">",
        FilterOp::Gte => ">=",
        FilterOp::Lt => "<",
        FilterOp::Lte => "<=",
        FilterOp::Contains | FilterOp::In => "=",
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        other => value_to_text(other).map(SqlValue::Text).unwrap_or(SqlValue::Null),
    }
}
