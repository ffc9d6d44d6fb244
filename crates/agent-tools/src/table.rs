//! Table tool
//!
//! A `table` tool over named, typed tables: schema changes, filtered reads
//! and writes, and a few analytics (aggregate, group_by, time_series,
//! join_select). Payloads are restricted JSON, never query text. Every
//! `where` is an AND of column equalities.
//!
//! Storage sits behind [`TableStore`]; [`MemoryTableStore`] keeps tables in
//! process. Each store call is atomic: a failing insert or update leaves the
//! table untouched.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use agent_core::tool::{ParamType, ParameterSchema, ToolBackend, ToolSpec};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{Result, ToolsError};

pub const TABLE_TOOL: &str = "table";

const DEFAULT_TOP_N: usize = 10;

const ACTIONS: [&str; 15] = [
    "create_table",
    "drop_table",
    "add_column",
    "drop_column",
    "rename_column",
    "describe_table",
    "list_tables",
    "insert",
    "select",
    "update",
    "delete",
    "aggregate",
    "group_by",
    "time_series",
    "join_select",
];

/// One row, keyed by column name
pub type Row = Map<String, Value>;

/// Column equalities, all of which must hold
pub type Filter = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Text,
    Float,
    Boolean,
    Timestamp,
    Date,
}

impl ColumnType {
    /// Accepted spellings, aliases included
    pub const NAMES: [&'static str; 12] = [
        "integer", "int", "text", "string", "varchar", "float", "double", "boolean", "bool",
        "timestamp", "datetime", "date",
    ];

    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(Self::Integer),
            "text" | "string" | "varchar" => Ok(Self::Text),
            "float" | "double" => Ok(Self::Float),
            "boolean" | "bool" => Ok(Self::Boolean),
            "timestamp" | "datetime" => Ok(Self::Timestamp),
            "date" => Ok(Self::Date),
            _ => Err(ToolsError::UnsupportedType(name.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Date => "date",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Text => value.is_string(),
            Self::Timestamp => value.as_str().and_then(parse_timestamp).is_some(),
            Self::Date => value
                .as_str()
                .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        }
    }
}

/// Column definition as stored and as reported by `describe_table`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
            primary_key: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Parse `{"name", "type" | "data_type", "pk" | "primary_key",
    /// "nullable" | "not_null", "default"}`
    pub fn from_payload(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| ToolsError::Config("column definitions must be objects".to_string()))?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.trim().is_empty())
            .ok_or(ToolsError::MissingField("name"))?;
        let type_name = obj
            .get("type")
            .or_else(|| obj.get("data_type"))
            .and_then(Value::as_str)
            .ok_or(ToolsError::MissingField("type"))?;
        let flag = |key: &str| obj.get(key).and_then(Value::as_bool);

        let primary_key = flag("pk").or_else(|| flag("primary_key")).unwrap_or(false);
        let nullable = flag("not_null").map_or_else(|| flag("nullable").unwrap_or(true), |nn| !nn);

        let column = Self {
            name: name.to_string(),
            column_type: ColumnType::parse(type_name)?,
            nullable: nullable && !primary_key,
            primary_key,
            default: obj.get("default").filter(|v| !v.is_null()).cloned(),
        };
        if let Some(default) = &column.default {
            column.check(default)?;
        }
        Ok(column)
    }

    fn check(&self, value: &Value) -> Result<()> {
        let message = if value.is_null() {
            if self.nullable {
                return Ok(());
            }
            "may not be null".to_string()
        } else if self.column_type.accepts(value) {
            return Ok(());
        } else {
            format!("expected {}, got {value}", self.column_type.as_str())
        };
        Err(ToolsError::InvalidValue {
            column: self.name.clone(),
            message,
        })
    }

    fn is_serial(&self) -> bool {
        self.primary_key && self.column_type == ColumnType::Integer
    }
}

/// Read request for [`TableStore::select`]
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Columns to return; all of them when `None`
    pub columns: Option<Vec<String>>,
    pub filter: Filter,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    fn only(column: &str, filter: Filter) -> Self {
        Self {
            columns: Some(vec![column.to_string()]),
            filter,
            ..Self::default()
        }
    }
}

/// Storage for the `table` tool
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create unless it exists; returns the table's column names
    async fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> Result<Vec<String>>;

    /// Whether a table was removed
    async fn drop_table(&self, name: &str) -> Result<bool>;

    /// Whether the column was added; an existing column is left alone
    async fn add_column(&self, table: &str, column: ColumnDef) -> Result<bool>;

    /// Whether the column existed
    async fn drop_column(&self, table: &str, column: &str) -> Result<bool>;

    async fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<()>;

    async fn describe(&self, table: &str) -> Result<Vec<ColumnDef>>;

    /// Table names with their row counts, by name
    async fn list_tables(&self) -> Result<Vec<(String, usize)>>;

    /// Number of rows inserted
    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64>;

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>>;

    /// Number of rows changed
    async fn update(&self, table: &str, filter: &Filter, values: &Row) -> Result<u64>;

    /// Number of rows removed
    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64>;
}

#[derive(Clone)]
struct MemTable {
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
    last_serial: i64,
}

impl MemTable {
    fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            last_serial: 0,
        }
    }

    fn column(&self, table: &str, name: &str) -> Result<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ToolsError::NoSuchColumn {
                table: table.to_string(),
                column: name.to_string(),
            })
    }

    fn check_keys<'a>(&self, table: &str, keys: impl IntoIterator<Item = &'a String>) -> Result<()> {
        for key in keys {
            self.column(table, key)?;
        }
        Ok(())
    }

    /// Full row from user values: serial keys, defaults and type checks
    fn complete_row(&mut self, table: &str, mut values: Row) -> Result<Row> {
        self.check_keys(table, values.keys())?;
        let mut row = Row::new();
        for column in &self.columns {
            let value = match values.remove(&column.name) {
                Some(value) if !value.is_null() => value,
                _ if column.is_serial() => {
                    self.last_serial += 1;
                    json!(self.last_serial)
                }
                _ => column.default.clone().unwrap_or(Value::Null),
            };
            column.check(&value)?;
            if column.is_serial() {
                if let Some(n) = value.as_i64() {
                    self.last_serial = self.last_serial.max(n);
                }
            }
            row.insert(column.name.clone(), value);
        }
        Ok(row)
    }

    fn primary_key(&self, row: &Row) -> Option<Vec<Value>> {
        let key: Vec<Value> = self
            .columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| row.get(&c.name).cloned().unwrap_or(Value::Null))
            .collect();
        (!key.is_empty()).then_some(key)
    }

    /// Fails when another row (not `skip`) has the same primary key
    fn check_unique(&self, table: &str, row: &Row, skip: Option<usize>) -> Result<()> {
        let Some(key) = self.primary_key(row) else {
            return Ok(());
        };
        let taken = self
            .rows
            .iter()
            .enumerate()
            .any(|(i, other)| Some(i) != skip && self.primary_key(other).as_ref() == Some(&key));
        if taken {
            return Err(ToolsError::Conflict(format!(
                "duplicate primary key {} in '{table}'",
                Value::Array(key)
            )));
        }
        Ok(())
    }
}

fn row_matches(row: &Row, filter: &Filter) -> bool {
    filter
        .iter()
        .all(|(column, expected)| same_value(row.get(column).unwrap_or(&Value::Null), expected))
}

/// JSON equality where `1` and `1.0` are the same number
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// In-memory tables, keyed by name
#[derive(Default)]
pub struct MemoryTableStore {
    tables: RwLock<BTreeMap<String, MemTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, table: &str, f: impl FnOnce(&MemTable) -> Result<T>) -> Result<T> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let t = tables
            .get(table)
            .ok_or_else(|| ToolsError::NoSuchTable(table.to_string()))?;
        f(t)
    }

    /// Run `f` on a copy and keep it only on success
    fn write<T>(&self, table: &str, f: impl FnOnce(&mut MemTable) -> Result<T>) -> Result<T> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let t = tables
            .get_mut(table)
            .ok_or_else(|| ToolsError::NoSuchTable(table.to_string()))?;
        let mut staged = t.clone();
        let out = f(&mut staged)?;
        *t = staged;
        Ok(out)
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn create_table(&self, name: &str, columns: Vec<ColumnDef>) -> Result<Vec<String>> {
        if name.trim().is_empty() {
            return Err(ToolsError::MissingField("table"));
        }
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = tables.get(name) {
            return Ok(existing.columns.iter().map(|c| c.name.clone()).collect());
        }

        let columns = if columns.is_empty() {
            vec![ColumnDef::new("id", ColumnType::Integer).primary_key()]
        } else {
            columns
        };
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(ToolsError::Conflict(format!(
                    "column '{}' defined twice",
                    column.name
                )));
            }
        }

        let names = columns.iter().map(|c| c.name.clone()).collect();
        tables.insert(name.to_string(), MemTable::new(columns));
        tracing::info!(table = name, "Table created");
        Ok(names)
    }

    async fn drop_table(&self, name: &str) -> Result<bool> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.remove(name).is_some())
    }

    async fn add_column(&self, table: &str, column: ColumnDef) -> Result<bool> {
        self.write(table, |t| {
            if t.columns.iter().any(|c| c.name == column.name) {
                return Ok(false);
            }
            let fill = column.default.clone().unwrap_or(Value::Null);
            if !t.rows.is_empty() {
                column.check(&fill)?;
            }
            for row in &mut t.rows {
                row.insert(column.name.clone(), fill.clone());
            }
            t.columns.push(column);
            Ok(true)
        })
    }

    async fn drop_column(&self, table: &str, column: &str) -> Result<bool> {
        self.write(table, |t| {
            let before = t.columns.len();
            t.columns.retain(|c| c.name != column);
            if t.columns.len() == before {
                return Ok(false);
            }
            for row in &mut t.rows {
                row.remove(column);
            }
            Ok(true)
        })
    }

    async fn rename_column(&self, table: &str, from: &str, to: &str) -> Result<()> {
        self.write(table, |t| {
            if t.columns.iter().any(|c| c.name == to) {
                return Err(ToolsError::Conflict(format!(
                    "column '{to}' already exists in '{table}'"
                )));
            }
            let column = t
                .columns
                .iter_mut()
                .find(|c| c.name == from)
                .ok_or_else(|| ToolsError::NoSuchColumn {
                    table: table.to_string(),
                    column: from.to_string(),
                })?;
            column.name = to.to_string();
            for row in &mut t.rows {
                if let Some(value) = row.remove(from) {
                    row.insert(to.to_string(), value);
                }
            }
            Ok(())
        })
    }

    async fn describe(&self, table: &str) -> Result<Vec<ColumnDef>> {
        self.read(table, |t| Ok(t.columns.clone()))
    }

    async fn list_tables(&self) -> Result<Vec<(String, usize)>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .iter()
            .map(|(name, t)| (name.clone(), t.rows.len()))
            .collect())
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<u64> {
        self.write(table, |t| {
            let mut inserted = 0;
            for values in rows {
                let row = t.complete_row(table, values)?;
                t.check_unique(table, &row, None)?;
                t.rows.push(row);
                inserted += 1;
            }
            Ok(inserted)
        })
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>> {
        self.read(table, |t| {
            t.check_keys(table, query.filter.keys())?;
            if let Some(columns) = &query.columns {
                t.check_keys(table, columns)?;
            }
            Ok(t.rows
                .iter()
                .filter(|row| row_matches(row, &query.filter))
                .skip(query.offset.unwrap_or(0))
                .take(query.limit.unwrap_or(usize::MAX))
                .map(|row| match &query.columns {
                    Some(columns) => columns
                        .iter()
                        .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                        .collect(),
                    None => row.clone(),
                })
                .collect())
        })
    }

    async fn update(&self, table: &str, filter: &Filter, values: &Row) -> Result<u64> {
        self.write(table, |t| {
            t.check_keys(table, filter.keys())?;
            t.check_keys(table, values.keys())?;
            for (name, value) in values {
                t.column(table, name)?.check(value)?;
            }

            let hits: Vec<usize> = t
                .rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row_matches(row, filter))
                .map(|(i, _)| i)
                .collect();
            for &i in &hits {
                for (name, value) in values {
                    t.rows[i].insert(name.clone(), value.clone());
                }
            }
            for &i in &hits {
                t.check_unique(table, &t.rows[i], Some(i))?;
            }
            Ok(hits.len() as u64)
        })
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64> {
        self.write(table, |t| {
            t.check_keys(table, filter.keys())?;
            let before = t.rows.len();
            t.rows.retain(|row| !row_matches(row, filter));
            Ok((before - t.rows.len()) as u64)
        })
    }
}

/// Arguments of the `table` tool
#[derive(Debug, Deserialize)]
struct TableArgs {
    action: String,
    table: Option<String>,
    columns: Option<Vec<Value>>,
    #[serde(alias = "field")]
    column: Option<String>,
    data_type: Option<String>,
    nullable: Option<bool>,
    default: Option<Value>,
    #[serde(alias = "data")]
    values: Option<Row>,
    rows: Option<Vec<Row>>,
    #[serde(rename = "where")]
    filter: Option<Filter>,
    limit: Option<usize>,
    offset: Option<usize>,
    old_name: Option<String>,
    new_name: Option<String>,
    #[serde(alias = "agg")]
    operation: Option<String>,
    top_n: Option<usize>,
    percent: Option<bool>,
    granularity: Option<String>,
    left_table: Option<String>,
    right_table: Option<String>,
    left_key: Option<String>,
    right_key: Option<String>,
}

impl TableArgs {
    fn table(&self) -> Result<&str> {
        self.table.as_deref().ok_or(ToolsError::MissingField("table"))
    }

    fn column(&self) -> Result<&str> {
        self.column.as_deref().ok_or(ToolsError::MissingField("column"))
    }

    fn projection(&self) -> Result<Option<Vec<String>>> {
        self.columns
            .as_ref()
            .map(|columns| {
                columns
                    .iter()
                    .map(|c| {
                        c.as_str().map(str::to_string).ok_or_else(|| {
                            ToolsError::Config("columns must be a list of column names".to_string())
                        })
                    })
                    .collect()
            })
            .transpose()
    }
}

/// Which side of a join a column belongs to
#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

fn split_side(key: &str) -> Result<(Side, &str)> {
    match key.split_once('.') {
        None => Ok((Side::Left, key)),
        Some(("left", column)) => Ok((Side::Left, column)),
        Some(("right", column)) => Ok((Side::Right, column)),
        Some(_) => Err(ToolsError::Config(format!(
            "'{key}' must be a column name prefixed with left. or right."
        ))),
    }
}

/// The `table` tool over any [`TableStore`]
pub struct TableTool {
    store: Arc<dyn TableStore>,
}

impl TableTool {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryTableStore::new()))
    }

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            TABLE_TOOL,
            "Create and query structured tables. Schema: create_table, drop_table, add_column, \
             drop_column, rename_column, describe_table, list_tables. Data: insert, select, \
             update, delete. Analytics: aggregate, group_by, time_series, join_select. \
             'where' is an object of column equalities.",
        )
        .param(
            ParameterSchema::required("action", ParamType::String, "Operation to perform")
                .with_enum(ACTIONS.iter().map(|a| json!(a)).collect()),
        )
        .param(ParameterSchema::optional("table", ParamType::String, "Target table"))
        .param(ParameterSchema::optional(
            "columns",
            ParamType::Array,
            "create_table: [{name, type, pk, nullable, default}]; select, join_select: column names to return",
        ))
        .param(ParameterSchema::optional(
            "column",
            ParamType::String,
            "Column for add_column, drop_column, aggregate, group_by, time_series",
        ))
        .param(
            ParameterSchema::optional("data_type", ParamType::String, "add_column: column type")
                .with_enum(ColumnType::NAMES.iter().map(|t| json!(t)).collect()),
        )
        .param(ParameterSchema::optional(
            "nullable",
            ParamType::Boolean,
            "add_column: whether nulls are allowed",
        ))
        .param(ParameterSchema::optional(
            "values",
            ParamType::Object,
            "insert: one row; update: new column values",
        ))
        .param(ParameterSchema::optional(
            "rows",
            ParamType::Array,
            "insert: several rows at once",
        ))
        .param(ParameterSchema::optional(
            "where",
            ParamType::Object,
            "Column equalities rows must match; join_select keys may be prefixed left. or right.",
        ))
        .param(ParameterSchema::optional("limit", ParamType::Integer, "Maximum rows returned"))
        .param(ParameterSchema::optional("offset", ParamType::Integer, "Rows skipped first"))
        .param(ParameterSchema::optional("old_name", ParamType::String, "rename_column: current name"))
        .param(ParameterSchema::optional("new_name", ParamType::String, "rename_column: new name"))
        .param(
            ParameterSchema::optional("operation", ParamType::String, "aggregate: function")
                .with_enum(vec![json!("count"), json!("sum"), json!("avg"), json!("min"), json!("max")]),
        )
        .param(ParameterSchema::optional("top_n", ParamType::Integer, "group_by: groups returned"))
        .param(ParameterSchema::optional(
            "percent",
            ParamType::Boolean,
            "group_by: include each group's share",
        ))
        .param(
            ParameterSchema::optional("granularity", ParamType::String, "time_series: bucket size")
                .with_enum(vec![json!("hour"), json!("day"), json!("week"), json!("month"), json!("year")]),
        )
        .param(ParameterSchema::optional("left_table", ParamType::String, "join_select: left table"))
        .param(ParameterSchema::optional("right_table", ParamType::String, "join_select: right table"))
        .param(ParameterSchema::optional("left_key", ParamType::String, "join_select: left join column"))
        .param(ParameterSchema::optional("right_key", ParamType::String, "join_select: right join column"))
    }

    /// Run one action against the store
    pub async fn execute(&self, arguments: &Value) -> Result<Value> {
        let args: TableArgs = serde_json::from_value(arguments.clone())
            .map_err(|e| ToolsError::Config(format!("invalid table arguments: {e}")))?;
        tracing::debug!(action = %args.action, table = ?args.table, "Table action");
        let store = &self.store;

        match args.action.as_str() {
            "create_table" => {
                let table = args.table()?;
                let columns = args
                    .columns
                    .iter()
                    .flatten()
                    .map(ColumnDef::from_payload)
                    .collect::<Result<Vec<_>>>()?;
                let names = store.create_table(table, columns).await?;
                Ok(json!({"created": table, "columns": names}))
            }
            "drop_table" => {
                let table = args.table()?;
                let dropped = store.drop_table(table).await?;
                Ok(json!({"dropped_table": table, "dropped": dropped}))
            }
            "add_column" => {
                let table = args.table()?;
                let name = args.column()?;
                let column_type = ColumnType::parse(args.data_type.as_deref().unwrap_or("text"))?;
                let mut column = ColumnDef::new(name, column_type);
                column.nullable = args.nullable.unwrap_or(true);
                column.default = args.default.clone().filter(|v| !v.is_null());
                if let Some(default) = &column.default {
                    column.check(default)?;
                }
                let added = store.add_column(table, column).await?;
                Ok(json!({"added_column": name, "table": table, "added": added}))
            }
            "drop_column" => {
                let table = args.table()?;
                let name = args.column()?;
                let dropped = store.drop_column(table, name).await?;
                Ok(json!({"dropped_column": name, "table": table, "dropped": dropped}))
            }
            "rename_column" => {
                let table = args.table()?;
                let old = args.old_name.as_deref().ok_or(ToolsError::MissingField("old_name"))?;
                let new = args.new_name.as_deref().ok_or(ToolsError::MissingField("new_name"))?;
                store.rename_column(table, old, new).await?;
                Ok(json!({"renamed": old, "new_name": new, "table": table}))
            }
            "describe_table" => {
                let table = args.table()?;
                let columns = store.describe(table).await?;
                Ok(json!({"table": table, "columns": columns}))
            }
            "list_tables" => {
                let tables = store.list_tables().await?;
                Ok(Value::Array(
                    tables
                        .into_iter()
                        .map(|(table, rows)| json!({"table": table, "rows": rows}))
                        .collect(),
                ))
            }
            "insert" => {
                let table = args.table()?;
                let rows = match (&args.rows, &args.values) {
                    (Some(rows), _) => rows.clone(),
                    (None, Some(values)) => vec![values.clone()],
                    (None, None) => return Err(ToolsError::MissingField("values")),
                };
                let inserted = store.insert(table, rows).await?;
                Ok(json!({"inserted": inserted}))
            }
            "select" => {
                let query = Query {
                    columns: args.projection()?,
                    filter: args.filter.clone().unwrap_or_default(),
                    limit: args.limit,
                    offset: args.offset,
                };
                let rows = store.select(args.table()?, &query).await?;
                Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
            }
            "update" => {
                let values = args
                    .values
                    .as_ref()
                    .filter(|v| !v.is_empty())
                    .ok_or(ToolsError::MissingField("values"))?;
                let filter = args.filter.clone().unwrap_or_default();
                let updated = store.update(args.table()?, &filter, values).await?;
                Ok(json!({"updated": updated}))
            }
            "delete" => {
                let filter = args.filter.clone().unwrap_or_default();
                let deleted = store.delete(args.table()?, &filter).await?;
                Ok(json!({"deleted": deleted}))
            }
            "aggregate" => self.aggregate(&args).await,
            "group_by" => self.group_by(&args).await,
            "time_series" => self.time_series(&args).await,
            "join_select" => self.join_select(&args).await,
            other => Err(ToolsError::UnsupportedTableAction(other.to_string())),
        }
    }

    async fn aggregate(&self, args: &TableArgs) -> Result<Value> {
        let table = args.table()?;
        let operation = args
            .operation
            .as_deref()
            .unwrap_or("count")
            .to_ascii_lowercase();
        let filter = args.filter.clone().unwrap_or_default();

        let value = if operation == "count" {
            json!(self.store.select(table, &Query::filtered(filter)).await?.len())
        } else {
            let column = args.column()?;
            let rows = self.store.select(table, &Query::only(column, filter)).await?;
            let values: Vec<&Value> = rows
                .iter()
                .filter_map(|r| r.get(column))
                .filter(|v| !v.is_null())
                .collect();
            fold_values(&operation, column, &values)?
        };
        Ok(json!({"table": table, "operation": operation, "value": value}))
    }

    async fn group_by(&self, args: &TableArgs) -> Result<Value> {
        let table = args.table()?;
        let column = args.column()?;
        let rows = self
            .store
            .select(table, &Query::only(column, args.filter.clone().unwrap_or_default()))
            .await?;

        let mut counts: Vec<(Value, usize)> = Vec::new();
        for row in &rows {
            let value = row.get(column).cloned().unwrap_or(Value::Null);
            match counts.iter_mut().find(|(seen, _)| same_value(seen, &value)) {
                Some((_, n)) => *n += 1,
                None => counts.push((value, 1)),
            }
        }
        // stable: ties keep first-seen order
        counts.sort_by(|a, b| b.1.cmp(&a.1));

        let total = rows.len();
        let percent = args.percent.unwrap_or(true);
        let groups: Vec<Value> = counts
            .into_iter()
            .take(args.top_n.unwrap_or(DEFAULT_TOP_N))
            .map(|(value, count)| {
                let mut entry = json!({"value": value, "count": count});
                if percent && total > 0 {
                    entry["percent"] = json!(share(count, total));
                }
                entry
            })
            .collect();
        Ok(json!({"table": table, "group_by": column, "rows": groups, "total": total}))
    }

    async fn time_series(&self, args: &TableArgs) -> Result<Value> {
        let table = args.table()?;
        let column = args.column.as_deref().unwrap_or("created_at");
        let granularity = args.granularity.as_deref().unwrap_or("day");
        if !["hour", "day", "week", "month", "year"].contains(&granularity) {
            return Err(ToolsError::Config(
                "granularity must be hour, day, week, month or year".to_string(),
            ));
        }

        let rows = self
            .store
            .select(table, &Query::only(column, args.filter.clone().unwrap_or_default()))
            .await?;
        let mut buckets: BTreeMap<NaiveDateTime, usize> = BTreeMap::new();
        for row in &rows {
            let bucket = row
                .get(column)
                .and_then(Value::as_str)
                .and_then(parse_timestamp)
                .and_then(|t| truncate(t, granularity));
            if let Some(bucket) = bucket {
                *buckets.entry(bucket).or_default() += 1;
            }
        }
        Ok(Value::Array(
            buckets
                .into_iter()
                .map(|(bucket, count)| {
                    json!({"bucket": bucket.format("%Y-%m-%d %H:%M:%S").to_string(), "count": count})
                })
                .collect(),
        ))
    }

    /// Inner join on one key per side. Output columns are named
    /// `{table}.{column}`.
    async fn join_select(&self, args: &TableArgs) -> Result<Value> {
        let left_table = args.left_table.as_deref().ok_or(ToolsError::MissingField("left_table"))?;
        let right_table = args.right_table.as_deref().ok_or(ToolsError::MissingField("right_table"))?;
        let left_key = args.left_key.as_deref().ok_or(ToolsError::MissingField("left_key"))?;
        let right_key = args.right_key.as_deref().ok_or(ToolsError::MissingField("right_key"))?;

        let (mut left_filter, mut right_filter) = (Filter::new(), Filter::new());
        for (key, value) in args.filter.iter().flatten() {
            match split_side(key)? {
                (Side::Left, column) => left_filter.insert(column.to_string(), value.clone()),
                (Side::Right, column) => right_filter.insert(column.to_string(), value.clone()),
            };
        }
        let projection = args
            .projection()?
            .map(|columns| {
                columns
                    .iter()
                    .map(|c| split_side(c).map(|(side, name)| (side, name.to_string())))
                    .collect::<Result<Vec<_>>>()
            })
            .transpose()?;

        let left_rows = self.store.select(left_table, &Query::filtered(left_filter)).await?;
        let right_rows = self.store.select(right_table, &Query::filtered(right_filter)).await?;
        let left_columns = self.store.describe(left_table).await?;
        let right_columns = self.store.describe(right_table).await?;
        let known = |side: Side, name: &str| -> Result<()> {
            let (table, columns) = match side {
                Side::Left => (left_table, &left_columns),
                Side::Right => (right_table, &right_columns),
            };
            if columns.iter().any(|c| c.name == name) {
                Ok(())
            } else {
                Err(ToolsError::NoSuchColumn {
                    table: table.to_string(),
                    column: name.to_string(),
                })
            }
        };
        known(Side::Left, left_key)?;
        known(Side::Right, right_key)?;
        for (side, name) in projection.iter().flatten() {
            known(*side, name.as_str())?;
        }

        let mut joined = Vec::new();
        for left in &left_rows {
            let Some(key) = left.get(left_key).filter(|v| !v.is_null()) else {
                continue;
            };
            for right in right_rows
                .iter()
                .filter(|r| r.get(right_key).is_some_and(|k| same_value(key, k)))
            {
                let pick = |side: Side, name: &str| -> (String, Value) {
                    let (table, row) = match side {
                        Side::Left => (left_table, left),
                        Side::Right => (right_table, right),
                    };
                    (
                        format!("{table}.{name}"),
                        row.get(name).cloned().unwrap_or(Value::Null),
                    )
                };
                let row: Row = match &projection {
                    Some(columns) => columns.iter().map(|(side, name)| pick(*side, name.as_str())).collect(),
                    None => left_columns
                        .iter()
                        .map(|c| pick(Side::Left, &c.name))
                        .chain(right_columns.iter().map(|c| pick(Side::Right, &c.name)))
                        .collect(),
                };
                joined.push(Value::Object(row));
            }
        }
        joined.truncate(args.limit.unwrap_or(usize::MAX));
        Ok(Value::Array(joined))
    }
}

/// Percentage rounded to two decimals
#[allow(clippy::cast_precision_loss)]
fn share(count: usize, total: usize) -> f64 {
    (count as f64 / total as f64 * 10_000.0).round() / 100.0
}

/// sum/avg/min/max over the non-null values of one column; null when empty
#[allow(clippy::cast_precision_loss)]
fn fold_values(operation: &str, column: &str, values: &[&Value]) -> Result<Value> {
    if !matches!(operation, "sum" | "avg" | "min" | "max") {
        return Err(ToolsError::Config(format!(
            "unsupported aggregate '{operation}'; allowed: count, sum, avg, min, max"
        )));
    }
    if values.is_empty() {
        return Ok(Value::Null);
    }
    let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
    if numbers.len() != values.len() {
        return Err(ToolsError::InvalidValue {
            column: column.to_string(),
            message: format!("{operation} needs a numeric column"),
        });
    }

    let integers: Option<Vec<i64>> = values.iter().map(|v| v.as_i64()).collect();
    Ok(match (operation, integers) {
        ("sum", Some(ints)) => json!(ints.iter().sum::<i64>()),
        ("sum", None) => json!(numbers.iter().sum::<f64>()),
        ("avg", _) => json!(numbers.iter().sum::<f64>() / numbers.len() as f64),
        ("min", Some(ints)) => json!(ints.iter().min()),
        ("max", Some(ints)) => json!(ints.iter().max()),
        ("min", None) => json!(numbers.iter().copied().fold(f64::INFINITY, f64::min)),
        _ => json!(numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
    })
}

/// Start of the bucket holding `t`; weeks start on Monday
fn truncate(t: NaiveDateTime, granularity: &str) -> Option<NaiveDateTime> {
    let date = t.date();
    let day = match granularity {
        "hour" => return date.and_hms_opt(t.hour(), 0, 0),
        "day" => date,
        "week" => date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))?,
        "month" => date.with_day(1)?,
        "year" => NaiveDate::from_ymd_opt(date.year(), 1, 1)?,
        _ => return None,
    };
    day.and_hms_opt(0, 0, 0)
}

#[async_trait]
impl ToolBackend for TableTool {
    fn name(&self) -> &str {
        TABLE_TOOL
    }

    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
        Ok(vec![Self::spec()])
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> anyhow::Result<Value> {
        if name != TABLE_TOOL {
            return Err(ToolsError::UnknownTool(name.to_string()).into());
        }
        Ok(self.execute(arguments).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::tool::ToolRegistry;

    async fn run(tool: &TableTool, args: Value) -> Value {
        tool.execute(&args).await.unwrap()
    }

    async fn users() -> TableTool {
        let tool = TableTool::in_memory();
        run(
            &tool,
            json!({
                "action": "create_table",
                "table": "users",
                "columns": [
                    {"name": "id", "type": "integer", "pk": true},
                    {"name": "email", "type": "text", "nullable": false},
                    {"name": "status", "type": "string", "default": "active"},
                    {"name": "age", "type": "int"}
                ]
            }),
        )
        .await;
        run(
            &tool,
            json!({"action": "insert", "table": "users", "rows": [
                {"email": "a@x.io", "age": 30},
                {"email": "b@x.io", "status": "blocked", "age": 40},
                {"email": "c@x.io", "age": 20}
            ]}),
        )
        .await;
        tool
    }

    #[tokio::test]
    async fn test_create_insert_select() {
        let tool = users().await;

        let rows = run(
            &tool,
            json!({"action": "select", "table": "users", "columns": ["id", "email"], "where": {"status": "active"}}),
        )
        .await;
        assert_eq!(
            rows,
            json!([{"id": 1, "email": "a@x.io"}, {"id": 3, "email": "c@x.io"}])
        );

        let page = run(
            &tool,
            json!({"action": "select", "table": "users", "columns": ["id"], "limit": 1, "offset": 1}),
        )
        .await;
        assert_eq!(page, json!([{"id": 2}]));

        let created = run(&tool, json!({"action": "create_table", "table": "users"})).await;
        assert_eq!(created["columns"], json!(["id", "email", "status", "age"]));
    }

    #[tokio::test]
    async fn test_create_without_columns_gets_id() {
        let tool = TableTool::in_memory();
        let created = run(&tool, json!({"action": "create_table", "table": "notes"})).await;
        assert_eq!(created, json!({"created": "notes", "columns": ["id"]}));

        run(&tool, json!({"action": "insert", "table": "notes", "values": {}})).await;
        let tables = run(&tool, json!({"action": "list_tables"})).await;
        assert_eq!(tables, json!([{"table": "notes", "rows": 1}]));
    }

    #[tokio::test]
    async fn test_insert_is_all_or_nothing() {
        let tool = users().await;

        let err = tool
            .execute(&json!({"action": "insert", "table": "users", "rows": [
                {"email": "d@x.io"},
                {"email": null}
            ]}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::InvalidValue { ref column, .. } if column == "email"));

        let err = tool
            .execute(&json!({"action": "insert", "table": "users", "values": {"id": 2, "email": "e@x.io"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::Conflict(_)));

        let err = tool
            .execute(&json!({"action": "insert", "table": "users", "values": {"email": "f@x.io", "age": "old"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::InvalidValue { ref column, .. } if column == "age"));

        let count = run(&tool, json!({"action": "aggregate", "table": "users"})).await;
        assert_eq!(count["value"], 3);
    }

    #[tokio::test]
    async fn test_update_and_delete_count_rows() {
        let tool = users().await;

        let updated = run(
            &tool,
            json!({"action": "update", "table": "users", "where": {"status": "active"}, "values": {"status": "gone"}}),
        )
        .await;
        assert_eq!(updated, json!({"updated": 2}));

        let deleted = run(&tool, json!({"action": "delete", "table": "users", "where": {"status": "gone"}})).await;
        assert_eq!(deleted, json!({"deleted": 2}));

        let err = tool
            .execute(&json!({"action": "update", "table": "users", "values": {"id": 99, "nope": 1}}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::NoSuchColumn { ref column, .. } if column == "nope"));
    }

    #[tokio::test]
    async fn test_schema_changes() {
        let tool = users().await;

        let added = run(
            &tool,
            json!({"action": "add_column", "table": "users", "column": "score", "data_type": "float", "default": 1.5}),
        )
        .await;
        assert_eq!(added["added"], true);
        let again = run(&tool, json!({"action": "add_column", "table": "users", "column": "score"})).await;
        assert_eq!(again["added"], false);

        run(
            &tool,
            json!({"action": "rename_column", "table": "users", "old_name": "score", "new_name": "rank"}),
        )
        .await;
        let rows = run(&tool, json!({"action": "select", "table": "users", "columns": ["rank"], "limit": 1})).await;
        assert_eq!(rows, json!([{"rank": 1.5}]));

        let dropped = run(&tool, json!({"action": "drop_column", "table": "users", "column": "rank"})).await;
        assert_eq!(dropped["dropped"], true);

        let described = run(&tool, json!({"action": "describe_table", "table": "users"})).await;
        let columns = described["columns"].as_array().unwrap();
        assert_eq!(columns.len(), 4);
        assert_eq!(columns[0], json!({"name": "id", "type": "integer", "nullable": false, "primary_key": true}));
        assert_eq!(columns[2]["default"], "active");

        let err = tool
            .execute(&json!({"action": "add_column", "table": "users", "column": "must", "nullable": false}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::InvalidValue { .. }));

        let err = tool
            .execute(&json!({"action": "add_column", "table": "users", "column": "x", "data_type": "blob"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn test_aggregate_and_group_by() {
        let tool = users().await;

        let sum = run(&tool, json!({"action": "aggregate", "table": "users", "column": "age", "operation": "sum"})).await;
        assert_eq!(sum["value"], 90);
        let avg = run(&tool, json!({"action": "aggregate", "table": "users", "field": "age", "agg": "avg"})).await;
        assert_eq!(avg["value"], 30.0);
        let max = run(
            &tool,
            json!({"action": "aggregate", "table": "users", "column": "age", "operation": "max", "where": {"status": "active"}}),
        )
        .await;
        assert_eq!(max["value"], 30);

        let err = tool
            .execute(&json!({"action": "aggregate", "table": "users", "column": "email", "operation": "sum"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::InvalidValue { .. }));

        let groups = run(&tool, json!({"action": "group_by", "table": "users", "column": "status"})).await;
        assert_eq!(groups["total"], 3);
        assert_eq!(groups["rows"][0], json!({"value": "active", "count": 2, "percent": 66.67}));
        assert_eq!(groups["rows"][1], json!({"value": "blocked", "count": 1, "percent": 33.33}));

        let top = run(
            &tool,
            json!({"action": "group_by", "table": "users", "column": "status", "top_n": 1, "percent": false}),
        )
        .await;
        assert_eq!(top["rows"], json!([{"value": "active", "count": 2}]));
    }

    #[tokio::test]
    async fn test_time_series_buckets() {
        let tool = TableTool::in_memory();
        run(
            &tool,
            json!({"action": "create_table", "table": "events", "columns": [
                {"name": "id", "type": "integer", "pk": true},
                {"name": "created_at", "type": "timestamp"}
            ]}),
        )
        .await;
        run(
            &tool,
            json!({"action": "insert", "table": "events", "rows": [
                {"created_at": "2024-03-01T10:15:00Z"},
                {"created_at": "2024-03-01 18:00:00"},
                {"created_at": "2024-03-03T09:00:00Z"}
            ]}),
        )
        .await;

        let days = run(&tool, json!({"action": "time_series", "table": "events"})).await;
        assert_eq!(
            days,
            json!([
                {"bucket": "2024-03-01 00:00:00", "count": 2},
                {"bucket": "2024-03-03 00:00:00", "count": 1}
            ])
        );

        let months = run(&tool, json!({"action": "time_series", "table": "events", "granularity": "month"})).await;
        assert_eq!(months, json!([{"bucket": "2024-03-01 00:00:00", "count": 3}]));

        let err = tool
            .execute(&json!({"action": "insert", "table": "events", "values": {"created_at": "yesterday"}}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_join_select() {
        let tool = users().await;
        run(
            &tool,
            json!({"action": "create_table", "table": "orders", "columns": [
                {"name": "id", "type": "integer", "pk": true},
                {"name": "user_id", "type": "integer"},
                {"name": "total", "type": "float"}
            ]}),
        )
        .await;
        run(
            &tool,
            json!({"action": "insert", "table": "orders", "rows": [
                {"user_id": 1, "total": 9.5},
                {"user_id": 1, "total": 3.0},
                {"user_id": 2, "total": 7.25}
            ]}),
        )
        .await;

        let rows = run(
            &tool,
            json!({
                "action": "join_select",
                "left_table": "users",
                "right_table": "orders",
                "left_key": "id",
                "right_key": "user_id",
                "columns": ["left.email", "right.total"],
                "where": {"left.status": "active"}
            }),
        )
        .await;
        assert_eq!(
            rows,
            json!([
                {"users.email": "a@x.io", "orders.total": 9.5},
                {"users.email": "a@x.io", "orders.total": 3.0}
            ])
        );

        let limited = run(
            &tool,
            json!({"action": "join_select", "left_table": "users", "right_table": "orders",
                   "left_key": "id", "right_key": "user_id", "limit": 1}),
        )
        .await;
        assert_eq!(limited.as_array().unwrap().len(), 1);
        assert_eq!(limited[0]["orders.user_id"], 1);
        assert_eq!(limited[0]["users.age"], 30);

        let err = tool
            .execute(&json!({"action": "join_select", "left_table": "users", "right_table": "orders",
                            "left_key": "id", "right_key": "owner"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::NoSuchColumn { ref table, .. } if table == "orders"));
    }

    #[tokio::test]
    async fn test_memory_store_direct() {
        let store = MemoryTableStore::new();
        store
            .create_table(
                "tags",
                vec![
                    ColumnDef::new("name", ColumnType::Text).primary_key(),
                    ColumnDef::new("weight", ColumnType::Integer).not_null().with_default(json!(1)),
                ],
            )
            .await
            .unwrap();

        let mut row = Row::new();
        row.insert("name".into(), json!("rust"));
        assert_eq!(store.insert("tags", vec![row.clone()]).await.unwrap(), 1);
        assert!(matches!(
            store.insert("tags", vec![row]).await,
            Err(ToolsError::Conflict(_))
        ));

        let mut filter = Filter::new();
        filter.insert("weight".into(), json!(1.0));
        let rows = store.select("tags", &Query::filtered(filter)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(store.list_tables().await.unwrap(), vec![("tags".to_string(), 1)]);
        assert!(store.drop_table("tags").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_table_and_bad_action() {
        let tool = TableTool::in_memory();
        let err = tool
            .execute(&json!({"action": "select", "table": "ghost"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolsError::NoSuchTable(ref t) if t == "ghost"));

        let err = tool.execute(&json!({"action": "vacuum"})).await.unwrap_err();
        assert!(matches!(err, ToolsError::UnsupportedTableAction(_)));

        let dropped = run(&tool, json!({"action": "drop_table", "table": "ghost"})).await;
        assert_eq!(dropped["dropped"], false);
    }

    #[tokio::test]
    async fn test_registered_through_registry() {
        let registry = ToolRegistry::new();
        let count = registry
            .register_backend(Arc::new(TableTool::in_memory()))
            .await
            .unwrap();
        assert_eq!(count, 1);

        let result = registry
            .invoke("table", json!({"action": "create_table", "table": "t"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["created"], "t");

        // rejected by the schema before reaching the store
        assert!(registry.invoke("table", json!({"action": "truncate"})).await.is_err());
        assert!(registry.invoke("table", json!({"action": "select", "limit": "ten"})).await.is_err());
    }
}
