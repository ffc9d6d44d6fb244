//! Record store tool
//!
//! A single `db` tool doing CRUD over short text records. Storage sits behind
//! [`RecordStore`]; the in-memory store is what the server ships with.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use agent_core::tool::{ParamType, ParameterSchema, ToolBackend, ToolSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Result, ToolsError};

pub const DB_TOOL: &str = "db";

/// Stored record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub data: String,
}

/// Storage for the `db` tool
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn add(&self, data: String) -> Result<Record>;

    /// Number of records changed (0 or 1)
    async fn update(&self, id: u64, data: String) -> Result<u64>;

    /// Number of records removed (0 or 1)
    async fn delete(&self, id: u64) -> Result<u64>;

    /// All records in id order
    async fn list(&self) -> Result<Vec<Record>>;
}

#[derive(Default)]
struct Table {
    next_id: u64,
    rows: BTreeMap<u64, String>,
}

/// In-memory record store, ids start at 1
#[derive(Default)]
pub struct MemoryRecordStore {
    table: RwLock<Table>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn add(&self, data: String) -> Result<Record> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        table.next_id += 1;
        let id = table.next_id;
        table.rows.insert(id, data.clone());
        Ok(Record { id, data })
    }

    async fn update(&self, id: u64, data: String) -> Result<u64> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        Ok(match table.rows.get_mut(&id) {
            Some(row) => {
                *row = data;
                1
            }
            None => 0,
        })
    }

    async fn delete(&self, id: u64) -> Result<u64> {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        Ok(u64::from(table.rows.remove(&id).is_some()))
    }

    async fn list(&self) -> Result<Vec<Record>> {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        Ok(table
            .rows
            .iter()
            .map(|(id, data)| Record {
                id: *id,
                data: data.clone(),
            })
            .collect())
    }
}

/// Arguments of the `db` tool
#[derive(Debug, Deserialize)]
struct DbArgs {
    action: String,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    data: Option<String>,
}

/// The `db` tool over any [`RecordStore`]
pub struct DbTool {
    store: Arc<dyn RecordStore>,
}

impl DbTool {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRecordStore::new()))
    }

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            DB_TOOL,
            "Store and query short text records. Actions: add, update, delete, list.",
        )
        .param(
            ParameterSchema::required("action", ParamType::String, "Operation to perform")
                .with_enum(vec![json!("add"), json!("update"), json!("delete"), json!("list")]),
        )
        .param(ParameterSchema::optional(
            "id",
            ParamType::Integer,
            "Record id (update, delete)",
        ))
        .param(ParameterSchema::optional(
            "data",
            ParamType::String,
            "Record text (add, update)",
        ))
    }

    /// Run one action against the store
    pub async fn execute(&self, arguments: &Value) -> Result<Value> {
        let args: DbArgs = serde_json::from_value(arguments.clone())
            .map_err(|e| ToolsError::Config(format!("invalid db arguments: {e}")))?;
        tracing::debug!(action = %args.action, id = ?args.id, "DB action");

        match args.action.as_str() {
            "add" => {
                let record = self.store.add(args.data.unwrap_or_default()).await?;
                Ok(json!({"id": record.id, "data": record.data}))
            }
            "update" => {
                let id = args.id.ok_or(ToolsError::MissingField("id"))?;
                let updated = self.store.update(id, args.data.unwrap_or_default()).await?;
                Ok(json!({"updated": updated}))
            }
            "delete" => {
                let id = args.id.ok_or(ToolsError::MissingField("id"))?;
                let deleted = self.store.delete(id).await?;
                Ok(json!({"deleted": deleted}))
            }
            "list" => {
                let records = self.store.list().await?;
                Ok(serde_json::to_value(records).unwrap_or_else(|_| json!([])))
            }
            other => Err(ToolsError::UnsupportedAction(other.to_string())),
        }
    }
}

#[async_trait]
impl ToolBackend for DbTool {
    fn name(&self) -> &str {
        DB_TOOL
    }

    async fn list_tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
        Ok(vec![Self::spec()])
    }

    async fn call_tool(&self, name: &str, arguments: &Value) -> anyhow::Result<Value> {
        if name != DB_TOOL {
            return Err(ToolsError::UnknownTool(name.to_string()).into());
        }
        Ok(self.execute(arguments).await?)
    }
}
