//! # agent-tools
//!
//! Tool collaborators plugged into the agent's `ToolRegistry`.
//!
//! - **echo**: built-in, returns its text
//! - **db**: CRUD over short text records ([`store`])
//! - **table**: typed tables with filtered reads and simple analytics ([`table`])
//! - **zapier_\***, **n8n_\***: remote automation actions ([`connector`])
//!
//! ## Usage
//!
//! ```rust,ignore
//! let tools = Arc::new(ToolRegistry::new());
//! agent_tools::install_defaults(
//!     &tools,
//!     Arc::new(MemoryRecordStore::new()),
//!     Arc::new(MemoryTableStore::new()),
//! )
//! .await?;
//! agent_tools::install_connectors(&tools, ConnectorKind::ALL.map(HttpConnector::from_env)).await;
//! ```

pub mod builtin;
pub mod connector;
pub mod error;
pub mod store;
pub mod table;

use std::sync::Arc;

use agent_core::tool::ToolRegistry;

pub use builtin::{echo_spec, register_echo};
pub use connector::{ConnectorConfig, ConnectorKind, HttpConnector};
pub use error::{Result, ToolsError};
pub use store::{DbTool, MemoryRecordStore, Record, RecordStore};
pub use table::{MemoryTableStore, TableStore, TableTool};

/// Register `echo`, the `db` tool over `records` and the `table` tool over
/// `tables`
pub async fn install_defaults(
    registry: &ToolRegistry,
    records: Arc<dyn RecordStore>,
    tables: Arc<dyn TableStore>,
) -> agent_core::Result<()> {
    register_echo(registry)?;
    registry.register_backend(Arc::new(DbTool::new(records))).await?;
    registry.register_backend(Arc::new(TableTool::new(tables))).await?;
    Ok(())
}

/// Register every connector that is configured and reachable.
/// Failures are logged and the connector skipped. Returns the number of
/// tools added.
pub async fn install_connectors(
    registry: &ToolRegistry,
    connectors: impl IntoIterator<Item = HttpConnector>,
) -> usize {
    let mut added = 0;
    for connector in connectors {
        let kind = connector.kind();
        if !connector.is_configured() {
            tracing::info!(connector = %kind, "No API key, connector disabled");
            continue;
        }
        match registry.register_backend(Arc::new(connector)).await {
            Ok(count) => {
                tracing::info!(connector = %kind, tools = count, "Connector registered");
                added += count;
            }
            Err(e) => tracing::warn!(connector = %kind, error = %e, "Skipping connector"),
        }
    }
    added
}
