//! SQLite persistence for context snapshots and alert history.
//!
//! The state machine hands periodic `StrategyContext` snapshots to a
//! `ContextSink`; this store keeps them (plus the alert stream) for crash
//! recovery and the `status` CLI subcommand. Read-only from the core's
//! perspective: nothing in the decision path ever loads from here.

use anyhow::{Context as _, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use crate::engine::{AlertEvent, StrategyContext};

/// The task-persistence seam consumed by the state machine.
pub trait ContextSink: Send + Sync {
    fn persist_context(&self, context: &StrategyContext) -> Result<()>;
    fn persist_alert(&self, alert: &AlertEvent) -> Result<()>;
}

/// SQLite-backed context store.
pub struct ContextStore {
    conn: Mutex<Connection>,
}

impl ContextStore {
    /// Open (or create) the store at `db_path`, initializing the schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("persistence lock poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS context_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                saved_at TEXT NOT NULL,
                state TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                raised_at TEXT NOT NULL,
                payload TEXT NOT NULL
            );",
        )
        .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Most recently persisted context, if any.
    pub fn load_latest_context(&self) -> Result<Option<StrategyContext>> {
        let conn = self.conn.lock().expect("persistence lock poisoned");
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM context_snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query latest context")?;

        match payload {
            Some(json) => {
                let context =
                    serde_json::from_str(&json).context("Failed to deserialize context")?;
                Ok(Some(context))
            }
            None => Ok(None),
        }
    }

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertEvent>> {
        let conn = self.conn.lock().expect("persistence lock poisoned");
        let mut stmt = conn
            .prepare("SELECT payload FROM alerts ORDER BY id DESC LIMIT ?1")
            .context("Failed to prepare alert query")?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))
            .context("Failed to query alerts")?;

        let mut alerts = Vec::new();
        for row in rows {
            let json = row.context("Failed to read alert row")?;
            alerts.push(serde_json::from_str(&json).context("Failed to deserialize alert")?);
        }
        Ok(alerts)
    }
}

impl ContextSink for ContextStore {
    fn persist_context(&self, context: &StrategyContext) -> Result<()> {
        let payload = serde_json::to_string(context).context("Failed to serialize context")?;
        let conn = self.conn.lock().expect("persistence lock poisoned");
        conn.execute(
            "INSERT INTO context_snapshots (saved_at, state, payload) VALUES (?1, ?2, ?3)",
            params![
                context.updated_at.to_rfc3339(),
                context.state.to_string(),
                payload
            ],
        )
        .context("Failed to insert context snapshot")?;
        debug!(state = %context.state, "Context snapshot persisted");
        Ok(())
    }

    fn persist_alert(&self, alert: &AlertEvent) -> Result<()> {
        let payload = serde_json::to_string(alert).context("Failed to serialize alert")?;
        let conn = self.conn.lock().expect("persistence lock poisoned");
        conn.execute(
            "INSERT INTO alerts (raised_at, payload) VALUES (?1, ?2)",
            params![chrono::Utc::now().to_rfc3339(), payload],
        )
        .context("Failed to insert alert")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ArbState;
    use rust_decimal_macros::dec;

    #[test]
    fn test_context_round_trip() {
        let store = ContextStore::in_memory().unwrap();
        let context = StrategyContext::new("BTCUSDT").with_trade(dec!(3.5));

        store.persist_context(&context).unwrap();
        let loaded = store.load_latest_context().unwrap().unwrap();

        assert_eq!(loaded.symbol, "BTCUSDT");
        assert_eq!(loaded.total_trades, 1);
        assert_eq!(loaded.realized_pnl, dec!(3.5));
    }

    #[test]
    fn test_latest_context_wins() {
        let store = ContextStore::in_memory().unwrap();
        let first = StrategyContext::new("BTCUSDT");
        let second = first.with_state(ArbState::MonitoringSpreads);

        store.persist_context(&first).unwrap();
        store.persist_context(&second).unwrap();

        let loaded = store.load_latest_context().unwrap().unwrap();
        assert_eq!(loaded.state, ArbState::MonitoringSpreads);
    }

    #[test]
    fn test_empty_store_yields_none() {
        let store = ContextStore::in_memory().unwrap();
        assert!(store.load_latest_context().unwrap().is_none());
    }

    #[test]
    fn test_alert_history() {
        let store = ContextStore::in_memory().unwrap();
        store
            .persist_alert(&AlertEvent::PositionSizeAlert {
                net_delta_value: dec!(25000),
                threshold: dec!(20000),
            })
            .unwrap();

        let alerts = store.recent_alerts(10).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(alerts[0], AlertEvent::PositionSizeAlert { .. }));
    }
}
