/// Database operations for publishing readings and polling the pump flag
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::database::connection::connect;
use crate::database::{CloudStore, StoreValue, TIMESTAMP_PATH};
use crate::error::RigError;
use crate::models::{Channel, CycleReport};

const CREATE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS rig_state (
    path TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)";

const UPSERT_VALUE: &str = "INSERT INTO rig_state(path, value, updated_at)
     VALUES ($1, $2, $3)
     ON CONFLICT (path) DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at";

const SELECT_VALUE: &str = "SELECT value FROM rig_state WHERE path = $1";

/// Build the key-value writes for one cycle
///
/// Temperature is only published when the probe was actually read; a
/// fallback constant is never written as a measurement.
pub fn readings_payload(report: &CycleReport) -> Vec<(String, StoreValue)> {
    let mut values = vec![
        (Channel::Ph.path().to_string(), StoreValue::Float(report.ph.value)),
        (Channel::Ec.path().to_string(), StoreValue::Float(report.ec.value)),
        (
            Channel::Turbidity.path().to_string(),
            StoreValue::Float(report.turbidity.value),
        ),
    ];
    if report.temperature.measured {
        values.push((
            Channel::Temperature.path().to_string(),
            StoreValue::Float(report.temperature.celsius),
        ));
    }
    values.push((
        TIMESTAMP_PATH.to_string(),
        StoreValue::Int(report.tick_ms as i64),
    ));
    values
}

/// PostgreSQL-backed key-value store
///
/// Opens a connection per operation, like the rest of the rig's database
/// code; the table is created on first use.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    database_url: String,
    schema_ready: Arc<AtomicBool>,
}

impl PostgresStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            schema_ready: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn client(&self) -> Result<tokio_postgres::Client, RigError> {
        let client = connect(&self.database_url).await?;
        if !self.schema_ready.load(Ordering::Acquire) {
            client.batch_execute(CREATE_SCHEMA).await?;
            self.schema_ready.store(true, Ordering::Release);
            info!("Database schema ready");
        }
        Ok(client)
    }
}

impl CloudStore for PostgresStore {
    async fn set_values(&self, values: &[(String, StoreValue)]) -> Result<(), RigError> {
        let mut client = self.client().await?;
        let transaction = client.transaction().await?;
        let now = OffsetDateTime::now_utc();

        for (path, value) in values {
            let text = value.to_string();
            transaction
                .execute(UPSERT_VALUE, &[path, &text, &now])
                .await?;
        }

        transaction.commit().await?;
        debug!("Stored {} values", values.len());
        Ok(())
    }

    async fn get_flag(&self, path: &str) -> Result<bool, RigError> {
        let client = self.client().await?;
        let row = client.query_opt(SELECT_VALUE, &[&path]).await?;
        Ok(match row {
            Some(row) => {
                let value: String = row.get(0);
                value.trim().eq_ignore_ascii_case("true")
            }
            None => false,
        })
    }
}
