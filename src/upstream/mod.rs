//! Paginated upstream row source, backed by PostgreSQL.
//!
//! Grounded in the teacher crate's direct-driver Postgres path
//! (`repository::migration_postgres::copy`), which already opens a raw
//! `tokio_postgres::Client` and spawns its connection-driver task rather than
//! going through Diesel's async pool — appropriate here because the upstream
//! connection is a single long-lived cursor, not a pool of short queries.

use serde_json::{Map, Value};
use thiserror::Error;
use tokio_postgres::{Client, NoTls};

use crate::config::PgSettings;

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("tls error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, UpstreamError>;

/// One row pulled from the upstream source: an opaque identifier plus the
/// rest of the row, serialized verbatim as a JSON object.
#[derive(Debug, Clone)]
pub struct UpstreamRow {
    pub id: i64,
    pub payload: Value,
}

/// A paginated cursor over the configured upstream table, ordered by `id`
/// ascending for stable pagination.
pub struct PgUpstream {
    client: Client,
    table: String,
}

impl PgUpstream {
    /// Connect to Postgres and spawn the connection-driver task.
    pub async fn connect(settings: &PgSettings) -> Result<Self> {
        let conn_str = settings.connection_string();
        let client = if settings.use_tls {
            let tls = tls_connector()?;
            let (client, connection) = tokio_postgres::connect(&conn_str, tls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!("postgres connection error: {e}");
                }
            });
            client
        } else {
            let (client, connection) = tokio_postgres::connect(&conn_str, NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::error!("postgres connection error: {e}");
                }
            });
            client
        };

        Ok(Self {
            client,
            table: settings.table.clone(),
        })
    }

    /// Fetch up to `limit` rows starting at `offset`, ordered by `id`.
    /// Returns an empty vec once the table is exhausted.
    pub async fn fetch_page(&self, limit: i64, offset: i64) -> Result<Vec<UpstreamRow>> {
        // Table name is operator-configured (PG_TABLE), never user input, and
        // the driver has no parameter slot for identifiers.
        let query = format!(
            "SELECT * FROM {} ORDER BY id ASC LIMIT $1 OFFSET $2",
            self.table
        );
        let rows = self.client.query(&query, &[&limit, &offset]).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut id = None;
            let mut payload = Map::new();

            for (idx, column) in row.columns().iter().enumerate() {
                let name = column.name();
                let value = column_to_json(&row, idx);
                if name == "id" {
                    id = value.as_i64();
                } else {
                    payload.insert(name.to_string(), value);
                }
            }

            out.push(UpstreamRow {
                id: id.unwrap_or_default(),
                payload: Value::Object(payload),
            });
        }

        Ok(out)
    }
}

/// Best-effort conversion of a Postgres column value to JSON, tried in order
/// of the types a typical source table would use.
fn column_to_json(row: &tokio_postgres::Row, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<_, Option<i64>>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<i32>>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<f64>>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<bool>>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<String>>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx) {
        return v.map(|dt| Value::from(dt.to_rfc3339())).unwrap_or(Value::Null);
    }
    Value::Null
}

fn tls_connector() -> Result<tokio_postgres_rustls::MakeRustlsConnect> {
    let result = rustls_native_certs::load_native_certs();
    for e in &result.errors {
        tracing::warn!("error loading system certificate: {e}");
    }

    let mut root_store = rustls::RootCertStore::empty();
    let mut loaded = 0u32;
    for cert in result.certs {
        match root_store.add(cert) {
            Ok(()) => loaded += 1,
            Err(e) => tracing::warn!("skipping invalid system certificate: {e}"),
        }
    }
    if loaded == 0 {
        return Err(UpstreamError::Tls("no valid system certificates found".to_string()));
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(tokio_postgres_rustls::MakeRustlsConnect::new(config))
}
