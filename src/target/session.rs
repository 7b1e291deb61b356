//! Target session
//!
//! Every statement the pipeline runs against the target goes through a
//! [`Session`]. The production session pins one connection so that role
//! switches persist between statements.

use crate::config::TargetSettings;
use crate::error::{statement_error, AppError, AppResult};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, PoolConfig, RecyclingMethod, Runtime};
use std::str::FromStr;
use tokio_postgres::SimpleQueryMessage;
use tracing::{debug, info};

/// One result row, text-typed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at `idx`; `None` for SQL NULL or a missing column
    pub fn get(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    pub fn text(&self, idx: usize) -> AppResult<&str> {
        self.get(idx)
            .ok_or_else(|| AppError::ResultShape(format!("column {} is missing or null", idx)))
    }

    pub fn parse<T: FromStr>(&self, idx: usize) -> AppResult<T> {
        let raw = self.text(idx)?;
        raw.trim()
            .parse()
            .map_err(|_| AppError::ResultShape(format!("column {} has unexpected value {}", idx, raw)))
    }

    pub fn flag(&self, idx: usize) -> AppResult<bool> {
        match self.text(idx)?.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => Ok(true),
            "false" | "f" | "0" | "no" | "n" => Ok(false),
            other => Err(AppError::ResultShape(format!("column {} is not boolean: {}", idx, other))),
        }
    }
}

/// Statement execution against the target
#[async_trait]
pub trait Session: Send + Sync {
    async fn execute(&self, statement: &str) -> AppResult<()>;

    async fn query(&self, statement: &str) -> AppResult<Vec<Row>>;
}

/// Session over a single pooled Postgres wire-protocol connection
///
/// Reaches warehouses (and proxies) that speak the Postgres protocol.
/// Clients for other warehouse drivers implement [`Session`] alongside it.
/// `execute` accepts multi-statement text, so rendered identifiers are
/// screened before they get here.
pub struct PgSession {
    client: deadpool_postgres::Object,
    _pool: deadpool_postgres::Pool,
}

impl PgSession {
    pub async fn connect(settings: &TargetSettings, password: Option<String>) -> AppResult<Self> {
        let params = settings.connection_params()?;

        let mut cfg = Config::new();
        cfg.host = Some(params.host.clone());
        cfg.port = Some(params.port);
        cfg.user = Some(params.user);
        cfg.password = password;
        cfg.dbname = Some(params.dbname);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        // Role switches are session state; everything runs on one connection.
        cfg.pool = Some(PoolConfig::new(1));

        let pool = if settings.tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
            cfg.create_pool(Some(Runtime::Tokio1), tls)
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
        }
        .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))?;

        let client = pool.get().await?;
        info!(
            "Connected to {}:{} (TLS: {})",
            params.host, params.port, settings.tls
        );
        Ok(Self {
            client,
            _pool: pool,
        })
    }
}

#[async_trait]
impl Session for PgSession {
    async fn execute(&self, statement: &str) -> AppResult<()> {
        debug!("execute: {}", statement);
        self.client
            .batch_execute(statement)
            .await
            .map_err(|e| statement_error(statement, e.to_string()))
    }

    async fn query(&self, statement: &str) -> AppResult<Vec<Row>> {
        debug!("query: {}", statement);
        let messages = self
            .client
            .simple_query(statement)
            .await
            .map_err(|e| statement_error(statement, e.to_string()))?;

        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                let values = (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect();
                rows.push(Row::new(values));
            }
        }
        Ok(rows)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let row = Row::new(vec![
            Some("ORDERS".into()),
            None,
            Some(" 42 ".into()),
            Some("true".into()),
        ]);

        assert_eq!(row.text(0).unwrap(), "ORDERS");
        assert!(row.get(1).is_none());
        assert!(row.text(1).is_err());
        assert_eq!(row.parse::<usize>(2).unwrap(), 42);
        assert!(row.flag(3).unwrap());
        assert!(row.flag(0).is_err());
        assert!(row.get(9).is_none());
    }
}
