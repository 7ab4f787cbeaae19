use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::{debug, error, warn};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, NoTls, Row};

use crate::connection::{ConnectionConfig, DEFAULT_SCHEMA};
use crate::core::naming::quote_ident;
use crate::core::{DriverError, Value};
use crate::result::QueryResult;

use super::{Driver, DriverResult, Transaction};

/// Driver over a single tokio-postgres connection.
///
/// Statements are serialized on the connection. While a transaction from
/// [`Driver::begin`] is open it owns the connection, so statements sent
/// through the driver itself wait until the transaction finishes.
#[derive(Clone)]
pub struct PgDriver {
    client: Arc<Mutex<Client>>,
}

impl PgDriver {
    pub async fn connect(config: &ConnectionConfig) -> DriverResult<Self> {
        config.validate().map_err(DriverError::new)?;
        let (client, connection) = config.to_pg_config().connect(NoTls).await.map_err(map_error)?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("postgres connection error: {}", err);
            }
        });

        if config.schema != DEFAULT_SCHEMA {
            let schema = quote_ident(&config.schema);
            client
                .batch_execute(&format!(
                    "CREATE SCHEMA IF NOT EXISTS {schema}; SET search_path TO {schema}"
                ))
                .await
                .map_err(map_error)?;
        }
        debug!("connected to {}", config.to_url());
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client: Arc::new(Mutex::new(client)),
        }
    }
}

#[async_trait]
impl Driver for PgDriver {
    async fn query(&self, sql: &str, params: &[Value]) -> DriverResult<QueryResult> {
        let client = self.client.lock().await;
        run_query(&client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DriverResult<u64> {
        let client = self.client.lock().await;
        run_execute(&client, sql, params).await
    }

    async fn begin(&self) -> DriverResult<Arc<dyn Transaction>> {
        let client = self.client.clone().lock_owned().await;
        debug!("BEGIN");
        client.batch_execute("BEGIN").await.map_err(map_error)?;
        Ok(Arc::new(PgTransaction {
            client: Mutex::new(Some(client)),
        }))
    }
}

/// Transaction holding the connection until commit or rollback.
pub struct PgTransaction {
    client: Mutex<Option<OwnedMutexGuard<Client>>>,
}

impl PgTransaction {
    async fn finish(&self, command: &str) -> DriverResult<()> {
        let client = self
            .client
            .lock()
            .await
            .take()
            .ok_or_else(|| DriverError::new("Transaction already finished"))?;
        debug!("{}", command);
        client.batch_execute(command).await.map_err(map_error)
    }
}

#[async_trait]
impl Driver for PgTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> DriverResult<QueryResult> {
        let slot = self.client.lock().await;
        let client = slot
            .as_ref()
            .ok_or_else(|| DriverError::new("Transaction already finished"))?;
        run_query(client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DriverResult<u64> {
        let slot = self.client.lock().await;
        let client = slot
            .as_ref()
            .ok_or_else(|| DriverError::new("Transaction already finished"))?;
        run_execute(client, sql, params).await
    }

    async fn begin(&self) -> DriverResult<Arc<dyn Transaction>> {
        Err(DriverError::new("Nested transactions are not supported"))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(&self) -> DriverResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> DriverResult<()> {
        self.finish("ROLLBACK").await
    }

    fn as_driver(&self) -> &dyn Driver {
        self
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Some(client) = self.client.get_mut().take() else {
            return;
        };
        warn!("transaction dropped while open, rolling back");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = client.batch_execute("ROLLBACK").await {
                    error!("rollback of dropped transaction failed: {}", err);
                }
            });
        }
    }
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

async fn run_query(client: &Client, sql: &str, params: &[Value]) -> DriverResult<QueryResult> {
    debug!("{} {:?}", sql, params);
    let statement = client.prepare(sql).await.map_err(map_error)?;
    let columns = statement
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();
    let rows = client
        .query(&statement, &bind(params))
        .await
        .map_err(map_error)?;
    let rows = rows.iter().map(decode_row).collect::<DriverResult<Vec<_>>>()?;
    Ok(QueryResult::new(columns, rows))
}

async fn run_execute(client: &Client, sql: &str, params: &[Value]) -> DriverResult<u64> {
    debug!("{} {:?}", sql, params);
    client.execute(sql, &bind(params)).await.map_err(map_error)
}

fn map_error(err: tokio_postgres::Error) -> DriverError {
    match err.as_db_error() {
        Some(db) => {
            let mapped = DriverError::new(db.message()).with_code(db.code().code());
            match db.constraint() {
                Some(constraint) => mapped.with_constraint(constraint),
                None => mapped,
            }
        }
        None => DriverError::new(err.to_string()),
    }
}

fn decode_row(row: &Row) -> DriverResult<Vec<Value>> {
    (0..row.len()).map(|index| decode(row, index)).collect()
}

fn decode(row: &Row, index: usize) -> DriverResult<Value> {
    let ty = row.columns()[index].type_().clone();
    let decoded = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(index).map(|v| v.map(Value::Boolean)),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(index)
            .map(|v| v.map(|i| Value::Integer(i64::from(i)))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(index)
            .map(|v| v.map(|i| Value::Integer(i64::from(i)))),
        Type::INT8 => row.try_get::<_, Option<i64>>(index).map(|v| v.map(Value::Integer)),
        Type::OID => row
            .try_get::<_, Option<u32>>(index)
            .map(|v| v.map(|i| Value::Integer(i64::from(i)))),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(index)
            .map(|v| v.map(|f| Value::Float(f64::from(f)))),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(index).map(|v| v.map(Value::Float)),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(index)
            .map(|v| v.map(Value::Date)),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(index)
            .map(|v| v.map(|d| Value::Date(Utc.from_utc_datetime(&d)))),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(index).map(|v| {
            v.and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| Value::Date(Utc.from_utc_datetime(&d)))
        }),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<JsonValue>>(index)
            .map(|v| v.map(Value::Json)),
        _ => row.try_get::<_, Option<String>>(index).map(|v| v.map(Value::Text)),
    };
    decoded.map(|v| v.unwrap_or(Value::Null)).map_err(map_error)
}

type BoxError = Box<dyn Error + Sync + Send>;

fn unsupported(value: &Value, ty: &Type) -> BoxError {
    format!("cannot bind {} to a parameter of type {}", value.type_name(), ty).into()
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT8 => i.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                    i.to_string().to_sql(ty, out)
                }
                Type::JSON | Type::JSONB => JsonValue::from(*i).to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 if f.fract() == 0.0 => {
                    Value::Integer(*f as i64).to_sql(ty, out)
                }
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::UNKNOWN => f.to_string().to_sql(ty, out),
                Type::JSON | Type::JSONB => JsonValue::from(*f).to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
            Value::Text(s) => match *ty {
                Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                    s.as_str().to_sql(ty, out)
                }
                Type::JSON | Type::JSONB => JsonValue::String(s.clone()).to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
            Value::Boolean(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::JSON | Type::JSONB => JsonValue::Bool(*b).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => b.to_string().to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
            Value::Date(d) => match *ty {
                Type::TIMESTAMPTZ => d.to_sql(ty, out),
                Type::TIMESTAMP => d.naive_utc().to_sql(ty, out),
                Type::DATE => d.date_naive().to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => d.to_rfc3339().to_sql(ty, out),
                Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
            Value::Json(j) => match *ty {
                Type::JSON | Type::JSONB => j.to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => j.to_string().to_sql(ty, out),
                _ => Err(unsupported(self, ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
