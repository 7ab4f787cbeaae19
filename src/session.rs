//! Database session: the registry, a driver and the transaction in use.

use std::future::Future;
use std::sync::Arc;

use tracing::{Level, event};

use crate::connection::ConnectionConfig;
use crate::core::{OrmError, Result, Value};
use crate::driver::{Driver, PgDriver, Transaction};
use crate::migrate::{ReconcileReport, Reconciler};
use crate::model::Model;
use crate::registry::Registry;
use crate::result::QueryResult;
use crate::sql::Statement;

/// Handle every operation runs through.
///
/// Cloning is cheap. A session created by [`Session::begin`] or handed to a
/// [`Session::with_transaction`] closure sends its statements through that
/// transaction; saves made with it join the transaction instead of opening
/// their own.
#[derive(Clone)]
pub struct Session {
    registry: Arc<Registry>,
    driver: Arc<dyn Driver>,
    transaction: Option<Arc<dyn Transaction>>,
}

impl Session {
    pub fn new(registry: Arc<Registry>, driver: Arc<dyn Driver>) -> Self {
        Self {
            registry,
            driver,
            transaction: None,
        }
    }

    /// Connects to Postgres with `config`.
    pub async fn connect(config: &ConnectionConfig, registry: Arc<Registry>) -> Result<Self> {
        config.validate().map_err(OrmError::Config)?;
        let driver = PgDriver::connect(config).await?;
        Ok(Self::new(registry, Arc::new(driver)))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Where statements go: the open transaction, or the driver.
    pub fn executor(&self) -> &dyn Driver {
        match &self.transaction {
            Some(transaction) => transaction.as_driver(),
            None => self.driver.as_ref(),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Opens a transaction and returns a session bound to it.
    pub async fn begin(&self) -> Result<Session> {
        if self.in_transaction() {
            return Err(OrmError::usage("Session is already inside a transaction"));
        }
        let transaction = self.driver.begin().await?;
        event!(Level::DEBUG, "transaction started");
        Ok(Self {
            registry: self.registry.clone(),
            driver: self.driver.clone(),
            transaction: Some(transaction),
        })
    }

    pub async fn commit(&self) -> Result<()> {
        let transaction = self
            .transaction
            .as_ref()
            .ok_or_else(|| OrmError::usage("No active transaction"))?;
        transaction.commit().await?;
        event!(Level::DEBUG, "transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        let transaction = self
            .transaction
            .as_ref()
            .ok_or_else(|| OrmError::usage("No active transaction"))?;
        transaction.rollback().await?;
        event!(Level::DEBUG, "transaction rolled back");
        Ok(())
    }

    /// Runs `op` inside a transaction: committed when it returns `Ok`,
    /// rolled back when it returns `Err`. A session that is already in a
    /// transaction passes itself through and leaves the outcome to its owner.
    ///
    /// Statements must go through the session handed to `op`; the outer
    /// session waits for the connection until the transaction ends.
    pub async fn with_transaction<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.in_transaction() {
            return op(self.clone()).await;
        }

        let tx_session = self.begin().await?;
        let op_result = op(tx_session.clone()).await;
        match op_result {
            Ok(value) => {
                if let Err(err) = tx_session.commit().await {
                    let _ = tx_session.rollback().await;
                    return Err(err);
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx_session.rollback().await {
                    event!(Level::ERROR, error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Static surface of a registered entity.
    pub fn model(&self, name: &str) -> Result<Model<'_>> {
        let descriptor = self.registry.get(name)?;
        Ok(Model::new(self, descriptor))
    }

    /// Creates missing tables, columns and constraints for every registered entity.
    pub async fn sync_schema(&self) -> Result<ReconcileReport> {
        Reconciler::new(self).run().await
    }

    pub async fn query_raw(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        Ok(self.executor().query(sql, params).await?)
    }

    pub async fn execute_raw(&self, sql: &str, params: &[Value]) -> Result<u64> {
        Ok(self.executor().execute(sql, params).await?)
    }

    pub(crate) async fn fetch(&self, statement: &Statement) -> Result<QueryResult> {
        let (sql, params) = statement.to_sql();
        self.query_raw(&sql, &params).await
    }

    pub(crate) async fn run(&self, statement: &Statement) -> Result<u64> {
        let (sql, params) = statement.to_sql();
        self.execute_raw(&sql, &params).await
    }
}
