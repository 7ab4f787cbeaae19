//! Scripted in-process driver: records every statement and answers with
//! whatever the test's responder returns.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docrel::driver::DriverResult;
use docrel::{Driver, DriverError, QueryResult, Registry, Session, Transaction, Value};

pub type Responder = Arc<dyn Fn(&str, &[Value]) -> Option<DriverResult<QueryResult>> + Send + Sync>;

#[derive(Clone)]
pub struct MockDriver {
    log: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
    responder: Responder,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_responder(|_, _| None)
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &[Value]) -> Option<DriverResult<QueryResult>> + Send + Sync + 'static,
    {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        }
    }

    pub fn session(&self, registry: Arc<Registry>) -> Session {
        Session::new(registry, Arc::new(self.clone()))
    }

    /// Every statement so far, including BEGIN/COMMIT/ROLLBACK markers.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }

    pub fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.log.lock().unwrap().clone()
    }

    /// Statements starting with `prefix`, with their parameters.
    pub fn matching(&self, prefix: &str) -> Vec<(String, Vec<Value>)> {
        self.calls()
            .into_iter()
            .filter(|(sql, _)| sql.starts_with(prefix))
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
    }

    fn respond(&self, sql: &str, params: &[Value]) -> DriverResult<QueryResult> {
        self.record(sql, params);
        (self.responder)(sql, params).unwrap_or_else(|| Ok(QueryResult::empty()))
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn query(&self, sql: &str, params: &[Value]) -> DriverResult<QueryResult> {
        self.respond(sql, params)
    }

    /// Affected rows come from a scripted single-value result, default 1.
    async fn execute(&self, sql: &str, params: &[Value]) -> DriverResult<u64> {
        let result = self.respond(sql, params)?;
        Ok(result.scalar().and_then(Value::as_i64).map(|n| n as u64).unwrap_or(1))
    }

    async fn begin(&self) -> DriverResult<Arc<dyn Transaction>> {
        self.record("BEGIN", &[]);
        Ok(Arc::new(MockTransaction { driver: self.clone() }))
    }
}

pub struct MockTransaction {
    driver: MockDriver,
}

#[async_trait]
impl Driver for MockTransaction {
    async fn query(&self, sql: &str, params: &[Value]) -> DriverResult<QueryResult> {
        self.driver.query(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> DriverResult<u64> {
        self.driver.execute(sql, params).await
    }

    async fn begin(&self) -> DriverResult<Arc<dyn Transaction>> {
        Err(DriverError::new("transaction already in progress"))
    }
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(&self) -> DriverResult<()> {
        self.driver.record("COMMIT", &[]);
        Ok(())
    }

    async fn rollback(&self) -> DriverResult<()> {
        self.driver.record("ROLLBACK", &[]);
        Ok(())
    }

    fn as_driver(&self) -> &dyn Driver {
        self
    }
}

pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
    QueryResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

/// Answers `INSERT ... RETURNING "id"` with increasing ids starting at 1.
pub fn returning_ids() -> impl Fn(&str, &[Value]) -> Option<DriverResult<QueryResult>> + Send + Sync + 'static {
    let next = Arc::new(Mutex::new(0i64));
    move |sql, _| {
        if sql.starts_with("INSERT") && sql.ends_with("RETURNING \"id\"") {
            let mut next = next.lock().unwrap();
            *next += 1;
            return Some(Ok(rows(&["id"], vec![vec![Value::Integer(*next)]])));
        }
        None
    }
}

pub fn unique_violation(constraint: &str) -> DriverError {
    DriverError::new("duplicate key value violates unique constraint")
        .with_code(docrel::core::UNIQUE_VIOLATION)
        .with_constraint(constraint)
}
