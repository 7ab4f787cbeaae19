//! Schema reconciliation.
//!
//! The registry is turned into a [`SchemaPlan`] of tables and named
//! constraints, which is compared against a [`Catalog`] snapshot of the live
//! schema. Only the missing pieces are created, inside one transaction,
//! followed by making any immediate foreign keys deferrable.

mod catalog;
mod constraint;
mod reconciler;

pub use catalog::Catalog;
pub use constraint::{Constraint, OnDelete};
pub use reconciler::{Reconciler, SchemaPlan, TableSpec};

/// DDL issued by one reconciliation run, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub statements: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }
}
