// ============================================================================
// docrel: document entities over PostgreSQL tables
// ============================================================================

//! Entities are declared as schemas, registered once into a [`Registry`]
//! and then created, queried and saved as dynamic [`Document`]s through a
//! [`Session`].
//!
//! Each entity maps to one table. Discriminator descendants get their own
//! table sharing the ancestor's id, embedded collections live in the
//! embedded entity's table with a back reference, and many-to-many
//! collections go through a junction table.
//!
//! ```no_run
//! use docrel::{ConnectionConfig, Field, Registry, Schema, Session};
//! use serde_json::json;
//!
//! # async fn run() -> docrel::Result<()> {
//! let registry = Registry::builder()
//!     .model("Widget", Schema::new().field("height", Field::integer().required()))
//!     .discriminator("Widget", "Gadget", Schema::new().field("weight", Field::integer()))
//!     .build()?;
//!
//! let config = ConnectionConfig::from_url("postgres://postgres@localhost/shop").map_err(docrel::OrmError::Config)?;
//! let session = Session::connect(&config, registry).await?;
//! session.sync_schema().await?;
//!
//! let gadget = session.model("Gadget")?.create(&json!({"height": 1, "weight": 2})).await?;
//! let widgets = session.model("Widget")?.find(&json!({}))?.execute().await?;
//! assert_eq!(widgets[0].entity_name(), "Gadget");
//! # let _ = gadget;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod core;
pub mod document;
pub mod driver;
pub mod filter;
pub mod migrate;
pub mod model;
mod persist;
pub mod query;
pub mod registry;
pub mod result;
pub mod schema;
pub mod session;
pub mod sql;
pub mod types;

pub use connection::ConnectionConfig;
pub use core::{DriverError, OrmError, Result, ValidationDetail, ValidationError, Value};
pub use document::{Document, DocumentList, FieldValue};
pub use driver::{Driver, PgDriver, Transaction};
pub use migrate::ReconcileReport;
pub use model::Model;
pub use query::{Direction, Query};
pub use registry::{Registry, RegistryBuilder, Relation};
pub use result::QueryResult;
pub use schema::{Field, Hook, IndexKind, Phase, Schema, hook_fn};
pub use session::Session;
pub use types::FieldType;
