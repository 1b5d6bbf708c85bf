// ============================================================================
// RustOrmDB Library
// ============================================================================

//! A minimal object-relational mapper: declarative entity registration,
//! snapshot-based change tracking, dependency-ordered statement batching
//! with optimistic concurrency guards, and a small translated query
//! surface, over a pluggable SQL engine. A shared in-memory engine ships
//! in [`engine::MemoryEngine`] and answers `memdb://` connection strings.
//!
//! # Examples
//!
//! ```
//! use rustormdb::{ColumnDef, DataType, EntityDescriptor, EntityRegistry, Session};
//!
//! # fn main() -> rustormdb::Result<()> {
//! let mut registry = EntityRegistry::new();
//! registry.register(
//!     EntityDescriptor::builder("User", "USERS")
//!         .generated_key("id")
//!         .column(ColumnDef::new("name", DataType::Text).not_null().unique())
//!         .concurrency_token("name")
//!         .build()?,
//! )?;
//! let model = registry.build()?;
//!
//! let engine = rustormdb::MemoryEngine::new();
//! tokio_test::block_on(engine.create_schema(&model))?;
//!
//! let mut session = Session::with_engine(model, std::sync::Arc::new(engine));
//! session.add("User", &[("name", "Alice".into())])?;
//! let report = session.save_changes_blocking()?;
//! assert_eq!(report.inserted, 1);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod engine;
pub mod model;
pub mod query;
pub mod session;
pub mod sql;
pub mod tracker;

// Re-export main types for convenience
pub use self::core::{DataType, OrmError, Result, Row, Value};
pub use model::{ColumnDef, EntityDescriptor, EntityRegistry, Model};
pub use session::{SaveReport, Session};
pub use tracker::{EntityId, EntityState};

// Re-export the engine surface
pub use engine::{register_engine, resolve, MemoryEngine, SqlEngine, TransactionId};

// Re-export the query surface
pub use query::{contains, eq, Expr};
