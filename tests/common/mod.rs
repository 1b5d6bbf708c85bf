// Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;

use rustormdb::{
    ColumnDef, DataType, EntityDescriptor, EntityRegistry, MemoryEngine, Model, Session,
};

/// The canonical two-entity model: a `User` principal with a concurrency
/// token on `name`, and a `Folder` dependent referencing its owner.
pub fn fixture_model() -> Arc<Model> {
    let mut registry = EntityRegistry::new();
    registry
        .register(
            EntityDescriptor::builder("User", "USERS")
                .generated_key("id")
                .column(
                    ColumnDef::new("name", DataType::Text)
                        .not_null()
                        .unique()
                        .max_length(100),
                )
                .concurrency_token("name")
                .column(ColumnDef::new("long_description", DataType::Text))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            EntityDescriptor::builder("Folder", "FOLDERS")
                .generated_key("id")
                .column(ColumnDef::new("name", DataType::Text).not_null().max_length(100))
                .column(ColumnDef::new("owner_id", DataType::Integer).not_null())
                .has_one("owner", "owner_id", "User")
                .build()
                .unwrap(),
        )
        .unwrap();
    registry.build().unwrap()
}

/// Fresh named shared database with the fixture schema created. Each test
/// should pass a unique name so parallel tests never share state.
pub async fn fresh_engine(name: &str) -> (Arc<Model>, Arc<MemoryEngine>) {
    MemoryEngine::forget(name);
    let model = fixture_model();
    let engine = MemoryEngine::connect(name);
    engine.create_schema(&model).await.unwrap();
    (model, Arc::new(engine))
}

/// A session over a fresh named database.
pub async fn fresh_session(name: &str) -> Session {
    let (model, engine) = fresh_engine(name).await;
    Session::with_engine(model, engine)
}

/// A second session over the same named database.
pub fn sibling_session(model: Arc<Model>, name: &str) -> Session {
    Session::with_engine(model, Arc::new(MemoryEngine::connect(name)))
}
