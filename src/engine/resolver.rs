// ============================================================================
// Connection-string resolution
// ============================================================================

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use tracing::debug;

use super::{MemoryEngine, SqlEngine};
use crate::core::{OrmError, Result};

/// Builds an engine from the full connection string.
pub type EngineFactory = fn(&str) -> Result<Arc<dyn SqlEngine>>;

lazy_static! {
    static ref FACTORIES: RwLock<HashMap<String, EngineFactory>> = {
        let mut map: HashMap<String, EngineFactory> = HashMap::new();
        map.insert("memdb".to_string(), memdb_factory);
        RwLock::new(map)
    };
}

/// Register an engine factory for a connection-string scheme. Re-registering
/// a scheme replaces the previous factory.
pub fn register_engine(scheme: &str, factory: EngineFactory) {
    FACTORIES
        .write()
        .expect("engine factory registry")
        .insert(scheme.to_string(), factory);
}

/// Resolve a `scheme://rest` connection string to an engine.
pub fn resolve(url: &str) -> Result<Arc<dyn SqlEngine>> {
    let (scheme, _) = url.split_once("://").ok_or_else(|| {
        OrmError::Connection(format!(
            "malformed connection string '{}': expected scheme://target",
            url
        ))
    })?;

    let factory = {
        let factories = FACTORIES.read().expect("engine factory registry");
        factories.get(scheme).copied()
    };
    let factory = factory.ok_or_else(|| {
        OrmError::Connection(format!("no engine registered for scheme '{}'", scheme))
    })?;

    debug!(%url, %scheme, "resolving connection string");
    factory(url)
}

fn memdb_factory(url: &str) -> Result<Arc<dyn SqlEngine>> {
    let name = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| {
            OrmError::Connection(format!(
                "memdb connection string '{}' names no database",
                url
            ))
        })?;
    Ok(Arc::new(MemoryEngine::connect(name)))
}
