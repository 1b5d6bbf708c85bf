mod error;
mod value;

pub use error::{OrmError, Result};
pub use value::{DataType, Value};

/// A row of values, positionally aligned with an entity descriptor's
/// column list.
pub type Row = Vec<Value>;
