mod query;
#[allow(clippy::module_inception)]
mod session;

pub use query::{ProjectedQuery, QueryBuilder};
pub use session::{SaveReport, Session};
