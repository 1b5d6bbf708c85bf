mod expr;
mod translate;

pub use expr::{contains, eq, Expr};
pub use translate::{translate, IncludePlan, QuerySpec, Terminal, TranslatedQuery};
