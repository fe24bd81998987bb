pub mod context;
pub mod validation;

pub use context::{CallerContext, CallerRole};
pub use validation::ValidatedJson;
