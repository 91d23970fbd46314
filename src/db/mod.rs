//! Service registry and probe log persistence.

mod models;
mod store;

pub use models::*;
pub use store::*;
