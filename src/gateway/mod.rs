//! Middleware chains bound to a model

mod builder;
mod wrapped;

pub use builder::{Mimir, MimirBuilder};
pub use wrapped::WrappedModel;
