//! Construction of the [`crate::ModelShelf`] context.

mod builder;

pub use builder::ModelShelfBuilder;
