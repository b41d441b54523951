//! Helpers shared by the workflows.

pub mod retention;
