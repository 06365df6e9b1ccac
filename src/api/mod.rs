pub mod chat;
pub(crate) mod common;
pub mod health;
pub mod models;

pub use common::aggregate_body;
