//! HTTP request handlers, one module per resource.

pub mod commands;
pub mod snapshots;
pub mod users;
