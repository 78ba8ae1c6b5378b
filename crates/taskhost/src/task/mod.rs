//! Task abstraction
//!
//! - [`Task`] - typed unit of work (`Argument` to `Output`)
//! - [`ArgumentConverter`] / [`ResultConverter`] - message body strategies
//! - [`TaskExecutionContext`] - per-pool read-only configuration and services

mod context;
mod converter;
mod definition;

pub use context::TaskExecutionContext;
pub use converter::{
    ArgumentConverter, ConversionError, DisplayConverter, FromStrConverter, JsonConverter,
    NoResult, ResultConverter, StringConverter,
};
pub use definition::{Task, TaskError};
