pub mod connection;
#[cfg(test)]
pub mod memory;
pub mod operations;

use std::fmt;
use std::future::Future;

use crate::error::RigError;

pub use connection::execute_with_retry;
pub use operations::PostgresStore;

/// Path of the pump request flag
pub const PUMP_PATH: &str = "/pump";
/// Path of the tick the latest readings were taken at
pub const TIMESTAMP_PATH: &str = "/readings/timestamp";

/// A value stored at a database path
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreValue {
    Float(f32),
    Int(i64),
    Bool(bool),
}

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreValue::Float(value) => write!(f, "{}", value),
            StoreValue::Int(value) => write!(f, "{}", value),
            StoreValue::Bool(value) => write!(f, "{}", value),
        }
    }
}

/// Key-value cloud database the rig publishes to
pub trait CloudStore {
    /// Write all values, as one unit where the backend supports it
    fn set_values(
        &self,
        values: &[(String, StoreValue)],
    ) -> impl Future<Output = Result<(), RigError>> + Send;

    /// Read a boolean flag; a missing path reads as false
    fn get_flag(&self, path: &str) -> impl Future<Output = Result<bool, RigError>> + Send;
}
