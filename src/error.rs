/// Error taxonomy for the rig
///
/// Probe failures are recovered locally by the pipeline; the remaining
/// variants surface to the task or maintenance mode that hit them.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RigError {
    /// One-wire search found no device on the bus
    #[error("no temperature probe responded to search")]
    SensorAbsent,

    /// Probe answered but its address failed validation
    #[error("temperature probe data invalid: {0}")]
    SensorDataInvalid(String),

    /// Calibration store could not be opened or committed
    #[error("calibration store failure: {0}")]
    StorageInitFailure(String),

    /// Cloud database unreachable, or every retry attempt failed
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("configuration error: {0}")]
    Config(String),
}
