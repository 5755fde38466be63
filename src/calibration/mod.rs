//! Persistent probe calibration
//!
//! Calibration constants live in a small EEPROM-style store, are loaded
//! once at startup and only change through an operator calibration
//! session.

pub mod ec;
pub mod ph;
pub mod session;
pub mod store;

pub use ec::EcCalibration;
pub use ph::PhCalibration;
pub use session::{CalibrationCommand, CalibrationSession};
pub use store::{CalibrationStore, FileEeprom};
