/// Operator calibration session driven by console commands
use std::fmt;

use crate::calibration::ec::{EcBuffer, EcCalibration, EcPointError};
use crate::calibration::ph::{PhBuffer, PhCalibration};
use crate::calibration::store::CalibrationStore;
use crate::error::RigError;
use crate::models::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Ph,
    Ec,
}

impl Probe {
    pub fn channel(&self) -> Channel {
        match self {
            Probe::Ph => Channel::Ph,
            Probe::Ec => Channel::Ec,
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::Ph => write!(f, "pH"),
            Probe::Ec => write!(f, "EC"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationCommand {
    Enter(Probe),
    Calibrate(Probe),
    Exit(Probe),
}

impl CalibrationCommand {
    /// Parse a console line such as `enterph` or `CALEC`
    pub fn parse(line: &str) -> Option<Self> {
        let command = match line.trim().to_ascii_uppercase().as_str() {
            "ENTERPH" => CalibrationCommand::Enter(Probe::Ph),
            "CALPH" => CalibrationCommand::Calibrate(Probe::Ph),
            "EXITPH" => CalibrationCommand::Exit(Probe::Ph),
            "ENTEREC" => CalibrationCommand::Enter(Probe::Ec),
            "CALEC" => CalibrationCommand::Calibrate(Probe::Ec),
            "EXITEC" => CalibrationCommand::Exit(Probe::Ec),
            _ => return None,
        };
        Some(command)
    }

    pub fn probe(&self) -> Probe {
        match self {
            CalibrationCommand::Enter(probe)
            | CalibrationCommand::Calibrate(probe)
            | CalibrationCommand::Exit(probe) => *probe,
        }
    }
}

/// What a command did, for the operator console
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    Entered(Probe),
    PhPoint { buffer: PhBuffer, voltage_mv: f32 },
    EcPoint { buffer: EcBuffer, k_value: f32 },
    BufferError(Probe),
    KValueRejected(f32),
    Saved(Probe),
    Failed(Probe),
    NotInMode(Probe),
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::Entered(probe) => write!(
                f,
                "Entered {} calibration mode. Put the probe into the standard buffer solution",
                probe
            ),
            SessionEvent::PhPoint { buffer, voltage_mv } => write!(
                f,
                "Buffer solution {:.1} identified at {:.1} mV, send EXITPH to save",
                buffer.ph(),
                voltage_mv
            ),
            SessionEvent::EcPoint { buffer, k_value } => write!(
                f,
                "Buffer solution {} ms/cm identified, K = {:.3}, send EXITEC to save",
                buffer.conductivity(),
                k_value
            ),
            SessionEvent::BufferError(probe) => {
                write!(f, "{} buffer solution not recognized, try again", probe)
            }
            SessionEvent::KValueRejected(k) => {
                write!(f, "Derived K value {:.3} outside 0.5..1.5, try again", k)
            }
            SessionEvent::Saved(probe) => {
                write!(f, "{} calibration saved, exited calibration mode", probe)
            }
            SessionEvent::Failed(probe) => {
                write!(f, "{} calibration failed, exited calibration mode", probe)
            }
            SessionEvent::NotInMode(probe) => {
                write!(f, "Not in {} calibration mode, send ENTER{} first", probe, probe)
            }
        }
    }
}

/// Calibration mode state; one probe at a time
#[derive(Debug, Default)]
pub struct CalibrationSession {
    active: Option<Probe>,
    point_accepted: bool,
}

impl CalibrationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<Probe> {
        self.active
    }

    /// Apply one command given the probe's current voltage and temperature
    ///
    /// Calibration constants are only written to the store on a successful
    /// exit; store failures are returned as errors.
    pub fn apply<S>(
        &mut self,
        command: CalibrationCommand,
        voltage_mv: f32,
        temperature_c: f32,
        ph: &mut PhCalibration,
        ec: &mut EcCalibration,
        store: &mut S,
    ) -> Result<SessionEvent, RigError>
    where
        S: CalibrationStore + ?Sized,
    {
        match command {
            CalibrationCommand::Enter(probe) => {
                self.active = Some(probe);
                self.point_accepted = false;
                Ok(SessionEvent::Entered(probe))
            }
            CalibrationCommand::Calibrate(probe) if self.active != Some(probe) => {
                Ok(SessionEvent::NotInMode(probe))
            }
            CalibrationCommand::Calibrate(Probe::Ph) => match ph.apply_point(voltage_mv) {
                Some(buffer) => {
                    self.point_accepted = true;
                    Ok(SessionEvent::PhPoint { buffer, voltage_mv })
                }
                None => {
                    self.point_accepted = false;
                    Ok(SessionEvent::BufferError(Probe::Ph))
                }
            },
            CalibrationCommand::Calibrate(Probe::Ec) => {
                match ec.apply_point(voltage_mv, temperature_c) {
                    Ok((buffer, k_value)) => {
                        self.point_accepted = true;
                        Ok(SessionEvent::EcPoint { buffer, k_value })
                    }
                    Err(EcPointError::UnknownBuffer) => {
                        self.point_accepted = false;
                        Ok(SessionEvent::BufferError(Probe::Ec))
                    }
                    Err(EcPointError::KValueOutOfRange(k)) => {
                        self.point_accepted = false;
                        Ok(SessionEvent::KValueRejected(k))
                    }
                }
            }
            CalibrationCommand::Exit(probe) if self.active != Some(probe) => {
                Ok(SessionEvent::NotInMode(probe))
            }
            CalibrationCommand::Exit(probe) => {
                let accepted = self.point_accepted;
                self.active = None;
                self.point_accepted = false;
                if !accepted {
                    return Ok(SessionEvent::Failed(probe));
                }
                match probe {
                    Probe::Ph => ph.save(store)?,
                    Probe::Ec => ec.save(store)?,
                }
                Ok(SessionEvent::Saved(probe))
            }
        }
    }
}
