/// Two-range conductivity probe calibration (K = 1 cell)
use log::info;

use crate::calibration::store::{read_f32, write_f32, CalibrationStore, EC_ADDR};
use crate::error::RigError;
use crate::pipeline::transfer::EcCurve;

/// Gain resistor of the probe's conditioning board (ohms)
const RES2: f32 = 820.0;
/// Reference voltage of the conditioning board (mV)
const EC_REF: f32 = 200.0;
/// Temperature compensation coefficient per degree from 25 C
const TEMP_COEFFICIENT: f32 = 0.0185;

/// Above this estimate the high-range K value is used
const HIGH_RANGE_SWITCH: f32 = 2.5;
/// Below this estimate the low-range K value is used
const LOW_RANGE_SWITCH: f32 = 2.0;

pub const DEFAULT_K_VALUE: f32 = 1.0;

/// Uncompensated conductivity (ms/cm) for a probe voltage
pub fn raw_ec(voltage_mv: f32) -> f32 {
    1000.0 * voltage_mv / RES2 / EC_REF
}

fn temperature_factor(temperature_c: f32) -> f32 {
    1.0 + TEMP_COEFFICIENT * (temperature_c - 25.0)
}

/// Standard solutions the probe can be calibrated against
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EcBuffer {
    /// 1.413 ms/cm, sets the low-range K value
    Low,
    /// 12.88 ms/cm, sets the high-range K value
    High,
}

impl EcBuffer {
    pub fn conductivity(&self) -> f32 {
        match self {
            EcBuffer::Low => 1.413,
            EcBuffer::High => 12.88,
        }
    }

    pub fn identify(raw: f32) -> Option<Self> {
        if raw > 0.9 && raw < 1.9 {
            Some(EcBuffer::Low)
        } else if raw > 9.0 && raw < 16.8 {
            Some(EcBuffer::High)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EcPointError {
    /// Voltage does not match any standard solution
    UnknownBuffer,
    /// Solution recognized but the derived K value is implausible
    KValueOutOfRange(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EcCalibration {
    pub k_value_low: f32,
    pub k_value_high: f32,
    /// K value picked by the previous read
    active_k: f32,
}

impl Default for EcCalibration {
    fn default() -> Self {
        Self::new(DEFAULT_K_VALUE, DEFAULT_K_VALUE)
    }
}

impl EcCalibration {
    pub fn new(k_value_low: f32, k_value_high: f32) -> Self {
        Self {
            k_value_low,
            k_value_high,
            active_k: k_value_low,
        }
    }

    /// Stored K values, defaults for erased slots; never writes
    pub fn from_store<S: CalibrationStore + ?Sized>(store: &S) -> Self {
        Self::new(
            read_f32(store, EC_ADDR).unwrap_or(DEFAULT_K_VALUE),
            read_f32(store, EC_ADDR + 4).unwrap_or(DEFAULT_K_VALUE),
        )
    }

    /// Load from the store, writing defaults into erased slots
    pub fn load<S: CalibrationStore + ?Sized>(store: &mut S) -> Result<Self, RigError> {
        let calibration = Self::from_store(store);
        if read_f32(store, EC_ADDR).is_none() || read_f32(store, EC_ADDR + 4).is_none() {
            info!("EC calibration slots erased, writing defaults");
            calibration.save(store)?;
        }
        info!(
            "EC calibration: K low {:.3}, K high {:.3}",
            calibration.k_value_low, calibration.k_value_high
        );
        Ok(calibration)
    }

    pub fn save<S: CalibrationStore + ?Sized>(&self, store: &mut S) -> Result<(), RigError> {
        write_f32(store, EC_ADDR, self.k_value_low);
        write_f32(store, EC_ADDR + 4, self.k_value_high);
        store.commit()
    }

    /// Derive a K value from a probe sitting in a standard solution
    pub fn apply_point(
        &mut self,
        voltage_mv: f32,
        temperature_c: f32,
    ) -> Result<(EcBuffer, f32), EcPointError> {
        let buffer = EcBuffer::identify(raw_ec(voltage_mv)).ok_or(EcPointError::UnknownBuffer)?;
        let compensated = buffer.conductivity() * temperature_factor(temperature_c);
        let k_value = RES2 * EC_REF * compensated / 1000.0 / voltage_mv;
        if !(k_value > 0.5 && k_value < 1.5) {
            return Err(EcPointError::KValueOutOfRange(k_value));
        }
        match buffer {
            EcBuffer::Low => self.k_value_low = k_value,
            EcBuffer::High => self.k_value_high = k_value,
        }
        Ok((buffer, k_value))
    }
}

impl EcCurve for EcCalibration {
    fn read_ec(&mut self, voltage_mv: f32, temperature_c: f32) -> f32 {
        let raw = raw_ec(voltage_mv);
        let estimate = raw * self.active_k;
        if estimate > HIGH_RANGE_SWITCH {
            self.active_k = self.k_value_high;
        } else if estimate < LOW_RANGE_SWITCH {
            self.active_k = self.k_value_low;
        }
        raw * self.active_k / temperature_factor(temperature_c)
    }
}
