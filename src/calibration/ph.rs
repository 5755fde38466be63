/// Two-point pH electrode calibration
use log::info;

use crate::calibration::store::{read_f32, write_f32, CalibrationStore, PH_ADDR};
use crate::error::RigError;
use crate::pipeline::transfer::PhCurve;

pub const DEFAULT_NEUTRAL_MV: f32 = 1500.0;
pub const DEFAULT_ACID_MV: f32 = 2032.44;

/// Electrode voltage window accepted for the pH 7.0 buffer
pub const NEUTRAL_WINDOW_MV: (f32, f32) = (1322.0, 1678.0);
/// Electrode voltage window accepted for the pH 4.0 buffer
pub const ACID_WINDOW_MV: (f32, f32) = (1854.0, 2210.0);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhCalibration {
    /// Electrode voltage in pH 7.0 buffer
    pub neutral_voltage_mv: f32,
    /// Electrode voltage in pH 4.0 buffer
    pub acid_voltage_mv: f32,
}

impl Default for PhCalibration {
    fn default() -> Self {
        Self {
            neutral_voltage_mv: DEFAULT_NEUTRAL_MV,
            acid_voltage_mv: DEFAULT_ACID_MV,
        }
    }
}

/// Which buffer a calibration voltage belongs to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhBuffer {
    Neutral,
    Acid,
}

impl PhBuffer {
    pub fn ph(&self) -> f32 {
        match self {
            PhBuffer::Neutral => 7.0,
            PhBuffer::Acid => 4.0,
        }
    }

    /// Identify the buffer from the electrode voltage, if it is in a window
    pub fn identify(voltage_mv: f32) -> Option<Self> {
        let within = |(low, high): (f32, f32)| voltage_mv > low && voltage_mv < high;
        if within(NEUTRAL_WINDOW_MV) {
            Some(PhBuffer::Neutral)
        } else if within(ACID_WINDOW_MV) {
            Some(PhBuffer::Acid)
        } else {
            None
        }
    }
}

impl PhCalibration {
    /// Stored values, defaults for erased slots; never writes
    pub fn from_store<S: CalibrationStore + ?Sized>(store: &S) -> Self {
        Self {
            neutral_voltage_mv: read_f32(store, PH_ADDR).unwrap_or(DEFAULT_NEUTRAL_MV),
            acid_voltage_mv: read_f32(store, PH_ADDR + 4).unwrap_or(DEFAULT_ACID_MV),
        }
    }

    /// Load from the store, writing defaults into erased slots
    pub fn load<S: CalibrationStore + ?Sized>(store: &mut S) -> Result<Self, RigError> {
        let calibration = Self::from_store(store);
        if read_f32(store, PH_ADDR).is_none() || read_f32(store, PH_ADDR + 4).is_none() {
            info!("pH calibration slots erased, writing defaults");
            calibration.save(store)?;
        }
        info!(
            "pH calibration: neutral {:.2} mV, acid {:.2} mV",
            calibration.neutral_voltage_mv, calibration.acid_voltage_mv
        );
        Ok(calibration)
    }

    pub fn save<S: CalibrationStore + ?Sized>(&self, store: &mut S) -> Result<(), RigError> {
        write_f32(store, PH_ADDR, self.neutral_voltage_mv);
        write_f32(store, PH_ADDR + 4, self.acid_voltage_mv);
        store.commit()
    }

    /// Record the electrode voltage for the buffer it falls into
    pub fn apply_point(&mut self, voltage_mv: f32) -> Option<PhBuffer> {
        let buffer = PhBuffer::identify(voltage_mv)?;
        match buffer {
            PhBuffer::Neutral => self.neutral_voltage_mv = voltage_mv,
            PhBuffer::Acid => self.acid_voltage_mv = voltage_mv,
        }
        Some(buffer)
    }
}

impl PhCurve for PhCalibration {
    fn read_ph(&self, voltage_mv: f32, _temperature_c: f32) -> f32 {
        let neutral = (self.neutral_voltage_mv - 1500.0) / 3.0;
        let acid = (self.acid_voltage_mv - 1500.0) / 3.0;
        let slope = (7.0 - 4.0) / (neutral - acid);
        let intercept = 7.0 - slope * neutral;
        slope * (voltage_mv - 1500.0) / 3.0 + intercept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::store::memory::MemoryEeprom;
    use crate::calibration::store::EEPROM_SIZE;

    #[test]
    fn default_curve_passes_through_both_buffers() {
        let curve = PhCalibration::default();
        assert!((curve.read_ph(1500.0, 25.0) - 7.0).abs() < 1e-4);
        assert!((curve.read_ph(2032.44, 25.0) - 4.0).abs() < 1e-4);
    }

    #[test]
    fn higher_voltage_means_more_acidic() {
        let curve = PhCalibration::default();
        assert!(curve.read_ph(1800.0, 25.0) < curve.read_ph(1400.0, 25.0));
    }

    #[test]
    fn buffer_windows_are_exclusive() {
        assert_eq!(PhBuffer::identify(1500.0), Some(PhBuffer::Neutral));
        assert_eq!(PhBuffer::identify(2000.0), Some(PhBuffer::Acid));
        assert_eq!(PhBuffer::identify(1322.0), None);
        assert_eq!(PhBuffer::identify(1750.0), None);
        assert_eq!(PhBuffer::identify(2210.0), None);
    }

    #[test]
    fn load_writes_defaults_into_erased_store() {
        let mut store = MemoryEeprom::default();
        store.begin(EEPROM_SIZE).unwrap();

        let calibration = PhCalibration::load(&mut store).unwrap();

        assert_eq!(calibration, PhCalibration::default());
        assert_eq!(store.commits, 1);
        assert_eq!(read_f32(&store, PH_ADDR), Some(DEFAULT_NEUTRAL_MV));
    }

    #[test]
    fn load_keeps_stored_values() {
        let mut store = MemoryEeprom::default();
        store.begin(EEPROM_SIZE).unwrap();
        PhCalibration {
            neutral_voltage_mv: 1480.0,
            acid_voltage_mv: 2010.0,
        }
        .save(&mut store)
        .unwrap();

        let calibration = PhCalibration::load(&mut store).unwrap();

        assert_eq!(calibration.neutral_voltage_mv, 1480.0);
        assert_eq!(calibration.acid_voltage_mv, 2010.0);
        assert_eq!(store.commits, 1);
    }

    #[test]
    fn from_store_survives_a_store_that_cannot_commit() {
        let mut store = MemoryEeprom::default();
        store.begin(EEPROM_SIZE).unwrap();
        write_f32(&mut store, PH_ADDR, 1480.0);
        store.fail_commit = true;

        assert!(matches!(
            PhCalibration::load(&mut store),
            Err(RigError::StorageInitFailure(_))
        ));
        let calibration = PhCalibration::from_store(&store);
        assert_eq!(calibration.neutral_voltage_mv, 1480.0);
        assert_eq!(calibration.acid_voltage_mv, DEFAULT_ACID_MV);
    }

    #[test]
    fn calibrated_curve_reads_seven_at_new_neutral_point() {
        let mut calibration = PhCalibration::default();
        assert_eq!(calibration.apply_point(1450.0), Some(PhBuffer::Neutral));
        assert!((calibration.read_ph(1450.0, 25.0) - 7.0).abs() < 1e-4);
        assert_eq!(calibration.apply_point(900.0), None);
        assert_eq!(calibration.neutral_voltage_mv, 1450.0);
    }
}
