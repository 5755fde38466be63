/// Sensor transfer functions and the low-EC correction policy
use log::debug;

/// Calibrated pH curve: electrode voltage (mV) and temperature (C) to pH
pub trait PhCurve {
    fn read_ph(&self, voltage_mv: f32, temperature_c: f32) -> f32;
}

/// Calibrated conductivity curve: probe voltage (mV) and temperature (C)
/// to EC in ms/cm
///
/// Takes `&mut self` because a curve may switch calibration ranges based
/// on what it last measured.
pub trait EcCurve {
    fn read_ec(&mut self, voltage_mv: f32, temperature_c: f32) -> f32;
}

/// Low-EC correction policy
///
/// The conductivity probe under-reads below roughly 1 ms/cm, which kept
/// the 1.413 ms/cm buffer out of the calibration window. Scaling the
/// voltage by a fixed factor and re-reading brings it back. This is an
/// empirical fix for this probe, not a physical model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EcCorrection {
    /// First-pass estimates below this (ms/cm) are corrected
    pub threshold_ms_cm: f32,
    /// Multiplier applied to the probe voltage before re-reading
    pub factor: f32,
}

impl Default for EcCorrection {
    fn default() -> Self {
        Self {
            threshold_ms_cm: 1.0,
            factor: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EcEstimate {
    pub value: f32,
    /// Voltage the reported value was computed from
    pub effective_voltage_mv: f32,
    pub corrected: bool,
}

/// Run the EC curve with the low-reading correction applied
///
/// When the first pass is below the threshold the curve is re-invoked with
/// the scaled voltage and that result replaces the first pass outright.
pub fn corrected_ec<E>(
    curve: &mut E,
    policy: &EcCorrection,
    voltage_mv: f32,
    temperature_c: f32,
) -> EcEstimate
where
    E: EcCurve + ?Sized,
{
    let first_pass = curve.read_ec(voltage_mv, temperature_c);
    if first_pass >= policy.threshold_ms_cm {
        return EcEstimate {
            value: first_pass,
            effective_voltage_mv: voltage_mv,
            corrected: false,
        };
    }

    let scaled = voltage_mv * policy.factor;
    let value = curve.read_ec(scaled, temperature_c);
    debug!(
        "EC first pass {:.3} ms/cm below {:.3}, re-read at {:.1} mV -> {:.3} ms/cm",
        first_pass, policy.threshold_ms_cm, scaled, value
    );
    EcEstimate {
        value,
        effective_voltage_mv: scaled,
        corrected: true,
    }
}

/// Linear map from a voltage domain to an output range
///
/// Used for turbidity, where no calibrated curve exists and volts map
/// straight onto NTU. Inputs outside the domain extrapolate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearMap {
    pub domain_min: f32,
    pub domain_max: f32,
    pub range_min: f32,
    pub range_max: f32,
}

impl LinearMap {
    pub const fn new(domain_min: f32, domain_max: f32, range_min: f32, range_max: f32) -> Self {
        Self {
            domain_min,
            domain_max,
            range_min,
            range_max,
        }
    }

    pub fn map(&self, x: f32) -> f32 {
        let span = self.domain_max - self.domain_min;
        if span == 0.0 {
            return self.range_min;
        }
        (x - self.domain_min) * (self.range_max - self.range_min) / span + self.range_min
    }
}
