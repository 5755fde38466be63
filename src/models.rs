use std::fmt;

/// Input channels of the rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ph,
    Ec,
    Turbidity,
    Temperature,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Ph => "ph",
            Channel::Ec => "ec",
            Channel::Turbidity => "turbidity",
            Channel::Temperature => "temperature",
        }
    }

    /// Cloud database path the channel's latest value is written to
    pub fn path(&self) -> &'static str {
        match self {
            Channel::Ph => "/readings/ph",
            Channel::Ec => "/readings/ec",
            Channel::Turbidity => "/readings/turbidity",
            Channel::Temperature => "/readings/temperature",
        }
    }
}

/// One acquired analog sample, averaged when the channel is oversampled.
///
/// Lives for a single cycle only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub channel: Channel,
    pub raw_count: u16,
    pub voltage_mv: f32,
    /// Milliseconds since the service started
    pub tick_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedKind {
    PhValue,
    EcValue,
    Ntu,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedValue {
    pub kind: DerivedKind,
    pub value: f32,
    /// False when a fallback constant replaced an upstream input
    pub valid: bool,
}

impl DerivedValue {
    pub fn new(kind: DerivedKind, value: f32, valid: bool) -> Self {
        Self { kind, value, valid }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTemperature {
    pub celsius: f32,
    /// False when the probe failed and the fallback constant is in use
    pub measured: bool,
}

/// Everything one acquisition cycle produced
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub tick_ms: u64,
    pub temperature: ResolvedTemperature,
    pub ph: DerivedValue,
    pub ph_voltage_mv: f32,
    pub ec: DerivedValue,
    pub ec_voltage_mv: f32,
    pub ec_corrected: bool,
    pub turbidity: DerivedValue,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pH={:.2} ({:.0} mV), EC={:.3} ms/cm, turb={:.1} NTU, temp={:.2} C",
            self.ph.value,
            self.ph_voltage_mv,
            self.ec.value,
            self.turbidity.value,
            self.temperature.celsius
        )?;
        if !self.temperature.measured {
            write!(f, " (fallback)")?;
        }
        if self.ec_corrected {
            write!(f, " [low-EC correction]")?;
        }
        Ok(())
    }
}
