/// Simulated rig hardware so the service runs on any host
///
/// Values drift slowly around realistic set points, the same way the
/// bench simulator feeding the dashboard does.
use log::info;

use crate::hardware::{AnalogInput, OneWireBus, PumpOutput};
use crate::models::Channel;
use crate::utils::crc8;

const CMD_CONVERT_T: u8 = 0x44;
const CMD_READ_SCRATCHPAD: u8 = 0xBE;

/// Periodic jitter in ADC counts, repeating every `2 * amplitude` reads
fn triangle(step: u32, amplitude: u32) -> i32 {
    let period = amplitude * 2;
    let phase = step % period;
    let offset = if phase < amplitude {
        phase
    } else {
        period - phase
    };
    offset as i32 - (amplitude / 2) as i32
}

#[derive(Debug, Clone)]
pub struct SimulatedAnalog {
    ph_raw: u16,
    ec_raw: u16,
    turbidity_raw: u16,
    step: u32,
}

impl SimulatedAnalog {
    /// Set points: pH ~6.8, EC ~1.4 ms/cm at 25 C, turbidity ~15 NTU
    pub fn new() -> Self {
        Self {
            ph_raw: 1905,
            ec_raw: 285,
            turbidity_raw: 61,
            step: 0,
        }
    }

    #[cfg(test)]
    pub fn with_raw(ph_raw: u16, ec_raw: u16, turbidity_raw: u16) -> Self {
        Self {
            ph_raw,
            ec_raw,
            turbidity_raw,
            step: 0,
        }
    }
}

impl Default for SimulatedAnalog {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalogInput for SimulatedAnalog {
    fn read_raw(&mut self, channel: Channel) -> u16 {
        self.step = self.step.wrapping_add(1);
        let base = match channel {
            Channel::Ph => self.ph_raw,
            Channel::Ec => self.ec_raw,
            Channel::Turbidity => self.turbidity_raw,
            Channel::Temperature => return 0,
        };
        (base as i32 + triangle(self.step, 8)).clamp(0, u16::MAX as i32) as u16
    }
}

/// One-wire bus with at most one DS18B20-style probe attached
#[derive(Debug, Clone)]
pub struct SimulatedOneWire {
    address: Option<[u8; 8]>,
    celsius: f32,
    drift_step: u32,
    drift: bool,
    enumerated: bool,
    selected: bool,
    latched_raw: i16,
    outgoing: Vec<u8>,
}

impl SimulatedOneWire {
    /// A DS18B20 (family 0x28) that drifts around the given temperature
    pub fn ds18b20(celsius: f32) -> Self {
        let mut address = [0x28, 0x5A, 0x3C, 0x11, 0x07, 0x00, 0x00, 0x00];
        address[7] = crc8(&address[..7]);
        Self::with_address(address, celsius)
    }

    /// A probe answering with an arbitrary ROM address, valid or not
    pub fn with_address(address: [u8; 8], celsius: f32) -> Self {
        Self {
            address: Some(address),
            celsius,
            drift_step: 0,
            drift: true,
            enumerated: false,
            selected: false,
            latched_raw: 0,
            outgoing: Vec::new(),
        }
    }

    /// Hold the temperature steady instead of drifting
    #[cfg(test)]
    pub fn steady(mut self) -> Self {
        self.drift = false;
        self
    }

    /// A bus with nothing attached
    #[cfg(test)]
    pub fn empty() -> Self {
        Self {
            address: None,
            celsius: 0.0,
            drift_step: 0,
            drift: false,
            enumerated: false,
            selected: false,
            latched_raw: 0,
            outgoing: Vec::new(),
        }
    }

    fn current_celsius(&mut self) -> f32 {
        if !self.drift {
            return self.celsius;
        }
        self.drift_step = self.drift_step.wrapping_add(1);
        self.celsius + triangle(self.drift_step, 10) as f32 * 0.05
    }

    fn scratchpad(&self) -> Vec<u8> {
        let [lsb, msb] = self.latched_raw.to_le_bytes();
        let mut pad = vec![lsb, msb, 0x4B, 0x46, 0x7F, 0xFF, 0x0C, 0x10, 0x00];
        pad[8] = crc8(&pad[..8]);
        pad
    }
}

impl OneWireBus for SimulatedOneWire {
    fn search(&mut self) -> Option<[u8; 8]> {
        if self.enumerated {
            return None;
        }
        self.enumerated = true;
        self.address
    }

    fn reset_search(&mut self) {
        self.enumerated = false;
    }

    fn reset(&mut self) -> bool {
        self.selected = false;
        self.outgoing.clear();
        self.address.is_some()
    }

    fn select(&mut self, address: &[u8; 8]) {
        self.selected = self.address.as_ref() == Some(address);
    }

    fn write(&mut self, byte: u8, _power: bool) {
        if !self.selected {
            return;
        }
        match byte {
            CMD_CONVERT_T => {
                let celsius = self.current_celsius();
                self.latched_raw = (celsius * 16.0).round() as i16;
            }
            CMD_READ_SCRATCHPAD => self.outgoing = self.scratchpad(),
            _ => {}
        }
    }

    fn read(&mut self) -> u8 {
        if self.outgoing.is_empty() {
            // Idle line reads high
            0xFF
        } else {
            self.outgoing.remove(0)
        }
    }
}

/// Pump output that only reports its state changes
#[derive(Debug, Default)]
pub struct SimulatedPump {
    active: bool,
}

impl SimulatedPump {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PumpOutput for SimulatedPump {
    fn set_active(&mut self, active: bool) {
        if active != self.active {
            info!("Pump output {}", if active { "HIGH" } else { "LOW" });
        }
        self.active = active;
    }
}
