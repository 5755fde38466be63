//! Hardware seams of the rig
//!
//! The pipeline only talks to these traits. The binary wires them to the
//! simulated backend; a board port supplies its own implementations.

pub mod simulated;

use crate::models::Channel;

/// Analog-to-digital converter with one input per analog channel
pub trait AnalogInput {
    /// Read one raw sample. Values above the converter's full scale are
    /// clamped by the caller.
    fn read_raw(&mut self, channel: Channel) -> u16;
}

/// Byte-level one-wire bus master
pub trait OneWireBus {
    /// Return the next device address on the bus, or `None` once every
    /// device has been enumerated since the last `reset_search`.
    fn search(&mut self) -> Option<[u8; 8]>;

    fn reset_search(&mut self);

    /// Issue a reset pulse; true when a presence pulse was seen
    fn reset(&mut self) -> bool;

    /// Address a single device (Match ROM)
    fn select(&mut self, address: &[u8; 8]);

    /// Write a byte, optionally keeping strong pull-up power on afterwards
    fn write(&mut self, byte: u8, power: bool);

    fn read(&mut self) -> u8;
}

/// Single digital output driving the pump
pub trait PumpOutput {
    fn set_active(&mut self, active: bool);
}
