//! Sensor acquisition and correction pipeline
//!
//! One cycle: resolve temperature, sample each analog channel, normalize
//! to millivolts, run the calibrated transfer functions (with the low-EC
//! correction) and hand back a [`CycleReport`]. Nothing survives a cycle
//! except the calibration curves' own state.

pub mod acquisition;
pub mod temperature;
pub mod transfer;

use log::debug;
use std::num::NonZeroU16;
use tokio::time::Instant;

use crate::config::PipelineConfig;
use crate::hardware::{AnalogInput, OneWireBus};
use crate::models::{Channel, CycleReport, DerivedKind, DerivedValue, Reading, ResolvedTemperature};
use transfer::{corrected_ec, EcCurve, PhCurve};

pub struct Pipeline<A, B, P, E> {
    config: PipelineConfig,
    analog: A,
    probe: B,
    ph_curve: P,
    ec_curve: E,
    started: Instant,
}

impl<A, B, P, E> Pipeline<A, B, P, E>
where
    A: AnalogInput,
    B: OneWireBus,
    P: PhCurve,
    E: EcCurve,
{
    pub fn new(config: PipelineConfig, analog: A, probe: B, ph_curve: P, ec_curve: E) -> Self {
        Self {
            config,
            analog,
            probe,
            ph_curve,
            ec_curve,
            started: Instant::now(),
        }
    }

    fn tick_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn samples_for(&self, channel: Channel) -> NonZeroU16 {
        match channel {
            Channel::Ph => self.config.ph_samples,
            Channel::Ec => self.config.ec_samples,
            Channel::Turbidity => self.config.turbidity_samples,
            Channel::Temperature => NonZeroU16::MIN,
        }
    }

    async fn acquire(&mut self, channel: Channel) -> Reading {
        let tick_ms = self.tick_ms();
        let samples = self.samples_for(channel);
        let reading = acquisition::acquire(
            &mut self.analog,
            channel,
            samples,
            self.config.sample_spacing,
            self.config.adc_max,
            self.config.v_ref_mv,
            tick_ms,
        )
        .await;
        debug!(
            "{}: raw {} -> {:.1} mV",
            channel.as_str(),
            reading.raw_count,
            reading.voltage_mv
        );
        reading
    }

    pub async fn resolve_temperature(&mut self) -> ResolvedTemperature {
        temperature::resolve_temperature(
            &mut self.probe,
            self.config.probe_conversion,
            self.config.fallback_temperature_c,
        )
        .await
    }

    /// Run one full acquisition cycle
    pub async fn run_cycle(&mut self) -> CycleReport {
        let tick_ms = self.tick_ms();
        let temperature = self.resolve_temperature().await;

        let ph_reading = self.acquire(Channel::Ph).await;
        let ph = self
            .ph_curve
            .read_ph(ph_reading.voltage_mv, temperature.celsius);

        let ec_reading = self.acquire(Channel::Ec).await;
        let ec = corrected_ec(
            &mut self.ec_curve,
            &self.config.ec_correction,
            ec_reading.voltage_mv,
            temperature.celsius,
        );

        let turbidity_reading = self.acquire(Channel::Turbidity).await;
        let ntu = self
            .config
            .turbidity_map
            .map(turbidity_reading.voltage_mv / 1000.0);

        CycleReport {
            tick_ms,
            temperature,
            ph: DerivedValue::new(DerivedKind::PhValue, ph, temperature.measured),
            ph_voltage_mv: ph_reading.voltage_mv,
            ec: DerivedValue::new(DerivedKind::EcValue, ec.value, temperature.measured),
            ec_voltage_mv: ec_reading.voltage_mv,
            ec_corrected: ec.corrected,
            turbidity: DerivedValue::new(DerivedKind::Ntu, ntu, true),
        }
    }

    /// Voltage to calibrate a probe against
    ///
    /// For EC this is the voltage the reported value would come from,
    /// i.e. after the low-EC correction.
    pub async fn calibration_voltage(&mut self, channel: Channel, temperature_c: f32) -> f32 {
        let reading = self.acquire(channel).await;
        if channel != Channel::Ec {
            return reading.voltage_mv;
        }
        corrected_ec(
            &mut self.ec_curve,
            &self.config.ec_correction,
            reading.voltage_mv,
            temperature_c,
        )
        .effective_voltage_mv
    }

    /// Mutable access to both calibration curves
    pub fn curves_mut(&mut self) -> (&mut P, &mut E) {
        (&mut self.ph_curve, &mut self.ec_curve)
    }
}
