/// Raw sample acquisition and voltage normalization
use std::num::NonZeroU16;
use std::time::Duration;
use tokio::time::sleep;

use crate::hardware::AnalogInput;
use crate::models::{Channel, Reading};

/// Convert a raw ADC count to millivolts
///
/// Counts above `adc_max` are clamped so the result never exceeds the
/// reference voltage.
pub fn voltage_mv(raw: u16, adc_max: u16, v_ref_mv: f32) -> f32 {
    let raw = raw.min(adc_max);
    raw as f32 / adc_max as f32 * v_ref_mv
}

/// Sample a channel `samples` times and return the mean raw count
///
/// Samples are taken back to back with `spacing` between them; a single
/// sample involves no delay at all.
pub async fn average_raw<A>(
    analog: &mut A,
    channel: Channel,
    samples: NonZeroU16,
    spacing: Duration,
    adc_max: u16,
) -> u16
where
    A: AnalogInput + ?Sized,
{
    let count = samples.get();
    let mut total: u32 = 0;
    for i in 0..count {
        if i > 0 && !spacing.is_zero() {
            sleep(spacing).await;
        }
        total += analog.read_raw(channel).min(adc_max) as u32;
    }
    (total as f32 / count as f32).round() as u16
}

/// Acquire one reading for a channel
pub async fn acquire<A>(
    analog: &mut A,
    channel: Channel,
    samples: NonZeroU16,
    spacing: Duration,
    adc_max: u16,
    v_ref_mv: f32,
    tick_ms: u64,
) -> Reading
where
    A: AnalogInput + ?Sized,
{
    let raw_count = average_raw(analog, channel, samples, spacing, adc_max).await;
    Reading {
        channel,
        raw_count,
        voltage_mv: voltage_mv(raw_count, adc_max, v_ref_mv),
        tick_ms,
    }
}
