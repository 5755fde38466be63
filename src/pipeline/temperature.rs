/// One-wire temperature probe read and fallback resolution
use log::{debug, warn};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::RigError;
use crate::hardware::OneWireBus;
use crate::models::ResolvedTemperature;
use crate::utils::crc8;

/// DS18S20 family code
pub const FAMILY_DS18S20: u8 = 0x10;
/// DS18B20 family code
pub const FAMILY_DS18B20: u8 = 0x28;

const CMD_CONVERT_T: u8 = 0x44;
const CMD_READ_SCRATCHPAD: u8 = 0xBE;
const SCRATCHPAD_LEN: usize = 9;

/// Validate a ROM address: CRC over the first seven bytes, then family code
pub fn validate_address(address: &[u8; 8]) -> Result<(), RigError> {
    let crc = crc8(&address[..7]);
    if crc != address[7] {
        return Err(RigError::SensorDataInvalid(format!(
            "address CRC mismatch (computed 0x{:02X}, device sent 0x{:02X})",
            crc, address[7]
        )));
    }
    match address[0] {
        FAMILY_DS18S20 | FAMILY_DS18B20 => Ok(()),
        family => Err(RigError::SensorDataInvalid(format!(
            "device family 0x{:02X} is not recognized",
            family
        ))),
    }
}

/// Read the first probe on the bus, in degrees Celsius
///
/// The search state is always reset afterwards so the next cycle starts
/// from the first device again. A probe that stops answering after the
/// search, or returns a scratchpad with a bad CRC, is rejected.
pub async fn read_probe<B>(bus: &mut B, conversion: Duration) -> Result<f32, RigError>
where
    B: OneWireBus + ?Sized,
{
    let found = bus.search();
    bus.reset_search();
    let address = found.ok_or(RigError::SensorAbsent)?;
    validate_address(&address)?;

    if !bus.reset() {
        return Err(RigError::SensorDataInvalid(
            "no presence pulse before conversion".into(),
        ));
    }
    bus.select(&address);
    bus.write(CMD_CONVERT_T, true);
    if !conversion.is_zero() {
        sleep(conversion).await;
    }

    if !bus.reset() {
        return Err(RigError::SensorDataInvalid(
            "no presence pulse before scratchpad read".into(),
        ));
    }
    bus.select(&address);
    bus.write(CMD_READ_SCRATCHPAD, false);
    let mut scratchpad = [0u8; SCRATCHPAD_LEN];
    for byte in scratchpad.iter_mut() {
        *byte = bus.read();
    }

    let crc = crc8(&scratchpad[..8]);
    if crc != scratchpad[8] {
        return Err(RigError::SensorDataInvalid(format!(
            "scratchpad CRC mismatch (computed 0x{:02X}, device sent 0x{:02X})",
            crc, scratchpad[8]
        )));
    }

    let raw = i16::from_le_bytes([scratchpad[0], scratchpad[1]]);
    debug!("Probe scratchpad {:02X?} -> raw {}", scratchpad, raw);
    Ok(raw as f32 / 16.0)
}

/// Read the probe, substituting `fallback_c` on any failure
///
/// Failures are logged and never propagated: downstream formulas always
/// receive a plausible temperature.
pub async fn resolve_temperature<B>(
    bus: &mut B,
    conversion: Duration,
    fallback_c: f32,
) -> ResolvedTemperature
where
    B: OneWireBus + ?Sized,
{
    match read_probe(bus, conversion).await {
        Ok(celsius) => ResolvedTemperature {
            celsius,
            measured: true,
        },
        Err(e) => {
            warn!(
                "Temperature probe unavailable ({}), using {:.1} C for calculations",
                e, fallback_c
            );
            ResolvedTemperature {
                celsius: fallback_c,
                measured: false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulated::SimulatedOneWire;

    fn address(family: u8) -> [u8; 8] {
        let mut address = [family, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x00];
        address[7] = crc8(&address[..7]);
        address
    }

    #[tokio::test(start_paused = true)]
    async fn reads_valid_probe() {
        let mut bus = SimulatedOneWire::with_address(address(FAMILY_DS18B20), 23.25).steady();
        let resolved = resolve_temperature(&mut bus, Duration::from_millis(750), 25.0).await;
        assert_eq!(
            resolved,
            ResolvedTemperature {
                celsius: 23.25,
                measured: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn accepts_ds18s20_family() {
        let mut bus = SimulatedOneWire::with_address(address(FAMILY_DS18S20), 19.5).steady();
        let celsius = read_probe(&mut bus, Duration::ZERO).await.unwrap();
        assert_eq!(celsius, 19.5);
    }

    #[tokio::test(start_paused = true)]
    async fn negative_temperatures_keep_their_sign() {
        let mut bus = SimulatedOneWire::with_address(address(FAMILY_DS18B20), -10.125).steady();
        let celsius = read_probe(&mut bus, Duration::ZERO).await.unwrap();
        assert_eq!(celsius, -10.125);
    }

    #[tokio::test(start_paused = true)]
    async fn crc_mismatch_falls_back() {
        let mut bad = address(FAMILY_DS18B20);
        bad[7] ^= 0x5A;
        let mut bus = SimulatedOneWire::with_address(bad, 23.0).steady();

        assert!(matches!(
            read_probe(&mut bus, Duration::ZERO).await,
            Err(RigError::SensorDataInvalid(_))
        ));
        let resolved = resolve_temperature(&mut bus, Duration::ZERO, 25.0).await;
        assert_eq!(resolved.celsius, 25.0);
        assert!(!resolved.measured);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_family_falls_back() {
        let mut bus = SimulatedOneWire::with_address(address(0x22), 23.0).steady();

        assert!(matches!(
            read_probe(&mut bus, Duration::ZERO).await,
            Err(RigError::SensorDataInvalid(_))
        ));
        let resolved = resolve_temperature(&mut bus, Duration::ZERO, 25.0).await;
        assert_eq!(resolved.celsius, 25.0);
        assert!(!resolved.measured);
    }

    #[tokio::test(start_paused = true)]
    async fn absent_probe_falls_back() {
        let mut bus = SimulatedOneWire::empty();

        assert!(matches!(
            read_probe(&mut bus, Duration::ZERO).await,
            Err(RigError::SensorAbsent)
        ));
        let resolved = resolve_temperature(&mut bus, Duration::ZERO, 25.0).await;
        assert_eq!(resolved.celsius, 25.0);
        assert!(!resolved.measured);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_is_found_again_on_the_next_cycle() {
        let mut bus = SimulatedOneWire::ds18b20(22.0).steady();
        assert!(read_probe(&mut bus, Duration::ZERO).await.is_ok());
        assert!(read_probe(&mut bus, Duration::ZERO).await.is_ok());
    }

    /// Wraps a healthy probe and breaks it after enumeration
    struct FaultyBus {
        inner: SimulatedOneWire,
        present: bool,
        corrupt_first_read: bool,
        reads: usize,
    }

    impl FaultyBus {
        fn new(present: bool, corrupt_first_read: bool) -> Self {
            Self {
                inner: SimulatedOneWire::ds18b20(21.0).steady(),
                present,
                corrupt_first_read,
                reads: 0,
            }
        }
    }

    impl OneWireBus for FaultyBus {
        fn search(&mut self) -> Option<[u8; 8]> {
            self.inner.search()
        }

        fn reset_search(&mut self) {
            self.inner.reset_search();
        }

        fn reset(&mut self) -> bool {
            self.inner.reset() && self.present
        }

        fn select(&mut self, address: &[u8; 8]) {
            if self.present {
                self.inner.select(address);
            }
        }

        fn write(&mut self, byte: u8, power: bool) {
            self.inner.write(byte, power);
        }

        fn read(&mut self) -> u8 {
            self.reads += 1;
            let byte = self.inner.read();
            if self.corrupt_first_read && self.reads == 1 {
                byte ^ 0x01
            } else {
                byte
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_gone_after_search_falls_back() {
        let mut bus = FaultyBus::new(false, false);

        assert!(matches!(
            read_probe(&mut bus, Duration::ZERO).await,
            Err(RigError::SensorDataInvalid(_))
        ));
        let resolved = resolve_temperature(&mut bus, Duration::ZERO, 25.0).await;
        assert_eq!(resolved.celsius, 25.0);
        assert!(!resolved.measured);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupted_scratchpad_is_rejected() {
        let mut bus = FaultyBus::new(true, true);

        let err = read_probe(&mut bus, Duration::ZERO).await.unwrap_err();
        assert!(err.to_string().contains("scratchpad CRC"));
    }

    #[tokio::test(start_paused = true)]
    async fn wrapped_healthy_probe_still_reads() {
        let mut bus = FaultyBus::new(true, false);
        assert_eq!(read_probe(&mut bus, Duration::ZERO).await.unwrap(), 21.0);
    }

    #[test]
    fn validate_address_reports_family() {
        let err = validate_address(&address(0x3B)).unwrap_err();
        assert!(err.to_string().contains("0x3B"));
    }
}
