use log::{debug, info};
use std::env;
use std::num::{NonZeroU16, NonZeroU32};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::RigError;
use crate::pipeline::transfer::{EcCorrection, LinearMap};

/// Knobs of the acquisition pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Full-scale ADC count (12-bit converter)
    pub adc_max: u16,
    /// ADC reference voltage in millivolts
    pub v_ref_mv: f32,
    pub ph_samples: NonZeroU16,
    pub ec_samples: NonZeroU16,
    pub turbidity_samples: NonZeroU16,
    /// Delay between consecutive samples of any oversampled channel
    pub sample_spacing: Duration,
    /// Time the probe needs for a temperature conversion
    pub probe_conversion: Duration,
    /// Temperature substituted when the probe cannot be read
    pub fallback_temperature_c: f32,
    pub ec_correction: EcCorrection,
    /// Turbidity voltage (V) to NTU map
    pub turbidity_map: LinearMap,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            adc_max: 4095,
            v_ref_mv: 3300.0,
            ph_samples: NonZeroU16::MIN,
            ec_samples: NonZeroU16::MIN,
            turbidity_samples: NonZeroU16::new(5).unwrap_or(NonZeroU16::MIN),
            sample_spacing: Duration::from_millis(500),
            probe_conversion: Duration::from_millis(750),
            fallback_temperature_c: 25.0,
            ec_correction: EcCorrection::default(),
            turbidity_map: LinearMap::new(0.0, 3.3, 0.0, 1000.0),
        }
    }
}

/// Bounded retry policy for cloud database calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Upper bound for a single attempt, connection included
    pub attempt_timeout: Duration,
    pub max_attempts: NonZeroU32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(5),
            max_attempts: NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RigConfig {
    pub database_url: Option<String>,
    pub eeprom_path: PathBuf,
    pub sample_interval: Duration,
    pub pump_poll_interval: Duration,
    pub pump_duration: Duration,
    pub pipeline: PipelineConfig,
    pub retry: RetryPolicy,
}

impl RigConfig {
    /// Load configuration from the environment (and `.env` if present)
    pub fn new() -> Result<Self, RigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    ///
    /// Every value is parsed and validated here so that a bad setting stops
    /// the service at startup instead of surfacing mid-cycle.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = PipelineConfig::default();
        let retry_defaults = RetryPolicy::default();

        let adc_max: u16 = parse_var(&lookup, "ADC_MAX", defaults.adc_max)?;
        if adc_max == 0 {
            return Err(RigError::Config("ADC_MAX must be greater than zero".into()));
        }

        let v_ref_mv: f32 = parse_var(&lookup, "V_REF_MV", defaults.v_ref_mv)?;
        if !(v_ref_mv > 0.0) {
            return Err(RigError::Config("V_REF_MV must be positive".into()));
        }

        let ec_correction = EcCorrection {
            threshold_ms_cm: parse_var(
                &lookup,
                "EC_CORRECTION_THRESHOLD",
                defaults.ec_correction.threshold_ms_cm,
            )?,
            factor: parse_var(&lookup, "EC_CORRECTION_FACTOR", defaults.ec_correction.factor)?,
        };
        if !(ec_correction.factor > 0.0) {
            return Err(RigError::Config("EC_CORRECTION_FACTOR must be positive".into()));
        }

        let turbidity_map = LinearMap::new(
            parse_var(&lookup, "TURBIDITY_MIN_V", defaults.turbidity_map.domain_min)?,
            parse_var(&lookup, "TURBIDITY_MAX_V", defaults.turbidity_map.domain_max)?,
            parse_var(&lookup, "TURBIDITY_MIN_NTU", defaults.turbidity_map.range_min)?,
            parse_var(&lookup, "TURBIDITY_MAX_NTU", defaults.turbidity_map.range_max)?,
        );
        if !(turbidity_map.domain_max > turbidity_map.domain_min) {
            return Err(RigError::Config(
                "TURBIDITY_MAX_V must be greater than TURBIDITY_MIN_V".into(),
            ));
        }

        let pipeline = PipelineConfig {
            adc_max,
            v_ref_mv,
            ph_samples: parse_samples(&lookup, "PH_SAMPLES", defaults.ph_samples)?,
            ec_samples: parse_samples(&lookup, "EC_SAMPLES", defaults.ec_samples)?,
            turbidity_samples: parse_samples(
                &lookup,
                "TURBIDITY_SAMPLES",
                defaults.turbidity_samples,
            )?,
            sample_spacing: Duration::from_millis(parse_var(
                &lookup,
                "SAMPLE_SPACING_MS",
                defaults.sample_spacing.as_millis() as u64,
            )?),
            probe_conversion: Duration::from_millis(parse_var(
                &lookup,
                "PROBE_CONVERSION_MS",
                defaults.probe_conversion.as_millis() as u64,
            )?),
            fallback_temperature_c: parse_var(
                &lookup,
                "FALLBACK_TEMPERATURE_C",
                defaults.fallback_temperature_c,
            )?,
            ec_correction,
            turbidity_map,
        };

        let max_attempts: u32 = parse_var(
            &lookup,
            "SYNC_MAX_ATTEMPTS",
            retry_defaults.max_attempts.get(),
        )?;
        let retry = RetryPolicy {
            attempt_timeout: Duration::from_secs(parse_var(
                &lookup,
                "SYNC_TIMEOUT_SECS",
                retry_defaults.attempt_timeout.as_secs(),
            )?),
            max_attempts: NonZeroU32::new(max_attempts)
                .ok_or_else(|| RigError::Config("SYNC_MAX_ATTEMPTS must be at least 1".into()))?,
            initial_backoff: Duration::from_millis(parse_var(
                &lookup,
                "SYNC_BACKOFF_MS",
                retry_defaults.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: retry_defaults.max_backoff,
        };

        let sample_interval = Duration::from_secs(parse_var(&lookup, "SAMPLE_INTERVAL_SECS", 10)?);
        if sample_interval.is_zero() {
            return Err(RigError::Config("SAMPLE_INTERVAL_SECS must be at least 1".into()));
        }
        let pump_poll_interval = Duration::from_secs(parse_var(&lookup, "PUMP_POLL_SECS", 10)?);
        if pump_poll_interval.is_zero() {
            return Err(RigError::Config("PUMP_POLL_SECS must be at least 1".into()));
        }

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());
        let eeprom_path =
            PathBuf::from(lookup("EEPROM_PATH").unwrap_or_else(|| "calibration.eeprom".into()));

        let config = RigConfig {
            database_url,
            eeprom_path,
            sample_interval,
            pump_poll_interval,
            pump_duration: Duration::from_secs(parse_var(&lookup, "PUMP_DURATION_SECS", 10)?),
            pipeline,
            retry,
        };

        info!(
            "Configuration loaded: interval={}s, turbidity samples={}, EC correction x{} below {} ms/cm",
            config.sample_interval.as_secs(),
            config.pipeline.turbidity_samples,
            config.pipeline.ec_correction.factor,
            config.pipeline.ec_correction.threshold_ms_cm
        );
        debug!("Full configuration: {:?}", config);

        Ok(config)
    }

    pub fn require_database_url(&self) -> Result<&str, RigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| RigError::Config("DATABASE_URL environment variable not set".into()))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> Result<T, RigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RigError::Config(format!("{} has invalid value '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_samples<F>(lookup: &F, key: &str, default: NonZeroU16) -> Result<NonZeroU16, RigError>
where
    F: Fn(&str) -> Option<String>,
{
    let samples: u16 = parse_var(lookup, key, default.get())?;
    NonZeroU16::new(samples).ok_or_else(|| RigError::Config(format!("{} must be at least 1", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<RigConfig, RigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RigConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_rig_hardware() {
        let config = load(&[]).unwrap();
        assert_eq!(config.pipeline.adc_max, 4095);
        assert_eq!(config.pipeline.v_ref_mv, 3300.0);
        assert_eq!(config.pipeline.turbidity_samples.get(), 5);
        assert_eq!(config.pipeline.ph_samples.get(), 1);
        assert_eq!(config.pipeline.sample_spacing, Duration::from_millis(500));
        assert_eq!(config.pipeline.fallback_temperature_c, 25.0);
        assert_eq!(config.pipeline.ec_correction.threshold_ms_cm, 1.0);
        assert_eq!(config.pipeline.ec_correction.factor, 1.5);
        assert_eq!(config.sample_interval, Duration::from_secs(10));
        assert_eq!(config.pump_duration, Duration::from_secs(10));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn zero_sample_count_is_rejected_at_startup() {
        let err = load(&[("TURBIDITY_SAMPLES", "0")]).unwrap_err();
        assert!(matches!(err, RigError::Config(msg) if msg.contains("TURBIDITY_SAMPLES")));
    }

    #[test]
    fn unparsable_value_names_the_variable() {
        let err = load(&[("EC_CORRECTION_FACTOR", "lots")]).unwrap_err();
        assert!(matches!(err, RigError::Config(msg) if msg.contains("EC_CORRECTION_FACTOR")));
    }

    #[test]
    fn correction_policy_is_tunable() {
        let config = load(&[
            ("EC_CORRECTION_THRESHOLD", "0.8"),
            ("EC_CORRECTION_FACTOR", "1.2"),
        ])
        .unwrap();
        assert_eq!(config.pipeline.ec_correction.threshold_ms_cm, 0.8);
        assert_eq!(config.pipeline.ec_correction.factor, 1.2);
    }

    #[test]
    fn sample_spacing_applies_to_every_oversampled_channel() {
        let config = load(&[("SAMPLE_SPACING_MS", "250"), ("PH_SAMPLES", "3")]).unwrap();
        assert_eq!(config.pipeline.sample_spacing, Duration::from_millis(250));
        assert_eq!(config.pipeline.ph_samples.get(), 3);
    }

    #[test]
    fn degenerate_turbidity_domain_is_rejected() {
        assert!(load(&[("TURBIDITY_MIN_V", "3.3")]).is_err());
    }

    #[test]
    fn zero_retry_attempts_is_rejected() {
        assert!(load(&[("SYNC_MAX_ATTEMPTS", "0")]).is_err());
    }

    #[test]
    fn blank_database_url_counts_as_missing() {
        let config = load(&[("DATABASE_URL", "  ")]).unwrap();
        assert!(config.require_database_url().is_err());

        let config = load(&[("DATABASE_URL", "postgres://rig@db/water")]).unwrap();
        assert_eq!(config.require_database_url().unwrap(), "postgres://rig@db/water");
    }
}
