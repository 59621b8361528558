//! TOML configuration.
//!
//! Scalar keys that are present but malformed fall back to their default with
//! a warning. A malformed tier table is an error, since there is no sensible
//! guess for it.

use crate::constants::*;
use crate::driver::DriverSettings;
use crate::governor::GovernorSettings;
use log::{info, warn};
use serde::Serialize;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Syntax(#[from] toml::de::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Target rates, index 0 preferred, and the floor each tier must hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierConfig {
    pub target: Vec<f64>,
    pub minimum: Vec<f64>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET_RATES.to_vec(),
            minimum: DEFAULT_MINIMUM_RATES.to_vec(),
        }
    }
}

/// Synthetic per-frame cost used by the demo binaries in place of a real table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkloadSettings {
    #[serde(rename = "base-cost")]
    pub base_cost_ms: f64,
    #[serde(rename = "stage-cost")]
    pub stage_cost_ms: f64,
    /// Frames per stage; 0 keeps the first stage forever.
    pub stage_frames: u64,
}

impl WorkloadSettings {
    /// Milliseconds of work per frame during `stage`.
    pub fn cost_ms(&self, stage: u64) -> f64 {
        self.base_cost_ms + stage as f64 * self.stage_cost_ms
    }

    pub fn stage_at(&self, frame: u64) -> u64 {
        if self.stage_frames == 0 {
            0
        } else {
            frame / self.stage_frames
        }
    }
}

impl Default for WorkloadSettings {
    fn default() -> Self {
        Self {
            base_cost_ms: 4.0,
            stage_cost_ms: 6.0,
            stage_frames: 1500,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReportConfig {
    /// Print the final report as JSON.
    pub json: bool,
}

/// Serializes to the same layout and key names the loader reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    pub tiers: TierConfig,
    pub hysteresis: GovernorSettings,
    pub driver: DriverSettings,
    pub workload: WorkloadSettings,
    pub report: ReportConfig,
}

impl Config {
    /// `$XDG_CONFIG_HOME/frame-rate-governor/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("frame-rate-governor");
        path.push("config.toml");
        Some(path)
    }

    /// Loads `path`, or the default location if it exists, or built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => {
                    info!("no config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        info!("loading config from {}", path.display());
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let table: Table = toml::from_str(content)?;
        Self::from_table(&table)
    }

    pub fn from_table(config: &Table) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tiers = config.get("tiers").and_then(Value::as_table);
        let target = match tiers.and_then(|t| t.get("target")) {
            Some(v) => rate_list(v, "tiers.target")?,
            None => defaults.tiers.target,
        };
        if target.is_empty() {
            return Err(ConfigError::Invalid("tiers.target must not be empty".into()));
        }
        let minimum = match tiers.and_then(|t| t.get("minimum")) {
            Some(v) => rate_list(v, "tiers.minimum")?,
            // Only the default ladder has matching default minimums.
            None if tiers.and_then(|t| t.get("target")).is_none() => defaults.tiers.minimum,
            None => Vec::new(),
        };
        if minimum.len() + 1 < target.len() {
            return Err(ConfigError::Invalid(format!(
                "tiers.minimum needs at least {} entries for {} target rates",
                target.len() - 1,
                target.len()
            )));
        }
        if target.windows(2).any(|pair| pair[1] > pair[0]) {
            warn!("tiers.target is not in descending order; demotion may raise the frame rate");
        }
        for (i, (min, next)) in minimum.iter().zip(target.iter().skip(1)).enumerate() {
            if min < next || *min > target[i] {
                warn!(
                    "tiers.minimum[{i}] = {min} is outside [{next}, {}], tier {i} may behave oddly",
                    target[i]
                );
            }
        }

        let section = "hysteresis";
        let table = config.get(section).and_then(Value::as_table);
        let base = defaults.hysteresis;
        let hysteresis = GovernorSettings {
            frame_history_size: read(table, section, "history-size", base.frame_history_size, |v| {
                positive(v).and_then(|v| usize::try_from(v).map_err(|_| "is too large".into()))
            }),
            max_good_frames: read(table, section, "max-good-frames", base.max_good_frames, |v| {
                non_negative(v).and_then(to_u32)
            }),
            max_slow_frames: read(table, section, "max-slow-frames", base.max_slow_frames, |v| {
                positive(v).and_then(to_u32)
            }),
            allow_reducing: read(table, section, "allow-reducing", base.allow_reducing, boolean),
            allow_locking: read(table, section, "allow-locking", base.allow_locking, boolean),
        };

        let section = "driver";
        let table = config.get(section).and_then(Value::as_table);
        let base = defaults.driver;
        let driver = DriverSettings {
            inactive_sleep_ms: read(
                table,
                section,
                "inactive-sleep",
                base.inactive_sleep_ms,
                positive,
            ),
            report_every: read(table, section, "report-every", base.report_every, non_negative),
            // 0 = run until stopped
            max_frames: read(table, section, "max-frames", base.max_frames, |v| {
                non_negative(v).map(|v| (v > 0).then_some(v))
            }),
        };

        let section = "workload";
        let table = config.get(section).and_then(Value::as_table);
        let base = defaults.workload;
        let workload = WorkloadSettings {
            base_cost_ms: read(table, section, "base-cost", base.base_cost_ms, non_negative_number),
            stage_cost_ms: read(
                table,
                section,
                "stage-cost",
                base.stage_cost_ms,
                non_negative_number,
            ),
            stage_frames: read(table, section, "stage-frames", base.stage_frames, non_negative),
        };

        let report = config.get("report").and_then(Value::as_table);
        let report = ReportConfig {
            json: read(report, "report", "json", defaults.report.json, boolean),
        };

        Ok(Self {
            tiers: TierConfig { target, minimum },
            hysteresis,
            driver,
            workload,
            report,
        })
    }
}

/// Reads `section.key`, falling back to `default` when missing or invalid.
fn read<T: Debug>(
    table: Option<&Table>,
    section: &str,
    key: &str,
    default: T,
    parse: impl FnOnce(&Value) -> Result<T, String>,
) -> T {
    match table.and_then(|t| t.get(key)) {
        None => default,
        Some(value) => parse(value).unwrap_or_else(|s| {
            warn!("{section}.{key} {s}, replaced with the default of {default:?}");
            default
        }),
    }
}

fn non_negative(v: &Value) -> Result<u64, String> {
    v.as_integer()
        .ok_or("must be an integer".to_string())
        .and_then(|v| u64::try_from(v).map_err(|_| "must not be negative".to_string()))
}

fn to_u32(v: u64) -> Result<u32, String> {
    u32::try_from(v).map_err(|_| format!("cannot be greater than {}", u32::MAX))
}

fn positive(v: &Value) -> Result<u64, String> {
    non_negative(v).and_then(|v| (v > 0).then_some(v).ok_or("must be positive".into()))
}

fn non_negative_number(v: &Value) -> Result<f64, String> {
    v.as_float()
        .or_else(|| v.as_integer().map(|v| v as f64))
        .ok_or("must be a number".to_string())
        .and_then(|v| {
            (v.is_finite() && v >= 0.0)
                .then_some(v)
                .ok_or("must not be negative".into())
        })
}

fn boolean(v: &Value) -> Result<bool, String> {
    v.as_bool().ok_or("must be true or false".into())
}

fn rate_list(value: &Value, name: &str) -> Result<Vec<f64>, ConfigError> {
    let array = value
        .as_array()
        .ok_or_else(|| ConfigError::Invalid(format!("{name} must be an array")))?;
    array
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_float()
                .or_else(|| v.as_integer().map(|v| v as f64))
                .filter(|v| v.is_finite() && *v > 0.0)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("{name}[{i}] must be a positive number"))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.tiers.target, vec![60.0, 50.0, 45.0, 40.0, 30.0]);
        assert_eq!(config.tiers.minimum, vec![57.0, 48.0, 43.0, 38.0]);
        assert_eq!(config.hysteresis.frame_history_size, 10);
        assert_eq!(config.driver.max_frames, None);
    }

    #[test]
    fn reads_every_section() {
        let config = Config::parse(
            r#"
            [tiers]
            target = [120, 60]
            minimum = [110]

            [hysteresis]
            history-size = 20
            max-good-frames = 0
            max-slow-frames = 30
            allow-reducing = false
            allow-locking = false

            [driver]
            inactive-sleep = 100
            report-every = 0
            max-frames = 600

            [workload]
            base-cost = 2
            stage-cost = 1.5
            stage-frames = 0

            [report]
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.tiers.target, vec![120.0, 60.0]);
        assert_eq!(config.tiers.minimum, vec![110.0]);
        assert_eq!(
            config.hysteresis,
            GovernorSettings {
                frame_history_size: 20,
                max_good_frames: 0,
                max_slow_frames: 30,
                allow_reducing: false,
                allow_locking: false,
            }
        );
        assert_eq!(config.driver.inactive_sleep_ms, 100);
        assert_eq!(config.driver.report_every, 0);
        assert_eq!(config.driver.max_frames, Some(600));
        assert_eq!(config.workload.cost_ms(2), 5.0);
        assert_eq!(config.workload.stage_at(10_000), 0);
        assert!(config.report.json);
    }

    #[test]
    fn serialized_config_loads_back_unchanged() {
        let config = Config::parse(
            r#"
            [tiers]
            target = [90, 45]
            minimum = [85.5]

            [hysteresis]
            history-size = 4
            max-slow-frames = 12

            [driver]
            inactive-sleep = 50
            max-frames = 900

            [workload]
            base-cost = 1.5
            stage-cost = 3

            [report]
            json = true
            "#,
        )
        .unwrap();

        let written = toml::to_string(&config).unwrap();
        assert!(written.contains("history-size = 4"), "{written}");
        assert!(written.contains("inactive-sleep = 50"), "{written}");
        assert!(written.contains("base-cost = 1.5"), "{written}");
        assert_eq!(Config::parse(&written).unwrap(), config);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["hysteresis"]["history-size"], 4);
        assert_eq!(json["driver"]["inactive-sleep"], 50);
        assert_eq!(json["report"]["json"], true);
    }

    #[test]
    fn invalid_scalars_fall_back_to_defaults() {
        let config = Config::parse(
            r#"
            [hysteresis]
            history-size = 0
            max-slow-frames = "lots"
            allow-locking = 1

            [driver]
            max-frames = 0
            inactive-sleep = -5
            "#,
        )
        .unwrap();

        assert_eq!(config.hysteresis, GovernorSettings::default());
        assert_eq!(config.driver.max_frames, None);
        assert_eq!(config.driver.inactive_sleep_ms, DEFAULT_INACTIVE_SLEEP_MILLIS);
    }

    #[test]
    fn custom_targets_without_minimums_need_single_tier() {
        let config = Config::parse("[tiers]\ntarget = [30]\n").unwrap();
        assert_eq!(config.tiers.target, vec![30.0]);
        assert!(config.tiers.minimum.is_empty());

        let err = Config::parse("[tiers]\ntarget = [60, 30]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_tiers_are_errors() {
        for content in [
            "[tiers]\ntarget = 60\n",
            "[tiers]\ntarget = []\n",
            "[tiers]\ntarget = [60, -30]\nminimum = [50]\n",
            "[tiers]\ntarget = [60, 30]\nminimum = [\"fast\"]\n",
        ] {
            assert!(
                matches!(Config::parse(content), Err(ConfigError::Invalid(_))),
                "{content:?} should be rejected"
            );
        }
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(matches!(Config::parse("[tiers"), Err(ConfigError::Syntax(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let path = Path::new("/nonexistent/frame-rate-governor.toml");
        let err = Config::load(Some(path)).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
