use std::{num::NonZeroU64, str::FromStr};

use serde::{Deserialize, Serialize};

/// The subset of the monitored system's running configuration we read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub scrape_configs: Vec<ScrapeConfig>,
}

impl PrometheusConfig {
    pub fn from_yaml(doc: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(doc)
    }

    /// Interval of `config`, falling back to the global default.
    pub fn interval_of(&self, config: &ScrapeConfig) -> Result<ScrapeInterval, IntervalParseError> {
        config
            .scrape_interval
            .as_deref()
            .or(self.global.scrape_interval.as_deref())
            .ok_or(IntervalParseError::Missing)?
            .parse()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub scrape_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub scrape_interval: Option<String>,
    #[serde(default)]
    pub static_configs: Vec<StaticConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticConfig {
    #[serde(default)]
    pub targets: Vec<String>,
}

/// A scrape interval in whole seconds. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScrapeInterval(NonZeroU64);

impl ScrapeInterval {
    pub fn from_secs(secs: u64) -> Option<Self> {
        NonZeroU64::new(secs).map(Self)
    }

    pub fn as_secs(&self) -> u64 {
        self.0.get()
    }

    /// Whether the wall-clock second `unix_secs` sits on an interval boundary.
    pub fn is_boundary(&self, unix_secs: i64) -> bool {
        unix_secs.rem_euclid(self.0.get() as i64) == 0
    }
}

impl std::fmt::Display for ScrapeInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}s", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntervalParseError {
    #[error("no scrape interval configured")]
    Missing,
    #[error("malformed scrape interval {0:?}")]
    Malformed(String),
    #[error("unsupported unit in scrape interval {0:?}")]
    UnsupportedUnit(String),
    #[error("scrape interval must be positive, got {0:?}")]
    NotPositive(String),
}

impl FromStr for ScrapeInterval {
    type Err = IntervalParseError;

    /// Accepts `<integer><unit>` where unit is one of `s m h d w y`.
    /// Sub-second and compound durations are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| IntervalParseError::Malformed(s.to_owned()))?;
        let (value, unit) = s.split_at(split);
        if value.is_empty() {
            return Err(IntervalParseError::Malformed(s.to_owned()));
        }

        let multiplier = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            "w" => 7 * 24 * 60 * 60,
            "y" => 365 * 24 * 60 * 60,
            _ if unit.chars().all(|c| c.is_ascii_alphabetic()) => {
                return Err(IntervalParseError::UnsupportedUnit(s.to_owned()));
            }
            _ => return Err(IntervalParseError::Malformed(s.to_owned())),
        };

        let value: u64 = value
            .parse()
            .map_err(|_| IntervalParseError::Malformed(s.to_owned()))?;
        let secs = value
            .checked_mul(multiplier)
            .ok_or_else(|| IntervalParseError::Malformed(s.to_owned()))?;

        ScrapeInterval::from_secs(secs).ok_or_else(|| IntervalParseError::NotPositive(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
global:
  scrape_interval: 1m
  scrape_timeout: 10s
scrape_configs:
- job_name: prometheus
  scrape_interval: 5s
  static_configs:
  - targets:
    - localhost:9090
- job_name: avalanche
  honor_timestamps: true
  scrape_interval: 10s
  metrics_path: /metrics
  static_configs:
  - targets:
    - 192.168.1.101:9001
- job_name: defaults
  static_configs:
  - targets:
    - 10.1.1.1:80
"#;

    fn secs(s: &str) -> Result<u64, IntervalParseError> {
        s.parse::<ScrapeInterval>().map(|i| i.as_secs())
    }

    #[test]
    fn parse_seconds() {
        assert_eq!(secs("10s"), Ok(10));
        assert_eq!(secs("15s"), Ok(15));
        assert_eq!(secs(" 1s "), Ok(1));
    }

    #[test]
    fn parse_larger_units() {
        assert_eq!(secs("1m"), Ok(60));
        assert_eq!(secs("2h"), Ok(7200));
        assert_eq!(secs("1d"), Ok(86400));
    }

    #[test]
    fn reject_zero() {
        assert_eq!(secs("0s"), Err(IntervalParseError::NotPositive("0s".into())));
    }

    #[test]
    fn reject_subsecond_and_compound() {
        assert!(matches!(secs("500ms"), Err(IntervalParseError::UnsupportedUnit(_))));
        assert!(matches!(secs("1m30s"), Err(IntervalParseError::Malformed(_))));
        assert!(matches!(secs("1.5s"), Err(IntervalParseError::Malformed(_))));
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(secs(""), Err(IntervalParseError::Malformed(_))));
        assert!(matches!(secs("10"), Err(IntervalParseError::Malformed(_))));
        assert!(matches!(secs("s"), Err(IntervalParseError::Malformed(_))));
        assert!(matches!(secs("-5s"), Err(IntervalParseError::Malformed(_))));
    }

    #[test]
    fn boundary_uses_absolute_time() {
        let interval = ScrapeInterval::from_secs(10).unwrap();

        assert!(interval.is_boundary(1_700_000_000));
        assert!(!interval.is_boundary(1_700_000_005));
        assert!(interval.is_boundary(0));
    }

    #[test]
    fn interval_from_embedded_document() {
        let config = PrometheusConfig::from_yaml(CONFIG).unwrap();
        let ours = &config.scrape_configs[1];

        assert_eq!(ours.job_name.as_deref(), Some("avalanche"));
        assert_eq!(config.interval_of(ours).map(|i| i.as_secs()), Ok(10));
    }

    #[test]
    fn interval_falls_back_to_global() {
        let config = PrometheusConfig::from_yaml(CONFIG).unwrap();

        assert_eq!(
            config.interval_of(&config.scrape_configs[2]).map(|i| i.as_secs()),
            Ok(60)
        );
    }

    #[test]
    fn interval_missing_everywhere() {
        let config = PrometheusConfig::from_yaml("scrape_configs:\n- job_name: x\n").unwrap();

        assert_eq!(
            config.interval_of(&config.scrape_configs[0]),
            Err(IntervalParseError::Missing)
        );
    }

    #[test]
    fn select_scrape_config_by_static_targets() {
        let config = PrometheusConfig::from_yaml(CONFIG).unwrap();
        let identity = crate::ScrapeTargetIdentity::new("192.168.1.101:9001");

        let (ours, count) = identity.select_scrape_config(&config.scrape_configs).unwrap();

        assert_eq!(count, 1);
        assert_eq!(ours.scrape_interval.as_deref(), Some("10s"));
        assert_eq!(identity.job_names(&config.scrape_configs), vec!["avalanche"]);
    }
}
