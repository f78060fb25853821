use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod scrape;

pub use scrape::{IntervalParseError, PrometheusConfig, ScrapeConfig, ScrapeInterval};

/// Envelope shared by every `/api/v1/*` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub status: String,
    pub data: T,
}

/// `data` of `GET /api/v1/targets`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetsData {
    #[serde(default)]
    pub active_targets: Vec<ActiveTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTarget {
    #[serde(default)]
    pub discovered_labels: HashMap<String, String>,
    #[serde(default)]
    pub scrape_pool: Option<String>,
    pub health: TargetHealth,
    /// Seconds, as reported by the monitoring system.
    pub last_scrape_duration: f64,
}

impl ActiveTarget {
    pub fn discovered_address(&self) -> Option<&str> {
        self.discovered_labels.get("__address__").map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetHealth {
    Up,
    Down,
    #[serde(other)]
    Unknown,
}

/// `data` of `GET /api/v1/status/config`. The running configuration is
/// carried as a YAML document inside the JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigData {
    pub yaml: String,
}

/// The address/label identifying our own entry in the monitored system's
/// target and scrape-config listings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScrapeTargetIdentity {
    pub address: String,
}

impl ScrapeTargetIdentity {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn matches_target(&self, target: &ActiveTarget) -> bool {
        target.discovered_address() == Some(self.address.as_str())
    }

    /// A scrape config is ours when one of its static target lists is
    /// exactly our address.
    pub fn matches_scrape_config(&self, config: &ScrapeConfig) -> bool {
        config
            .static_configs
            .iter()
            .any(|sc| matches!(sc.targets.as_slice(), [only] if *only == self.address))
    }

    /// First-match selection. Also returns how many entries matched so the
    /// caller can report duplicates.
    pub fn select_target<'a>(
        &self,
        targets: &'a [ActiveTarget],
    ) -> Option<(&'a ActiveTarget, usize)> {
        let mut matches = targets.iter().filter(|t| self.matches_target(t));
        let first = matches.next()?;
        Some((first, 1 + matches.count()))
    }

    /// Scrape pools of every target entry that is ours.
    pub fn scrape_pools<'a>(&self, targets: &'a [ActiveTarget]) -> Vec<&'a str> {
        targets
            .iter()
            .filter(|t| self.matches_target(t))
            .filter_map(|t| t.scrape_pool.as_deref())
            .collect()
    }

    pub fn job_names<'a>(&self, configs: &'a [ScrapeConfig]) -> Vec<&'a str> {
        configs
            .iter()
            .filter(|c| self.matches_scrape_config(c))
            .filter_map(|c| c.job_name.as_deref())
            .collect()
    }

    pub fn select_scrape_config<'a>(
        &self,
        configs: &'a [ScrapeConfig],
    ) -> Option<(&'a ScrapeConfig, usize)> {
        let mut matches = configs.iter().filter(|c| self.matches_scrape_config(c));
        let first = matches.next()?;
        Some((first, 1 + matches.count()))
    }
}

impl std::fmt::Display for ScrapeTargetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGETS: &str = r#"{
        "status": "success",
        "data": {
            "activeTargets": [
                {
                    "discoveredLabels": {"__address__": "10.0.0.7:9100", "job": "node"},
                    "scrapePool": "node",
                    "health": "down",
                    "lastScrapeDuration": 0.012
                },
                {
                    "discoveredLabels": {"__address__": "192.168.1.101:9001", "job": "avalanche"},
                    "scrapePool": "avalanche",
                    "health": "up",
                    "lastScrapeDuration": 0.5
                }
            ],
            "droppedTargets": []
        }
    }"#;

    #[test]
    fn decode_targets_payload() {
        let resp: ApiResponse<TargetsData> = serde_json::from_str(TARGETS).unwrap();

        assert_eq!(resp.status, "success");
        assert_eq!(resp.data.active_targets.len(), 2);
        assert_eq!(
            resp.data.active_targets[1].discovered_address(),
            Some("192.168.1.101:9001")
        );
    }

    #[test]
    fn unknown_health_is_tolerated() {
        let target: ActiveTarget =
            serde_json::from_str(r#"{"health": "flapping", "lastScrapeDuration": 1.0}"#).unwrap();

        assert_eq!(target.health, TargetHealth::Unknown);
        assert_eq!(target.discovered_address(), None);
    }

    #[test]
    fn select_target_by_address() {
        let resp: ApiResponse<TargetsData> = serde_json::from_str(TARGETS).unwrap();
        let identity = ScrapeTargetIdentity::new("192.168.1.101:9001");

        let (target, count) = identity.select_target(&resp.data.active_targets).unwrap();

        assert_eq!(count, 1);
        assert_eq!(target.health, TargetHealth::Up);
        assert_eq!(target.last_scrape_duration, 0.5);
    }

    #[test]
    fn select_target_first_match_wins() {
        let mut resp: ApiResponse<TargetsData> = serde_json::from_str(TARGETS).unwrap();
        let mut duplicate = resp.data.active_targets[1].clone();
        duplicate.last_scrape_duration = 9.0;
        resp.data.active_targets.push(duplicate);
        let identity = ScrapeTargetIdentity::new("192.168.1.101:9001");

        let (target, count) = identity.select_target(&resp.data.active_targets).unwrap();

        assert_eq!(count, 2);
        assert_eq!(target.last_scrape_duration, 0.5);
    }

    #[test]
    fn scrape_pools_of_duplicates() {
        let mut resp: ApiResponse<TargetsData> = serde_json::from_str(TARGETS).unwrap();
        let mut duplicate = resp.data.active_targets[1].clone();
        duplicate.scrape_pool = Some("avalanche-relabelled".into());
        resp.data.active_targets.push(duplicate);
        let identity = ScrapeTargetIdentity::new("192.168.1.101:9001");

        assert_eq!(
            identity.scrape_pools(&resp.data.active_targets),
            vec!["avalanche", "avalanche-relabelled"]
        );
    }

    #[test]
    fn select_target_none() {
        let resp: ApiResponse<TargetsData> = serde_json::from_str(TARGETS).unwrap();
        let identity = ScrapeTargetIdentity::new("127.0.0.1:1");

        assert!(identity.select_target(&resp.data.active_targets).is_none());
    }
}
