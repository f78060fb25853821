use std::future::Future;

use scrapesync_proto::{
    ApiResponse, ConfigData, IntervalParseError, PrometheusConfig, ScrapeInterval,
    ScrapeTargetIdentity, TargetHealth, TargetsData,
};
use tracing::{trace, warn};

use crate::{remote::RemoteApiClient, resolve::ResolveError};

const TARGETS_PATH: &str = "/api/v1/targets";
const CONFIG_PATH: &str = "/api/v1/status/config";

/// What the monitored system last reported about our own target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrapeDurationSample {
    pub seconds: f64,
    /// `health == "up"`
    pub healthy: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("address resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("no data from {0}")]
    EmptyPayload(&'static str),
    #[error("target {0} not found")]
    TargetNotFound(String),
    #[error("malformed configuration document: {0}")]
    ConfigDocument(#[from] serde_yaml::Error),
    #[error("bad scrape interval: {0}")]
    IntervalParse(#[from] IntervalParseError),
}

/// Source of the two remote readings the sync loop needs.
pub trait ScrapeSource {
    fn scrape_duration(
        &self,
    ) -> impl Future<Output = Result<ScrapeDurationSample, ExtractError>> + Send;

    fn scrape_interval(&self) -> impl Future<Output = Result<ScrapeInterval, ExtractError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ConfigExtractor {
    client: RemoteApiClient,
    identity: ScrapeTargetIdentity,
}

impl ConfigExtractor {
    pub fn new(client: RemoteApiClient, identity: ScrapeTargetIdentity) -> Self {
        Self { client, identity }
    }

    pub fn identity(&self) -> &ScrapeTargetIdentity {
        &self.identity
    }
}

impl ScrapeSource for ConfigExtractor {
    async fn scrape_duration(&self) -> Result<ScrapeDurationSample, ExtractError> {
        let url = format!("{}{TARGETS_PATH}", self.client.base_url().await?);
        let targets: ApiResponse<TargetsData> = self
            .client
            .get_json(&url)
            .await
            .ok_or(ExtractError::EmptyPayload(TARGETS_PATH))?;

        let (target, matches) = self
            .identity
            .select_target(&targets.data.active_targets)
            .ok_or_else(|| ExtractError::TargetNotFound(self.identity.to_string()))?;
        if matches > 1 {
            let pools = self.identity.scrape_pools(&targets.data.active_targets);
            warn!(
                identity = %self.identity,
                matches,
                ?pools,
                "target listed more than once, using the first entry"
            );
        }
        trace!(?target, "matched active target");

        Ok(ScrapeDurationSample {
            seconds: target.last_scrape_duration,
            healthy: target.health == TargetHealth::Up,
        })
    }

    async fn scrape_interval(&self) -> Result<ScrapeInterval, ExtractError> {
        let url = format!("{}{CONFIG_PATH}", self.client.base_url().await?);
        let config: ApiResponse<ConfigData> = self
            .client
            .get_json(&url)
            .await
            .ok_or(ExtractError::EmptyPayload(CONFIG_PATH))?;
        let config = PrometheusConfig::from_yaml(&config.data.yaml)?;

        let (scrape_config, matches) = self
            .identity
            .select_scrape_config(&config.scrape_configs)
            .ok_or_else(|| ExtractError::TargetNotFound(self.identity.to_string()))?;
        if matches > 1 {
            let jobs = self.identity.job_names(&config.scrape_configs);
            warn!(
                identity = %self.identity,
                matches,
                ?jobs,
                "target appears in several scrape configs, using the first one"
            );
        }

        Ok(config.interval_of(scrape_config)?)
    }
}
