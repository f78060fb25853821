use std::{net::IpAddr, time::Duration};

use confique::Config;
use scrapesync_proto::ScrapeTargetIdentity;

use crate::{extract::ConfigExtractor, remote::RemoteApiClient, resolve::AddressResolver};

#[derive(Config, Debug)]
pub struct Conf {
    #[config(nested)]
    pub exporter: ExporterConf,

    #[config(nested)]
    pub remote: RemoteConf,

    #[config(nested)]
    pub target: TargetConf,

    #[config(nested)]
    pub sync: SyncConf,
}

/// Metrics exposition endpoint
#[derive(Config, Debug)]
pub struct ExporterConf {
    /// Port to listen on
    #[config(default = 8000, env = "SCRAPESYNC_PORT")]
    pub port: u16,

    /// Bind address
    #[config(default = "0.0.0.0", env = "SCRAPESYNC_ADDRESS")]
    pub address: IpAddr,
}

/// The monitoring system whose scrape cadence we follow
#[derive(Config, Debug)]
pub struct RemoteConf {
    /// Logical instance name handed to the inventory command
    #[config(default = "prometheus/0")]
    pub instance: String,

    /// Inventory command printing YAML keyed by instance name; the
    /// instance is appended as the last argument
    #[config(default = ["juju", "show-unit"])]
    pub inventory_command: Vec<String>,

    #[config(default = 10)]
    pub resolve_timeout_secs: u64,

    /// Static address, bypasses the inventory command when set
    #[config(env = "SCRAPESYNC_REMOTE_ADDRESS")]
    pub address: Option<String>,

    #[config(default = 9090)]
    pub port: u16,

    #[config(default = 2000)]
    pub request_timeout_ms: u64,

    #[config(default = false)]
    pub prefer_ipv6: bool,
}

/// Our own entry in the monitoring system's target list
#[derive(Config, Debug)]
pub struct TargetConf {
    #[config(default = "192.168.1.101:9001", env = "SCRAPESYNC_TARGET")]
    pub address: String,
}

#[derive(Config, Debug)]
pub struct SyncConf {
    /// Delay between interval discovery attempts at startup
    #[config(default = 2000)]
    pub bootstrap_retry_ms: u64,

    /// Number of CPU samples averaged into `cpu_percent`
    #[config(default = 10)]
    pub cpu_window: usize,
}

pub fn load(path: &str) -> anyhow::Result<Conf> {
    Conf::builder()
        .env()
        .file(path)
        .load()
        .map_err(|e| e.into())
}

impl Conf {
    pub fn resolver(&self) -> AddressResolver {
        match &self.remote.address {
            Some(address) => AddressResolver::fixed(address.clone()),
            None => AddressResolver::new(
                self.remote.inventory_command.clone(),
                Duration::from_secs(self.remote.resolve_timeout_secs),
            ),
        }
    }

    pub fn extractor(&self) -> ConfigExtractor {
        let client = RemoteApiClient::new(
            self.resolver(),
            self.remote.instance.clone(),
            self.remote.port,
            Duration::from_millis(self.remote.request_timeout_ms),
            self.remote.prefer_ipv6,
        );
        ConfigExtractor::new(client, ScrapeTargetIdentity::new(self.target.address.clone()))
    }

    pub fn bootstrap_retry(&self) -> Duration {
        Duration::from_millis(self.sync.bootstrap_retry_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let conf = Conf::builder()
            .file("/nonexistent/scrapesync.toml")
            .load()
            .unwrap();

        assert_eq!(conf.exporter.port, 8000);
        assert_eq!(conf.remote.instance, "prometheus/0");
        assert_eq!(conf.remote.inventory_command, vec!["juju", "show-unit"]);
        assert_eq!(conf.remote.port, 9090);
        assert_eq!(conf.remote.request_timeout_ms, 2000);
        assert!(conf.remote.address.is_none());
        assert_eq!(conf.target.address, "192.168.1.101:9001");
        assert_eq!(conf.bootstrap_retry(), Duration::from_secs(2));
        assert_eq!(conf.sync.cpu_window, 10);
    }

    #[test]
    fn file_overrides_defaults() {
        let path = std::env::temp_dir().join(format!("scrapesync-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            [exporter]
            port = 9100

            [remote]
            address = "10.0.0.5"
            inventory_command = ["lxc", "info"]

            [target]
            address = "10.0.0.6:9001"
            "#,
        )
        .unwrap();

        let conf = Conf::builder().file(&path).load();
        std::fs::remove_file(&path).ok();
        let conf = conf.unwrap();

        assert_eq!(conf.exporter.port, 9100);
        assert_eq!(conf.remote.address.as_deref(), Some("10.0.0.5"));
        assert_eq!(conf.remote.inventory_command, vec!["lxc", "info"]);
        assert_eq!(conf.extractor().identity().address, "10.0.0.6:9001");
    }

    #[tokio::test]
    async fn static_address_skips_inventory() {
        let conf = Conf::builder()
            .file("/nonexistent/scrapesync.toml")
            .load()
            .unwrap();
        let resolver = Conf {
            remote: RemoteConf {
                address: Some("10.0.0.5".into()),
                ..conf.remote
            },
            ..conf
        }
        .resolver();

        assert_eq!(resolver.resolve("prometheus/0").await.unwrap(), "10.0.0.5");
    }
}
