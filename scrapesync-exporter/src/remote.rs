use std::{net::Ipv6Addr, time::Duration};

use bytes::Bytes;
use http::{Method, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::{trace, warn};

use crate::{
    http_util,
    resolve::{AddressResolver, ResolveError},
};

/// Outcome of one API call. Transport errors, timeouts, non-200 answers
/// and undecodable bodies all collapse into `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<T> {
    Data(T),
    Empty,
}

impl<T> Payload<T> {
    pub fn ok_or<E>(self, err: E) -> Result<T, E> {
        match self {
            Payload::Data(data) => Ok(data),
            Payload::Empty => Err(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteApiClient {
    resolver: AddressResolver,
    instance: String,
    port: u16,
    timeout: Duration,
    prefer_ipv6: bool,
}

impl RemoteApiClient {
    pub fn new(
        resolver: AddressResolver,
        instance: impl Into<String>,
        port: u16,
        timeout: Duration,
        prefer_ipv6: bool,
    ) -> Self {
        Self {
            resolver,
            instance: instance.into(),
            port,
            timeout,
            prefer_ipv6,
        }
    }

    /// `http://<resolved address>:<port>`, re-resolved on every call.
    pub async fn base_url(&self) -> Result<String, ResolveError> {
        let address = self.resolver.resolve(&self.instance).await?;
        let host = if address.parse::<Ipv6Addr>().is_ok() {
            format!("[{address}]")
        } else {
            address
        };
        Ok(format!("http://{host}:{}", self.port))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Payload<T> {
        match tokio::time::timeout(self.timeout, fetch_json(url, self.prefer_ipv6)).await {
            Ok(Ok(data)) => Payload::Data(data),
            Ok(Err(e)) => {
                warn!("GET {url} failed: {e:#}");
                Payload::Empty
            }
            Err(_) => {
                warn!("GET {url} timed out after {:?}", self.timeout);
                Payload::Empty
            }
        }
    }
}

async fn fetch_json<T: DeserializeOwned>(url: &str, prefer_ipv6: bool) -> anyhow::Result<T> {
    let req = http_util::basic_request_builder(url, Method::GET)?
        .header(header::ACCEPT, "application/json")
        .body(Bytes::new())?;

    let resp = http_util::send_http_request(req, prefer_ipv6).await?;

    if resp.status() != StatusCode::OK {
        anyhow::bail!(
            "HTTP error: [{}]{}",
            resp.status().as_u16(),
            String::from_utf8_lossy(resp.body())
        );
    }

    trace!("decoding {} bytes from {url}", resp.body().len());
    Ok(serde_json::from_slice(resp.body())?)
}
