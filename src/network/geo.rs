use async_trait::async_trait;
use log::debug;
use lru::LruCache;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{
    net::Ipv4Addr,
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoInfo {
    pub hostname: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub loc: Option<String>,
    pub org: Option<String>,
    pub timezone: Option<String>,
}

#[async_trait]
pub trait GeoLocator: Send + Sync {
    async fn locate(&self, ip: Ipv4Addr) -> anyhow::Result<GeoInfo>;
}

/// ipinfo.io lookups, cached per ip
pub struct IpInfoLocator {
    base: String,
    token: String,
    client: Client,
    cache: Mutex<LruCache<Ipv4Addr, (Instant, GeoInfo)>>,
    max_age: Duration,
}

impl IpInfoLocator {
    pub const BASE_URL: &'static str = "https://ipinfo.io";

    pub fn new(token: impl Into<String>, max_entries: usize, max_age: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            base: Self::BASE_URL.to_string(),
            token: token.into(),
            client,
            cache: Mutex::new(LruCache::new(capacity)),
            max_age,
        })
    }

    fn cached(&self, ip: &Ipv4Addr) -> Option<GeoInfo> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        let hit = cache
            .get(ip)
            .map(|(fetched, info)| (fetched.elapsed() <= self.max_age, info.clone()));

        match hit {
            Some((true, info)) => Some(info),
            Some((false, _)) => {
                cache.pop(ip);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl GeoLocator for IpInfoLocator {
    async fn locate(&self, ip: Ipv4Addr) -> anyhow::Result<GeoInfo> {
        if let Some(info) = self.cached(&ip) {
            return Ok(info);
        }

        let url = format!("{}/{ip}", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("ipinfo lookup of {ip} failed: {status}");
        }

        let info: GeoInfo = resp.json().await?;
        debug!("Located {ip}: {:?}", info.country);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(ip, (Instant::now(), info.clone()));
        Ok(info)
    }
}
