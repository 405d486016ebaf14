//! Cloudflare API client and the cache-tag purger built on it.

use std::collections::BTreeSet;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use baragon_core::BaragonService;
use baragon_core::config::EdgeCacheConfig;

use crate::EdgeCachePurger;
use crate::error::{EdgeCacheError, EdgeCacheResult};

const MAX_ZONES_PER_PAGE: u32 = 50;

// ── Wire types ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudflareZone {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudflareResultInfo {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub total_count: u32,
    #[serde(default)]
    pub total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    #[serde(default = "Vec::new")]
    result: Vec<T>,
    #[serde(default)]
    result_info: CloudflareResultInfo,
}

#[derive(Debug, Serialize)]
struct PurgeRequest<'a> {
    files: Vec<String>,
    tags: &'a [String],
}

// ── Client ────────────────────────────────────────────────────────

/// Thin client over the Cloudflare v4 API.
#[derive(Clone)]
pub struct CloudflareClient {
    http: Client,
    api_base: String,
    api_email: String,
    api_key: String,
}

impl CloudflareClient {
    pub fn new(config: &EdgeCacheConfig) -> EdgeCacheResult<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        let mut api_base = config.api_base.clone();
        if !api_base.ends_with('/') {
            api_base.push('/');
        }
        Ok(Self {
            http,
            api_base,
            api_email: config.api_email.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.api_base))
            .header("X-Auth-Email", &self.api_email)
            .header("X-Auth-Key", &self.api_key)
    }

    /// Purge everything tagged with any of `tags` in a zone. Returns
    /// whether the API accepted the purge.
    pub async fn purge_cache(&self, zone_id: &str, tags: &[String]) -> EdgeCacheResult<bool> {
        let body = PurgeRequest {
            files: Vec::new(),
            tags,
        };
        let response = self
            .request(Method::DELETE, &format!("zones/{zone_id}/purge_cache"))
            .json(&body)
            .send()
            .await?;
        let accepted = response.status().is_success();
        debug!(%zone_id, ?tags, status = %response.status(), "purge_cache");
        Ok(accepted)
    }

    /// Every zone of the account.
    pub async fn list_zones(&self) -> EdgeCacheResult<Vec<CloudflareZone>> {
        self.list_all("zones", MAX_ZONES_PER_PAGE).await
    }

    async fn list_all<T: DeserializeOwned>(&self, path: &str, per_page: u32) -> EdgeCacheResult<Vec<T>> {
        let first: ListResponse<T> = self.list_page(path, 1, per_page).await?;
        let total_pages = first.result_info.total_pages;
        let mut items = first.result;

        for page in 2..=total_pages {
            let next: ListResponse<T> = self.list_page(path, page, per_page).await?;
            items.extend(next.result);
        }
        Ok(items)
    }

    async fn list_page<T: DeserializeOwned>(
        &self,
        path: &str,
        page: u32,
        per_page: u32,
    ) -> EdgeCacheResult<ListResponse<T>> {
        let response = self
            .request(Method::GET, path)
            .query(&[("page", page), ("per_page", per_page)])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(EdgeCacheError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ListResponse<T> =
            serde_json::from_str(&body).map_err(|e| EdgeCacheError::Decode(format!("{path}: {e}")))?;
        if !parsed.success {
            return Err(EdgeCacheError::Api {
                status: status.as_u16(),
                body: serde_json::to_string(&parsed.errors).unwrap_or_default(),
            });
        }
        Ok(parsed)
    }
}

// ── Purger ────────────────────────────────────────────────────────

/// Purges a service's cache tag in the zone of each of its edge-cache
/// domains.
pub struct CloudflareEdgeCache {
    client: CloudflareClient,
}

impl CloudflareEdgeCache {
    pub fn new(client: CloudflareClient) -> Self {
        Self { client }
    }
}

/// The zone owning `domain`: the longest zone name that equals it or is
/// a dot-separated suffix of it.
pub fn zone_for<'a>(domain: &str, zones: &'a [CloudflareZone]) -> Option<&'a CloudflareZone> {
    zones
        .iter()
        .filter(|zone| domain == zone.name || domain.ends_with(&format!(".{}", zone.name)))
        .max_by_key(|zone| zone.name.len())
}

#[async_trait]
impl EdgeCachePurger for CloudflareEdgeCache {
    async fn invalidate(&self, service: &BaragonService) -> EdgeCacheResult<bool> {
        if service.edge_cache_domains.is_empty() {
            return Ok(true);
        }

        let zones = self.client.list_zones().await?;
        let mut zone_ids = BTreeSet::new();
        let mut all_found = true;
        for domain in &service.edge_cache_domains {
            match zone_for(domain, &zones) {
                Some(zone) => {
                    zone_ids.insert(zone.id.clone());
                }
                None => {
                    warn!(%domain, service = %service.service_id, "no edge cache zone for domain");
                    all_found = false;
                }
            }
        }

        let tags = vec![service.service_id.clone()];
        let mut all_purged = all_found;
        for zone_id in &zone_ids {
            if !self.client.purge_cache(zone_id, &tags).await? {
                warn!(%zone_id, service = %service.service_id, "edge cache purge refused");
                all_purged = false;
            }
        }

        info!(service = %service.service_id, zones = zone_ids.len(), ok = all_purged, "edge cache invalidated");
        Ok(all_purged)
    }
}
