//! Client for the Hetzner Cloud API endpoints the data source needs.

use crate::config::ApiConfig;
use crate::dispatcher::MetricsFetcher;
use crate::errors::UpstreamError;
use crate::name_cache::ResourceLookup;
use crate::resource_metrics::{MetricKind, ResourceMetrics};
use crate::types::{MetricsValue, RequestOptions, ResourceId, ResourceKind};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use url::Url;

const PAGE_SIZE: u32 = 50;

/// A server or load balancer as listed by the API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct MetricsResponse {
    metrics: ApiMetrics,
}

#[derive(Deserialize)]
struct ApiMetrics {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    time_series: HashMap<String, ApiSeries>,
}

#[derive(Deserialize)]
struct ApiSeries {
    values: Vec<MetricsValue>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct ListMeta {
    pagination: Pagination,
}

#[derive(Deserialize)]
struct Pagination {
    next_page: Option<u32>,
}

#[derive(Clone)]
pub struct HcloudClient {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    debug: bool,
}

impl HcloudClient {
    pub fn new(config: &ApiConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(concat!("metricsd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(HcloudClient {
            client,
            base_url: config.base_url()?,
            token: config.token.clone(),
            debug: config.debug,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                UpstreamError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if self.debug {
            tracing::debug!(%status, body = %String::from_utf8_lossy(&body), "API response");
        }

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        Ok(serde_json::from_slice(&body)?)
    }

    /// Fetches a single resource by id.
    pub async fn get_resource(
        &self,
        kind: ResourceKind,
        id: ResourceId,
    ) -> Result<Resource, UpstreamError> {
        let url = self.endpoint(&[kind.api_path(), &id.to_string()])?;
        let mut body: serde_json::Value = self.get(url, &[]).await?;
        Ok(serde_json::from_value(body[kind.api_singular()].take())?)
    }

    /// Lists all resources of `kind` matching every label selector, following
    /// pagination until the last page.
    pub async fn list_resources(
        &self,
        kind: ResourceKind,
        label_selectors: &[String],
    ) -> Result<Vec<Resource>, UpstreamError> {
        let url = self.endpoint(&[kind.api_path()])?;
        let mut resources = Vec::new();
        let mut page: u32 = 1;

        loop {
            let mut query = vec![
                ("page", page.to_string()),
                ("per_page", PAGE_SIZE.to_string()),
            ];
            if !label_selectors.is_empty() {
                query.push(("label_selector", label_selectors.join(", ")));
            }

            let mut body: serde_json::Value = self.get(url.clone(), &query).await?;
            let items: Vec<Resource> = serde_json::from_value(body[kind.api_path()].take())?;
            resources.extend(items);

            let meta: Option<ListMeta> = serde_json::from_value(body["meta"].take())?;
            match meta.and_then(|m| m.pagination.next_page) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        Ok(resources)
    }
}

fn api_error(status: StatusCode, body: &[u8]) -> UpstreamError {
    match serde_json::from_slice::<ErrorResponse>(body) {
        Ok(e) => UpstreamError::Api {
            status,
            code: e.error.code,
            message: e.error.message,
        },
        Err(_) => UpstreamError::Api {
            status,
            code: "unknown".into(),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

#[async_trait]
impl<M: ResourceMetrics> MetricsFetcher<M> for HcloudClient {
    async fn fetch_metrics(
        &self,
        id: ResourceId,
        opts: &RequestOptions<M::Kind>,
    ) -> Result<M, UpstreamError> {
        let url = self.endpoint(&[M::RESOURCE_KIND.api_path(), &id.to_string(), "metrics"])?;

        let mut query: Vec<(&str, String)> = opts
            .metric_types
            .iter()
            .map(|t| ("type", t.as_str().to_string()))
            .collect();
        query.push((
            "start",
            opts.time_range.from.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
        query.push((
            "end",
            opts.time_range.to.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
        query.push(("step", opts.step.to_string()));

        let response: MetricsResponse = self.get(url, &query).await?;
        let metrics = response.metrics;

        Ok(M::from_parts(
            metrics.start,
            metrics.end,
            opts.step,
            metrics
                .time_series
                .into_iter()
                .map(|(name, series)| (name, series.values))
                .collect(),
        ))
    }
}

#[async_trait]
impl ResourceLookup for HcloudClient {
    async fn resource_name(
        &self,
        kind: ResourceKind,
        id: ResourceId,
    ) -> Result<String, UpstreamError> {
        Ok(self.get_resource(kind, id).await?.name)
    }
}
