//! Query handling on top of the per-kind query runners.

use crate::config::Config;
use crate::errors::{QueryRunnerError, Result};
use crate::hcloud::{HcloudClient, Resource};
use crate::name_cache::NameCache;
use crate::query_runner::QueryRunner;
use crate::resource_metrics::{
    LoadBalancerMetricType, LoadBalancerMetrics, ResourceMetrics, ServerMetricType, ServerMetrics,
};
use crate::series::{LABEL_NAME, LABEL_SERIES_DISPLAY_NAME, Series, to_series};
use crate::step::step_size;
use crate::types::{RequestOptions, ResourceId, ResourceKind, TimeRange};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectBy {
    #[default]
    Id,
    Label,
}

/// A single metrics query, as issued by one dashboard panel.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct MetricsQuery {
    pub resource_type: ResourceKind,
    pub metrics_type: String,
    #[serde(default)]
    pub select_by: SelectBy,
    #[serde(default)]
    pub resource_ids: Vec<ResourceId>,
    #[serde(default)]
    pub label_selectors: Vec<String>,
    #[serde(default)]
    pub legend_format: String,
    pub time_range: TimeRange,
    /// Suggested sampling interval in milliseconds
    #[serde(default)]
    pub interval_ms: u64,
    /// Upper bound on samples per series, 0 for no limit
    #[serde(default)]
    pub max_data_points: u64,
}

impl MetricsQuery {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Owns one query runner per resource kind. Dropping the datasource stops
/// any pending buffer timers.
pub struct Datasource {
    client: Arc<HcloudClient>,
    servers: QueryRunner<ServerMetrics>,
    load_balancers: QueryRunner<LoadBalancerMetrics>,
    names: NameCache,
}

impl Datasource {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Arc::new(HcloudClient::new(&config.api)?);

        Ok(Datasource {
            servers: QueryRunner::<ServerMetrics>::from_config(
                &config.query_runner,
                client.clone(),
            ),
            load_balancers: QueryRunner::<LoadBalancerMetrics>::from_config(
                &config.query_runner,
                client.clone(),
            ),
            names: NameCache::new(client.clone()),
            client,
        })
    }

    /// Runs one panel query. Fails with [`QueryRunnerError::Cancelled`] as
    /// soon as `cancel` fires, whichever step the query is in.
    pub async fn query_metrics(
        &self,
        cancel: &CancellationToken,
        query: &MetricsQuery,
    ) -> Result<Vec<Series>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(QueryRunnerError::Cancelled),
            result = self.run_query(cancel, query) => result,
        }
    }

    async fn run_query(
        &self,
        cancel: &CancellationToken,
        query: &MetricsQuery,
    ) -> Result<Vec<Series>> {
        let kind = query.resource_type;
        let ids = self.resolve_ids(query).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let step = step_size(
            query.time_range.duration(),
            query.interval(),
            query.max_data_points,
        );

        let mut series = match kind {
            ResourceKind::Server => {
                let metrics_type: ServerMetricType = query.metrics_type.parse()?;
                let opts = RequestOptions::new(vec![metrics_type], query.time_range, step);
                collect_series(&self.servers, cancel, &ids, opts).await?
            }
            ResourceKind::LoadBalancer => {
                let metrics_type: LoadBalancerMetricType = query.metrics_type.parse()?;
                let opts = RequestOptions::new(vec![metrics_type], query.time_range, step);
                collect_series(&self.load_balancers, cancel, &ids, opts).await?
            }
        };

        let mut names: HashMap<ResourceId, String> = HashMap::new();
        for s in &mut series {
            if !names.contains_key(&s.resource_id) {
                let name = self.names.get(kind, s.resource_id).await?;
                names.insert(s.resource_id, name);
            }
            let name = names.get(&s.resource_id).cloned().unwrap_or_default();
            s.labels.insert(LABEL_NAME.to_string(), name);
            s.display_name = display_name(&query.legend_format, &s.labels);
        }

        Ok(series)
    }

    /// Lists the resources of `kind` matching all `label_selectors` and
    /// remembers their names.
    pub async fn list_resources(
        &self,
        kind: ResourceKind,
        label_selectors: &[String],
    ) -> Result<Vec<Resource>> {
        let resources = self.client.list_resources(kind, label_selectors).await?;
        self.names.insert(
            kind,
            resources.iter().map(|r| (r.id, r.name.as_str())),
        );
        Ok(resources)
    }

    async fn resolve_ids(&self, query: &MetricsQuery) -> Result<Vec<ResourceId>> {
        match query.select_by {
            SelectBy::Id => Ok(query.resource_ids.clone()),
            SelectBy::Label => {
                let resources = self
                    .list_resources(query.resource_type, &query.label_selectors)
                    .await?;
                Ok(resources.into_iter().map(|r| r.id).collect())
            }
        }
    }
}

async fn collect_series<M: ResourceMetrics>(
    runner: &QueryRunner<M>,
    cancel: &CancellationToken,
    ids: &[ResourceId],
    opts: RequestOptions<M::Kind>,
) -> Result<Vec<Series>> {
    let metrics = runner.request_metrics(cancel, ids, opts).await?;

    let mut series = Vec::new();
    let mut emitted = Vec::with_capacity(metrics.len());
    for id in ids {
        if emitted.contains(id) {
            continue;
        }
        if let Some(m) = metrics.get(id) {
            series.extend(to_series(*id, m));
            emitted.push(*id);
        }
    }
    Ok(series)
}

/// Renders the legend of a series. `{{ label }}` is replaced with the value
/// of that label, or nothing if the series has no such label. An empty
/// format falls back to "<series display name> <resource name>".
pub fn display_name(legend_format: &str, labels: &BTreeMap<String, String>) -> String {
    let label = |key: &str| labels.get(key).map(String::as_str).unwrap_or_default();

    if legend_format.is_empty() {
        return format!(
            "{} {}",
            label(LABEL_SERIES_DISPLAY_NAME),
            label(LABEL_NAME)
        );
    }

    let mut out = String::with_capacity(legend_format.len());
    let mut rest = legend_format;
    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(label(rest[open + 2..open + 2 + close].trim()));
        rest = &rest[open + 2 + close + 2..];
    }
    out.push_str(rest);
    out
}
