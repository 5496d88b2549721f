//! Bounded fan-out of deduplicated upstream calls.

use crate::errors::{QueryRunnerError, UpstreamError};
use crate::metrics_defs::{UPSTREAM_CALLS, UPSTREAM_DURATION, UPSTREAM_FAILURES};
use crate::resource_metrics::ResourceMetrics;
use crate::types::{RequestOptions, ResourceId};
use async_trait::async_trait;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Fetches the metrics of one resource from the upstream API.
///
/// Implementations must not retry; a failed call fails every request that was
/// waiting on it.
#[async_trait]
pub trait MetricsFetcher<M: ResourceMetrics>: Send + Sync {
    async fn fetch_metrics(
        &self,
        id: ResourceId,
        opts: &RequestOptions<M::Kind>,
    ) -> Result<M, UpstreamError>;
}

/// Outcome of one upstream call, tagged with what was asked for.
#[derive(Debug)]
pub struct DispatchResult<M: ResourceMetrics> {
    pub resource_id: ResourceId,
    pub opts: RequestOptions<M::Kind>,
    pub result: Result<M, QueryRunnerError>,
}

pub struct Dispatcher<M: ResourceMetrics> {
    fetcher: Arc<dyn MetricsFetcher<M>>,
    permits: Arc<Semaphore>,
}

impl<M: ResourceMetrics> Dispatcher<M> {
    pub fn new(fetcher: Arc<dyn MetricsFetcher<M>>, max_concurrent_requests: usize) -> Self {
        Dispatcher {
            fetcher,
            permits: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }

    /// Spawns one task per call. At most `max_concurrent_requests` of them
    /// talk to the upstream at the same time.
    pub fn dispatch(&self, calls: Vec<(ResourceId, RequestOptions<M::Kind>)>) -> Dispatch<M> {
        let mut join_set = JoinSet::new();
        let mut task_calls = HashMap::new();

        counter!(UPSTREAM_CALLS, "resource_kind" => M::RESOURCE_KIND.as_str())
            .increment(calls.len() as u64);

        for (resource_id, opts) in calls {
            let fetcher = self.fetcher.clone();
            let permits = self.permits.clone();
            let opts_for_tracking = opts.clone();

            let abort_handle = join_set.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => fetch(fetcher.as_ref(), resource_id, &opts).await,
                    Err(e) => Err(QueryRunnerError::DispatchFailed {
                        resource_id,
                        message: e.to_string(),
                    }),
                };

                DispatchResult {
                    resource_id,
                    opts,
                    result,
                }
            });

            task_calls.insert(abort_handle.id(), (resource_id, opts_for_tracking));
        }

        Dispatch {
            join_set,
            task_calls,
        }
    }
}

async fn fetch<M: ResourceMetrics>(
    fetcher: &dyn MetricsFetcher<M>,
    resource_id: ResourceId,
    opts: &RequestOptions<M::Kind>,
) -> Result<M, QueryRunnerError> {
    let started = Instant::now();
    let result = fetcher.fetch_metrics(resource_id, opts).await;
    histogram!(UPSTREAM_DURATION, "resource_kind" => M::RESOURCE_KIND.as_str())
        .record(started.elapsed().as_secs_f64());

    result.map_err(|e| {
        tracing::warn!(
            resource_kind = M::RESOURCE_KIND.as_str(),
            resource_id,
            error = %e,
            "Upstream metrics request failed"
        );
        counter!(UPSTREAM_FAILURES, "resource_kind" => M::RESOURCE_KIND.as_str()).increment(1);
        QueryRunnerError::upstream(resource_id, e)
    })
}

/// In-flight calls of one dispatch round, yielded in completion order.
pub struct Dispatch<M: ResourceMetrics> {
    join_set: JoinSet<DispatchResult<M>>,

    /// Maps task IDs to their call so a panicked task can still be answered
    task_calls: HashMap<tokio::task::Id, (ResourceId, RequestOptions<M::Kind>)>,
}

impl<M: ResourceMetrics> Dispatch<M> {
    /// Waits for the next call to complete. Returns `None` once all calls
    /// have been yielded.
    pub async fn next(&mut self) -> Option<DispatchResult<M>> {
        loop {
            match self.join_set.join_next_with_id().await? {
                Ok((task_id, result)) => {
                    self.task_calls.remove(&task_id);
                    return Some(result);
                }
                Err(e) => {
                    tracing::error!("Dispatch task failed: {e}");
                    if let Some((resource_id, opts)) = self.task_calls.remove(&e.id()) {
                        return Some(DispatchResult {
                            resource_id,
                            opts,
                            result: Err(QueryRunnerError::DispatchFailed {
                                resource_id,
                                message: e.to_string(),
                            }),
                        });
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.join_set.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.join_set.is_empty()
    }
}
