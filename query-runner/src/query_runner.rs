//! Request coalescing for the per-resource metrics endpoints.
//!
//! The Hetzner Cloud API exposes all metrics of a single resource (server or
//! load balancer) through one endpoint. Dashboards want the opposite: one metric
//! across many resources, often in several panels at once. Sending one API call
//! per resource per panel quickly exhausts the rate limit.
//!
//! The [`QueryRunner`] buffers incoming requests for a short period, merges the
//! requests for each resource that share a time range and step into a single
//! call asking for the union of their metric types, and routes every response
//! back to all waiters it satisfies. Five panels showing the same server cost
//! one API call instead of five, at the price of always waiting for the buffer
//! period.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──submit──▶ Buffering ──timer──▶ Dispatching ──┬─ queue empty ──▶ Idle
//!                        ▲                              │
//!                        └──────── queue not empty ─────┘
//! ```
//!
//! The state lock is only held while enqueueing, taking the snapshot and routing
//! a response. Requests submitted while calls are in flight are queued and
//! either answered by an in-flight call that satisfies them or picked up by the
//! next round.

use crate::bucket::unique_requests;
use crate::config::QueryRunnerConfig;
use crate::dispatcher::{DispatchResult, Dispatcher, MetricsFetcher};
use crate::errors::{QueryRunnerError, Result};
use crate::metrics_defs::{METRICS_REQUESTS, PENDING_REQUESTS};
use crate::resource_metrics::ResourceMetrics;
use crate::types::{RequestOptions, ResourceId};
use parking_lot::Mutex;
use shared::{counter, histogram};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type Response<M> = (ResourceId, Result<M>);

pub struct QueryRunner<M: ResourceMetrics> {
    inner: Arc<Inner<M>>,
}

struct Inner<M: ResourceMetrics> {
    buffer_period: Duration,
    dispatcher: Dispatcher<M>,
    state: Mutex<State<M>>,
}

struct State<M: ResourceMetrics> {
    requests: HashMap<ResourceId, Vec<PendingRequest<M>>>,
    phase: Phase,
}

enum Phase {
    Idle,
    Buffering(JoinHandle<()>),
    Dispatching,
}

/// One submitted request for one resource, waiting for its response.
struct PendingRequest<M: ResourceMetrics> {
    opts: RequestOptions<M::Kind>,
    sink: mpsc::Sender<Response<M>>,
}

impl<M: ResourceMetrics> QueryRunner<M> {
    pub fn new(
        buffer_period: Duration,
        fetcher: Arc<dyn MetricsFetcher<M>>,
        max_concurrent_requests: usize,
    ) -> Self {
        QueryRunner {
            inner: Arc::new(Inner {
                buffer_period,
                dispatcher: Dispatcher::new(fetcher, max_concurrent_requests),
                state: Mutex::new(State {
                    requests: HashMap::new(),
                    phase: Phase::Idle,
                }),
            }),
        }
    }

    pub fn from_config(config: &QueryRunnerConfig, fetcher: Arc<dyn MetricsFetcher<M>>) -> Self {
        Self::new(
            config.buffer_period(),
            fetcher,
            config.max_concurrent_requests,
        )
    }

    /// Requests `opts` for every resource in `ids` and waits until all of them
    /// are answered.
    ///
    /// Fails with the first error received for any of the resources, or with
    /// [`QueryRunnerError::Cancelled`] as soon as `cancel` fires. Requests of a
    /// call that returns early are withdrawn from the queue. Upstream calls
    /// already in flight are not aborted and still serve other waiters.
    pub async fn request_metrics(
        &self,
        cancel: &CancellationToken,
        ids: &[ResourceId],
        opts: RequestOptions<M::Kind>,
    ) -> Result<HashMap<ResourceId, M>> {
        opts.validate()?;

        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<ResourceId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        if ids.is_empty() {
            return Err(QueryRunnerError::InvalidRequest(
                "at least one resource id is required".into(),
            ));
        }

        counter!(METRICS_REQUESTS, "resource_kind" => M::RESOURCE_KIND.as_str()).increment(1);

        let (tx, rx) = mpsc::channel(ids.len());
        {
            let mut state = self.inner.state.lock();
            for id in &ids {
                state.requests.entry(*id).or_default().push(PendingRequest {
                    opts: opts.clone(),
                    sink: tx.clone(),
                });
            }
            self.inner.start_buffer(&mut state);
        }
        drop(tx);

        let mut waiter = Waiter {
            inner: &self.inner,
            ids: &ids,
            rx,
        };

        let mut results = HashMap::with_capacity(ids.len());
        while results.len() < ids.len() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueryRunnerError::Cancelled),
                response = waiter.rx.recv() => match response {
                    Some((id, Ok(metrics))) => {
                        results.insert(id, metrics);
                    }
                    Some((_, Err(e))) => return Err(e),
                    None => return Err(QueryRunnerError::Closed),
                },
            }
        }

        Ok(results)
    }

    #[cfg(test)]
    fn pending_requests(&self) -> usize {
        self.inner.state.lock().requests.values().map(Vec::len).sum()
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Idle)
    }
}

impl<M: ResourceMetrics> Drop for QueryRunner<M> {
    fn drop(&mut self) {
        if let Phase::Buffering(handle) = &self.inner.state.lock().phase {
            handle.abort();
        }
    }
}

impl<M: ResourceMetrics> Inner<M> {
    /// Starts the buffer timer unless one is running or a round is in flight.
    /// Caller must hold the state lock.
    fn start_buffer(self: &Arc<Self>, state: &mut State<M>) {
        if !matches!(state.phase, Phase::Idle) {
            return;
        }

        let inner = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(inner.buffer_period).await;
            inner.send_requests().await;
        });
        state.phase = Phase::Buffering(handle);
    }

    async fn send_requests(self: Arc<Self>) {
        let calls = {
            let mut state = self.state.lock();
            state.phase = Phase::Dispatching;
            self.take_calls(&mut state)
        };

        let mut dispatch = self.dispatcher.dispatch(calls);
        while let Some(result) = dispatch.next().await {
            self.route_response(result);
        }

        let mut state = self.state.lock();
        state.phase = Phase::Idle;
        if !state.requests.is_empty() {
            self.start_buffer(&mut state);
        }
    }

    /// Drops requests whose caller has gone away and deduplicates the rest into
    /// the calls for this round. Requests stay queued until a response arrives.
    fn take_calls(&self, state: &mut State<M>) -> Vec<(ResourceId, RequestOptions<M::Kind>)> {
        state.requests.retain(|_, pending| {
            pending.retain(|request| !request.sink.is_closed());
            !pending.is_empty()
        });

        let pending_count: usize = state.requests.values().map(Vec::len).sum();
        histogram!(PENDING_REQUESTS, "resource_kind" => M::RESOURCE_KIND.as_str())
            .record(pending_count as f64);

        let calls: Vec<_> = state
            .requests
            .iter()
            .flat_map(|(id, pending)| {
                unique_requests(pending.iter().map(|request| &request.opts))
                    .into_iter()
                    .map(move |opts| (*id, opts))
            })
            .collect();

        tracing::debug!(
            resource_kind = M::RESOURCE_KIND.as_str(),
            pending = pending_count,
            calls = calls.len(),
            "Dispatching buffered metrics requests"
        );

        calls
    }

    /// Answers every queued request for the resource that the response
    /// satisfies and keeps the others queued.
    fn route_response(&self, response: DispatchResult<M>) {
        let DispatchResult {
            resource_id,
            opts,
            result,
        } = response;

        let mut state = self.state.lock();
        let Some(pending) = state.requests.remove(&resource_id) else {
            return;
        };

        let (satisfied, remaining): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|request| opts.matches(&request.opts));

        for request in satisfied {
            let response = match &result {
                Ok(metrics) => Ok(metrics.filter(&request.opts.metric_types)),
                Err(e) => Err(e.clone()),
            };
            // Sinks hold one slot per requested resource, this only fails
            // once the waiter has gone.
            let _ = request.sink.try_send((resource_id, response));
        }

        if !remaining.is_empty() {
            state.requests.insert(resource_id, remaining);
        }
    }
}

/// Receiving end of one `request_metrics` call. Withdraws the call's
/// unanswered requests when dropped.
struct Waiter<'a, M: ResourceMetrics> {
    inner: &'a Inner<M>,
    ids: &'a [ResourceId],
    rx: mpsc::Receiver<Response<M>>,
}

impl<M: ResourceMetrics> Drop for Waiter<'_, M> {
    fn drop(&mut self) {
        self.rx.close();

        let mut state = self.inner.state.lock();
        for id in self.ids {
            if let Some(pending) = state.requests.get_mut(id) {
                pending.retain(|request| !request.sink.is_closed());
                if pending.is_empty() {
                    state.requests.remove(id);
                }
            }
        }
    }
}
