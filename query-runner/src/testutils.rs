use crate::dispatcher::MetricsFetcher;
use crate::errors::UpstreamError;
use crate::resource_metrics::{MetricKind, ResourceMetrics, ServerMetricType, ServerMetrics};
use crate::types::{MetricsValue, RequestOptions, ResourceId, Step, TimeRange};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use http::StatusCode;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn test_range() -> TimeRange {
    TimeRange::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
    )
}

pub fn server_opts(types: &[ServerMetricType], step: Step) -> RequestOptions<ServerMetricType> {
    RequestOptions::new(types.to_vec(), test_range(), step)
}

/// Metrics fetcher that answers every requested series with a single sample,
/// recording each call it receives.
#[derive(Default)]
pub struct FakeFetcher {
    calls: Mutex<Vec<(ResourceId, RequestOptions<ServerMetricType>)>>,
    delay: Duration,
    failing: HashSet<ResourceId>,
    panicking: HashSet<ResourceId>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, ids: impl IntoIterator<Item = ResourceId>) -> Self {
        self.failing.extend(ids);
        self
    }

    pub fn panicking(mut self, ids: impl IntoIterator<Item = ResourceId>) -> Self {
        self.panicking.extend(ids);
        self
    }

    pub fn calls(&self) -> Vec<(ResourceId, RequestOptions<ServerMetricType>)> {
        self.calls.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsFetcher<ServerMetrics> for FakeFetcher {
    async fn fetch_metrics(
        &self,
        id: ResourceId,
        opts: &RequestOptions<ServerMetricType>,
    ) -> Result<ServerMetrics, UpstreamError> {
        self.calls.lock().push((id, opts.clone()));

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking.contains(&id) {
            panic!("fetcher panicked for resource {id}");
        }

        if self.failing.contains(&id) {
            return Err(UpstreamError::Api {
                status: StatusCode::TOO_MANY_REQUESTS,
                code: "rate_limit_exceeded".into(),
                message: "limit of 3600 requests per hour reached".into(),
            });
        }

        let time_series = opts
            .metric_types
            .iter()
            .flat_map(|t| t.series().iter())
            .map(|name| {
                (
                    name.to_string(),
                    vec![MetricsValue {
                        timestamp: opts.time_range.from.timestamp() as f64,
                        value: id.to_string(),
                    }],
                )
            })
            .collect();

        Ok(ServerMetrics::from_parts(
            opts.time_range.from,
            opts.time_range.to,
            opts.step,
            time_series,
        ))
    }
}

/// A request received by [`MockApi`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub authorization: Option<String>,
}

impl RecordedRequest {
    pub fn query_values(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

type Handler = dyn Fn(&RecordedRequest) -> (StatusCode, serde_json::Value) + Send + Sync;
type Delay = dyn Fn(&RecordedRequest) -> Duration + Send + Sync;

/// Local HTTP server standing in for the Hetzner Cloud API.
pub struct MockApi {
    pub port: u16,
    requests: std::sync::Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockApi {
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RecordedRequest) -> (StatusCode, serde_json::Value) + Send + Sync + 'static,
    {
        Self::start_with_delay(handler, |_| Duration::ZERO).await
    }

    /// Like [`MockApi::start`], holding back each response for the duration
    /// `delay` returns for its request.
    pub async fn start_with_delay<F, D>(handler: F, delay: D) -> Self
    where
        F: Fn(&RecordedRequest) -> (StatusCode, serde_json::Value) + Send + Sync + 'static,
        D: Fn(&RecordedRequest) -> Duration + Send + Sync + 'static,
    {
        use http_body_util::Full;
        use hyper::body::Bytes;
        use hyper::service::service_fn;
        use hyper_util::rt::{TokioExecutor, TokioIo};
        use std::convert::Infallible;
        use std::sync::Arc;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handler: Arc<Handler> = Arc::new(handler);
        let delay: Arc<Delay> = Arc::new(delay);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                let handler = handler.clone();
                let delay = delay.clone();
                let recorded = recorded.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: http::Request<hyper::body::Incoming>| {
                        let request = RecordedRequest {
                            path: req.uri().path().to_string(),
                            query: url::form_urlencoded::parse(
                                req.uri().query().unwrap_or_default().as_bytes(),
                            )
                            .into_owned()
                            .collect(),
                            authorization: req
                                .headers()
                                .get(http::header::AUTHORIZATION)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string),
                        };
                        let (status, body) = handler(&request);
                        let delay = delay(&request);
                        recorded.lock().push(request);

                        async move {
                            tokio::time::sleep(delay).await;
                            let json = serde_json::to_vec(&body).unwrap();
                            let mut response = http::Response::new(Full::new(Bytes::from(json)));
                            *response.status_mut() = status;
                            Ok::<_, Infallible>(response)
                        }
                    });

                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockApi { port, requests }
    }

    pub fn api_config(&self) -> crate::config::ApiConfig {
        crate::config::ApiConfig {
            url: Some(url::Url::parse(&format!("http://127.0.0.1:{}/v1", self.port)).unwrap()),
            token: "test-token".into(),
            http_timeout_secs: 5,
            debug: true,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

/// Metrics response body in the API's wire format, one sample per series.
pub fn metrics_body(series: &[(&str, &str)]) -> serde_json::Value {
    let time_series: serde_json::Map<String, serde_json::Value> = series
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                serde_json::json!({ "values": [[1704067200.0, value]] }),
            )
        })
        .collect();

    serde_json::json!({
        "metrics": {
            "start": "2024-01-01T00:00:00Z",
            "end": "2024-01-01T01:00:00Z",
            "step": 60.0,
            "time_series": time_series,
        }
    })
}
