//! Deduplication of buffered requests into upstream calls.
//!
//! Requests for the same resource with an identical time range and step can be
//! answered by one upstream call that asks for the union of their metric types.

use crate::resource_metrics::MetricKind;
use crate::types::{RequestOptions, Step, TimeRange};
use std::collections::{BTreeSet, HashMap};

/// Identity of an upstream call for a single resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub time_range: TimeRange,
    pub step: Step,
}

impl<T> From<&RequestOptions<T>> for BucketKey {
    fn from(opts: &RequestOptions<T>) -> Self {
        BucketKey {
            time_range: opts.time_range,
            step: opts.step,
        }
    }
}

/// Merges requests sharing a bucket by unioning their metric types.
///
/// Buckets are returned in order of first appearance and the metric types of
/// each bucket are sorted, so the output is deterministic for a given input.
pub fn unique_requests<'a, T, I>(requests: I) -> Vec<RequestOptions<T>>
where
    T: MetricKind,
    I: IntoIterator<Item = &'a RequestOptions<T>>,
{
    let mut order = Vec::new();
    let mut unique: HashMap<BucketKey, BTreeSet<T>> = HashMap::new();

    for request in requests {
        let key = BucketKey::from(request);
        let types = unique.entry(key).or_insert_with(|| {
            order.push(key);
            BTreeSet::new()
        });
        types.extend(request.metric_types.iter().copied());
    }

    order
        .into_iter()
        .filter_map(|key| {
            unique.remove(&key).map(|types| RequestOptions {
                metric_types: types.into_iter().collect(),
                time_range: key.time_range,
                step: key.step,
            })
        })
        .collect()
}
