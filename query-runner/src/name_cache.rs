use crate::errors::UpstreamError;
use crate::metrics_defs::{NAME_CACHE_HIT, NAME_CACHE_MISS};
use crate::types::{ResourceId, ResourceKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;

/// Looks up the display name of a single resource.
#[async_trait]
pub trait ResourceLookup: Send + Sync {
    async fn resource_name(
        &self,
        kind: ResourceKind,
        id: ResourceId,
    ) -> Result<String, UpstreamError>;
}

/// Caches resource names for labelling series. Entries never expire; a
/// renamed resource keeps its old name until the process restarts.
pub struct NameCache {
    lookup: Arc<dyn ResourceLookup>,
    names: Mutex<HashMap<(ResourceKind, ResourceId), String>>,
}

impl NameCache {
    pub fn new(lookup: Arc<dyn ResourceLookup>) -> Self {
        NameCache {
            lookup,
            names: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, kind: ResourceKind, id: ResourceId) -> Result<String, UpstreamError> {
        if let Some(name) = self.names.lock().get(&(kind, id)) {
            counter!(NAME_CACHE_HIT, "resource_kind" => kind.as_str()).increment(1);
            return Ok(name.clone());
        }

        counter!(NAME_CACHE_MISS, "resource_kind" => kind.as_str()).increment(1);
        // Lock is not held across the lookup, concurrent misses may both fetch
        let name = self.lookup.resource_name(kind, id).await?;
        self.names.lock().insert((kind, id), name.clone());
        Ok(name)
    }

    pub fn insert<'a>(
        &self,
        kind: ResourceKind,
        resources: impl IntoIterator<Item = (ResourceId, &'a str)>,
    ) {
        let mut names = self.names.lock();
        for (id, name) in resources {
            names.insert((kind, id), name.to_string());
        }
    }
}
