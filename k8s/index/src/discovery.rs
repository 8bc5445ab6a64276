//! Builds the API discovery cache from the cluster's group/resource
//! enumeration endpoints and refreshes it on a fixed cadence.

use anyhow::Result;
use rbacgraph_controller_core::DiscoveryCache;
use rbacgraph_controller_k8s_api::Client;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{self, Duration};

/// Spawnable refresh loop. The first tick builds the initial cache; every
/// failure afterwards keeps the previous cache in the slot — `None` is only
/// ever replaced, never reinstalled.
pub fn refresh(
    client: Client,
    interval: Duration,
) -> (
    watch::Receiver<Option<Arc<DiscoveryCache>>>,
    impl std::future::Future<Output = ()>,
) {
    let (tx, rx) = watch::channel(None);
    let task = async move {
        let mut ticker = time::interval(interval);
        let mut initial = true;
        loop {
            ticker.tick().await;
            match build(&client).await {
                Ok(cache) => {
                    tracing::debug!(
                        groups = cache.groups.len(),
                        resources = cache.all_resources.len(),
                        "Refreshed discovery cache"
                    );
                    let _ = tx.send(Some(Arc::new(cache)));
                }
                Err(error) if initial => {
                    tracing::warn!(%error, "Initial discovery cache build failed");
                }
                Err(error) => {
                    tracing::warn!(%error, "Discovery cache refresh failed (keeping stale)");
                }
            }
            initial = false;
        }
    };
    (rx, task)
}

async fn build(client: &Client) -> Result<DiscoveryCache> {
    let mut cache = DiscoveryCache::empty();

    // The core group advertises itself separately from the named groups.
    let core_versions = client.list_core_api_versions().await?;
    if let Some(version) = core_versions.versions.first() {
        let resources = client.list_core_api_resources(version).await?;
        for resource in resources.resources {
            cache.insert_resource("", &resource.name, &resource.verbs);
        }
    }

    let groups = client.list_api_groups().await?;
    for group in groups.groups {
        let version = match group
            .preferred_version
            .or_else(|| group.versions.first().cloned())
        {
            Some(version) => version,
            None => continue,
        };
        // One unreadable group must not lose the rest of the surface.
        match client.list_api_group_resources(&version.group_version).await {
            Ok(resources) => {
                for resource in resources.resources {
                    cache.insert_resource(&group.name, &resource.name, &resource.verbs);
                }
            }
            Err(error) => {
                tracing::warn!(%error, group = %group.name, "Partial discovery error (continuing with available data)");
            }
        }
    }

    cache.finish();
    Ok(cache)
}
