//! Remote loader implementation
//!
//! Fetches a container's manifest, instantiates its entry artifact and runs
//! `init` against the shared scope. Each handle is loaded at most once; the
//! outcome (success or failure) is memoized on the handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::federation::events::{EventManager, FederationEvent};
use crate::federation::registry::{ContainerHandle, LoadedContainer, Manifest};
use crate::federation::scope::{SharedScope, SharedScopeView};
use crate::federation::traits::FederationError;
use crate::federation::transport::{EntryLoader, FetchError, ManifestSource};
use crate::federation::validation::ManifestValidator;
use crate::utils::with_timeout_opt;

/// Loads containers into a session
#[derive(Clone)]
pub struct RemoteLoader {
    manifests: Arc<dyn ManifestSource>,
    entries: Arc<dyn EntryLoader>,
    scope: Arc<SharedScope>,
    events: Arc<EventManager>,
    validator: Arc<ManifestValidator>,
    fetch_timeout: Option<Duration>,
}

impl RemoteLoader {
    pub fn new(
        manifests: Arc<dyn ManifestSource>,
        entries: Arc<dyn EntryLoader>,
        scope: Arc<SharedScope>,
        events: Arc<EventManager>,
    ) -> Self {
        Self {
            manifests,
            entries,
            scope,
            events,
            validator: Arc::new(ManifestValidator::new()),
            fetch_timeout: None,
        }
    }

    pub fn with_validator(mut self, validator: ManifestValidator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Bound the manifest fetch and the entry fetch
    pub fn with_fetch_timeout(mut self, fetch_timeout: Option<Duration>) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Drive `handle` to a terminal state
    ///
    /// Safe to call concurrently: every caller joins the same load, which
    /// runs on its own task and is not cancelled when a caller goes away.
    pub async fn load_container(
        &self,
        handle: &Arc<ContainerHandle>,
    ) -> Result<Arc<LoadedContainer>, FederationError> {
        let loader = self.clone();
        let target = Arc::clone(handle);
        let result = handle
            .load
            .run(move || async move { loader.load_uncached(&target).await })
            .await;

        match result {
            // The load task died before reaching a terminal state
            Err(FederationError::TaskFailed(reason)) => {
                let e = FederationError::ContainerLoad {
                    container_id: handle.container_id().to_string(),
                    reason: format!("load task aborted: {}", reason),
                };
                if handle.error().await.is_none() {
                    error!("{}", e);
                    handle.mark_failed(e.clone()).await;
                }
                Err(e)
            }
            other => other,
        }
    }

    async fn load_uncached(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Arc<LoadedContainer>, FederationError> {
        let container_id = handle.container_id().to_string();
        handle.mark_loading().await;
        info!(
            "Loading container {} from {}",
            container_id,
            handle.entry_location()
        );

        match self.fetch_and_init(handle).await {
            Ok(loaded) => {
                handle.mark_loaded().await;
                self.events
                    .publish(FederationEvent::ContainerLoaded {
                        container_id: container_id.clone(),
                    })
                    .await;
                info!("Container {} loaded", container_id);
                Ok(loaded)
            }
            Err(e) => {
                error!("Container {} failed to load: {}", container_id, e);
                handle.mark_failed(e.clone()).await;
                self.events
                    .publish(FederationEvent::ContainerFailed {
                        container_id,
                        reason: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn fetch_and_init(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Arc<LoadedContainer>, FederationError> {
        let container_id = handle.container_id();
        let manifest_fetch = |reason: String| FederationError::ManifestFetch {
            container_id: container_id.to_string(),
            reason,
        };
        let container_load = |reason: String| FederationError::ContainerLoad {
            container_id: container_id.to_string(),
            reason,
        };

        let document = self
            .bounded(self.manifests.fetch_manifest(handle.entry_location()))
            .await
            .map_err(manifest_fetch)?;
        let manifest = Arc::new(
            Manifest::parse(&document, container_id, &self.validator)
                .map_err(|e| manifest_fetch(e.to_string()))?,
        );
        handle.mark_manifest(Arc::clone(&manifest)).await;
        debug!(
            "Parsed manifest for {}: {} exposed, {} shared",
            container_id,
            manifest.exposes.len(),
            manifest.shared.len()
        );

        let entry = self
            .bounded(self.entries.load_entry(&manifest))
            .await
            .map_err(container_load)?;

        let view = SharedScopeView::new(Arc::clone(&self.scope), &manifest);
        entry
            .init(&view)
            .await
            .map_err(|reason| container_load(format!("init failed: {}", reason)))?;
        let offers = view.into_offers();

        let loaded = LoadedContainer::new(Arc::clone(&manifest), entry, offers);
        let missing: Vec<&str> = manifest
            .shared
            .iter()
            .filter(|req| loaded.loader_for(req).is_none())
            .map(|req| req.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(container_load(format!(
                "init registered no loader for shared dependencies: {}",
                missing.join(", ")
            )));
        }

        Ok(Arc::new(loaded))
    }

    async fn bounded<T, F>(&self, fetch: F) -> Result<T, String>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        with_timeout_opt(fetch, self.fetch_timeout)
            .await
            .ok_or_else(|| format!("timed out after {:?}", self.fetch_timeout.unwrap_or_default()))?
            .map_err(|e| e.to_string())
    }
}
