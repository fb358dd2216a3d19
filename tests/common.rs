//! Test fixtures for federation tests
//!
//! Containers are published into an in-memory manifest source and an entry
//! catalog; each test builds sessions on top of them.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use federation_runtime::federation::registry::{
    ExposesMap, ManifestDocument, RemoteReference, SharedDeclaration,
};
use federation_runtime::federation::scope::SharedScopeView;
use federation_runtime::federation::transport::{EntryCatalog, InMemoryManifestSource, StaticContainer};
use federation_runtime::{
    ContainerEntry, FederationConfig, FederationSession, Module, ModuleFactory, SharedFactory,
    SharedModules,
};

/// Manifest location used for `container_id`
pub fn location(container_id: &str) -> String {
    format!("mem://{}/manifest.json", container_id)
}

/// Entry URI used for `container_id`
pub fn entry_uri(container_id: &str) -> String {
    format!("mem://{}/remoteEntry", container_id)
}

/// Manifest exposing `exposes` and declaring `shared`
pub fn manifest(container_id: &str, exposes: &[&str], shared: Vec<SharedDeclaration>) -> ManifestDocument {
    let mut map = ExposesMap::new();
    for path in exposes {
        map.insert(*path, format!("src/{}", path.trim_start_matches("./")));
    }
    ManifestDocument {
        container_id: container_id.to_string(),
        entry: entry_uri(container_id),
        exposes: map,
        shared,
    }
}

pub fn shared(name: &str, range: &str, provided: &str, singleton: bool) -> SharedDeclaration {
    SharedDeclaration {
        name: name.to_string(),
        version_range: range.to_string(),
        singleton,
        provided_version: provided.to_string(),
        federated_from: None,
    }
}

/// Shared declaration whose provider is another container's exposed module
pub fn federated(
    name: &str,
    range: &str,
    provided: &str,
    singleton: bool,
    from: &str,
    exposed_path: &str,
) -> SharedDeclaration {
    SharedDeclaration {
        federated_from: Some(RemoteReference {
            container_id: from.to_string(),
            exposed_path: exposed_path.to_string(),
        }),
        ..shared(name, range, provided, singleton)
    }
}

/// Exposed module carrying the shared instances it was built with
pub fn echo_factory(tag: &str) -> ModuleFactory {
    let tag = tag.to_string();
    ModuleFactory::new(move |deps: &SharedModules| Ok(Module::new(tag.clone(), deps.clone())))
}

/// Shared instances an [`echo_factory`] module was built with
pub fn deps_of(module: &Module) -> &SharedModules {
    module
        .downcast_ref::<SharedModules>()
        .expect("module built by echo_factory")
}

/// Shared dependency thunk that counts its runs
pub struct CountingFactory {
    pub factory: SharedFactory,
    pub loads: Arc<AtomicUsize>,
}

impl CountingFactory {
    pub fn new(tag: &str) -> Self {
        Self::with_delay(tag, Duration::ZERO)
    }

    pub fn with_delay(tag: &str, delay: Duration) -> Self {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let tag = tag.to_string();
        let factory = SharedFactory::new(move || {
            let counter = Arc::clone(&counter);
            let tag = tag.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(Module::new(tag.clone(), tag))
            }
        });
        Self { factory, loads }
    }

    /// Thunk failing the first `failures` runs
    pub fn flaky(tag: &str, failures: usize) -> Self {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let tag = tag.to_string();
        let factory = SharedFactory::new(move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            let tag = tag.clone();
            async move {
                if attempt < failures {
                    Err(format!("{} unavailable (attempt {})", tag, attempt + 1))
                } else {
                    Ok(Module::new(tag.clone(), tag))
                }
            }
        });
        Self { factory, loads }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

/// Container wrapper counting `init` calls
pub struct CountingContainer {
    inner: StaticContainer,
    pub inits: Arc<AtomicUsize>,
}

impl CountingContainer {
    pub fn new(inner: StaticContainer) -> Self {
        Self {
            inner,
            inits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ContainerEntry for CountingContainer {
    async fn init(&self, scope: &SharedScopeView) -> Result<(), String> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.inner.init(scope).await
    }

    async fn get(&self, exposed_path: &str) -> Result<ModuleFactory, String> {
        self.inner.get(exposed_path).await
    }
}

/// Published containers shared by the sessions of one test
pub struct FederationFixture {
    pub manifests: Arc<InMemoryManifestSource>,
    pub entries: Arc<EntryCatalog>,
    published: Mutex<Vec<String>>,
}

impl FederationFixture {
    pub fn new() -> Self {
        Self {
            manifests: Arc::new(InMemoryManifestSource::new()),
            entries: Arc::new(EntryCatalog::new()),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Fixture whose manifest fetches and entry loads take `latency`
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            manifests: Arc::new(InMemoryManifestSource::with_latency(latency)),
            entries: Arc::new(EntryCatalog::with_latency(latency)),
            published: Mutex::new(Vec::new()),
        }
    }

    /// Serve `doc` at [`location`] and link `entry` at its entry URI
    pub async fn publish(&self, doc: ManifestDocument, entry: Arc<dyn ContainerEntry>) {
        self.manifests
            .insert_manifest(location(&doc.container_id), &doc)
            .await
            .expect("manifest serializes");
        self.entries.register_entry(doc.entry.clone(), entry).await;
        self.published.lock().await.push(doc.container_id);
    }

    /// Serve `doc` without linking any entry artifact
    pub async fn publish_manifest(&self, doc: ManifestDocument) {
        self.manifests
            .insert_manifest(location(&doc.container_id), &doc)
            .await
            .expect("manifest serializes");
        self.published.lock().await.push(doc.container_id);
    }

    /// Declare `container_id` without serving anything at its location
    pub async fn declare_missing(&self, container_id: &str) {
        self.published.lock().await.push(container_id.to_string());
    }

    pub async fn publish_static(&self, doc: ManifestDocument, container: StaticContainer) {
        self.publish(doc, Arc::new(container)).await;
    }

    /// Session with every published container declared as a remote
    pub async fn session(&self) -> FederationSession {
        self.session_with(FederationConfig::default()).await
    }

    pub async fn session_with(&self, mut config: FederationConfig) -> FederationSession {
        // Published containers are reachable by id without explicit registration
        for id in self.published.lock().await.iter() {
            config
                .remotes
                .entry(id.clone())
                .or_insert_with(|| location(id));
        }
        FederationSession::new(config, self.manifests.clone(), self.entries.clone())
            .expect("valid session config")
    }

    pub async fn manifest_fetches(&self, container_id: &str) -> usize {
        self.manifests.fetch_count(&location(container_id)).await
    }

    pub async fn entry_loads(&self, container_id: &str) -> usize {
        self.entries.load_count(&entry_uri(container_id)).await
    }
}
