use metrics_exporter_prometheus::PrometheusHandle;
use placement::config::RegistryConfig;
use placement::registry::{Company, MemoryStore, PlacementService, Student};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) type StudentStore = MemoryStore<Student>;
pub(crate) type CompanyStore = MemoryStore<Company>;
pub(crate) type Registry = PlacementService<StudentStore, CompanyStore>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Registry backed by process-local stores.
pub(crate) fn in_memory_registry(config: RegistryConfig) -> Arc<Registry> {
    Arc::new(PlacementService::new(
        Arc::new(StudentStore::default()),
        Arc::new(CompanyStore::default()),
        config,
    ))
}
