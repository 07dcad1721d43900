use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::{CleanupPolicy, RegistryConfig};

use super::cleanup::{CascadeCleanupService, CleanupQueue, CleanupSnapshot, CleanupWorker};
use super::coordinator::RegistrationCoordinator;
use super::domain::{Company, Student};
use super::records::RecordService;
use super::repository::EntityStore;

/// Facade wiring the record service, registration coordinator, and cleanup pipeline
/// over one pair of stores.
pub struct PlacementService<S, C> {
    records: RecordService<S, C>,
    coordinator: RegistrationCoordinator<S, C>,
    cleanup: Arc<CascadeCleanupService<S, C>>,
    queue: Arc<CleanupQueue>,
    policy: CleanupPolicy,
}

impl<S, C> PlacementService<S, C>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    pub fn new(students: Arc<S>, companies: Arc<C>, config: RegistryConfig) -> Self {
        let queue = Arc::new(CleanupQueue::default());
        let records = RecordService::new(
            Arc::clone(&students),
            Arc::clone(&companies),
            Arc::clone(&queue),
            config.page_size,
            config.write_max_attempts,
        );
        let coordinator = RegistrationCoordinator::new(
            Arc::clone(&students),
            Arc::clone(&companies),
            config.write_max_attempts,
        );
        let cleanup = Arc::new(CascadeCleanupService::new(
            students,
            companies,
            config.write_max_attempts,
        ));

        Self {
            records,
            coordinator,
            cleanup,
            queue,
            policy: config.cleanup,
        }
    }

    pub fn records(&self) -> &RecordService<S, C> {
        &self.records
    }

    pub fn coordinator(&self) -> &RegistrationCoordinator<S, C> {
        &self.coordinator
    }

    pub fn cleanup_queue(&self) -> &Arc<CleanupQueue> {
        &self.queue
    }

    pub fn cleanup_snapshot(&self) -> CleanupSnapshot {
        self.queue.snapshot()
    }

    /// Starts the background cleanup worker on the current runtime.
    pub fn spawn_cleanup_worker(&self) -> JoinHandle<()> {
        CleanupWorker::new(
            Arc::clone(&self.cleanup),
            Arc::clone(&self.queue),
            self.policy.clone(),
        )
        .spawn()
    }

    /// Runs every queued cleanup job inline. Used where no worker is running.
    pub fn settle_cleanup(&self) -> usize {
        self.cleanup.drain(&self.queue, &self.policy)
    }
}
