use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::repository::{Entity, EntityStore, RepositoryError, SortOrder};

/// Process-local entity store. Records are kept in insertion order.
pub struct MemoryStore<E: Entity> {
    records: Mutex<Vec<E>>,
    sequence: AtomicU64,
}

impl<E: Entity> Default for MemoryStore<E> {
    fn default() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(1),
        }
    }
}

impl<E: Entity> MemoryStore<E> {
    fn lock(&self) -> Result<MutexGuard<'_, Vec<E>>, RepositoryError> {
        self.records
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }

    fn next_id(&self) -> E::Id {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        E::Id::from(format!("{}-{sequence:06}", E::KIND.id_prefix()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Entity> EntityStore<E> for MemoryStore<E> {
    fn insert(&self, mut entity: E) -> Result<E, RepositoryError> {
        let mut records = self.lock()?;
        entity.assign_id(self.next_id());
        entity.set_revision(0);
        records.push(entity.clone());
        Ok(entity)
    }

    fn fetch(&self, id: &E::Id) -> Result<Option<E>, RepositoryError> {
        let records = self.lock()?;
        Ok(records.iter().find(|record| record.id() == id).cloned())
    }

    fn find_where(&self, filter: &E::Filter) -> Result<Vec<E>, RepositoryError> {
        let records = self.lock()?;
        Ok(records
            .iter()
            .filter(|record| record.matches(filter))
            .cloned()
            .collect())
    }

    fn count_where(&self, filter: &E::Filter) -> Result<usize, RepositoryError> {
        let records = self.lock()?;
        Ok(records
            .iter()
            .filter(|record| record.matches(filter))
            .count())
    }

    fn page(
        &self,
        filter: &E::Filter,
        order: SortOrder,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<E>, RepositoryError> {
        let mut matching = self.find_where(filter)?;
        match order {
            SortOrder::NewestFirst => {
                // later inserts win ties on identical timestamps
                matching.reverse();
                matching.sort_by_key(|record| Reverse(record.created_at()));
            }
            SortOrder::OldestFirst => {
                matching.sort_by_key(|record| record.created_at());
            }
        }
        Ok(matching.into_iter().skip(skip).take(limit).collect())
    }

    fn update(&self, mut entity: E) -> Result<E, RepositoryError> {
        let mut records = self.lock()?;
        let slot = records
            .iter_mut()
            .find(|record| record.id() == entity.id())
            .ok_or(RepositoryError::NotFound)?;

        if slot.revision() != entity.revision() {
            return Err(RepositoryError::Conflict);
        }

        entity.set_revision(entity.revision() + 1);
        *slot = entity.clone();
        Ok(entity)
    }

    fn delete(&self, entity: &E) -> Result<E, RepositoryError> {
        let mut records = self.lock()?;
        let index = records
            .iter()
            .position(|record| record.id() == entity.id())
            .ok_or(RepositoryError::NotFound)?;

        if records[index].revision() != entity.revision() {
            return Err(RepositoryError::Conflict);
        }

        Ok(records.remove(index))
    }
}
