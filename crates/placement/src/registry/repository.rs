use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Utc};

use super::domain::{Company, CompanyId, EntityKind, Student, StudentId};

/// Record shape the entity store understands.
///
/// The store owns `id` assignment and `revision` bookkeeping; callers hand back the
/// revision they read so stale writes can be rejected.
pub trait Entity: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Display + fmt::Debug + From<String> + Send + Sync + 'static;
    type Filter: fmt::Debug + Send + Sync;

    const KIND: EntityKind;

    fn id(&self) -> &Self::Id;
    fn assign_id(&mut self, id: Self::Id);
    fn created_at(&self) -> DateTime<Utc>;
    fn revision(&self) -> u64;
    fn set_revision(&mut self, revision: u64);
    fn matches(&self, filter: &Self::Filter) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentFilter {
    All,
    IdIn(Vec<StudentId>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanyFilter {
    All,
    HasApplicant(StudentId),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

impl Entity for Student {
    type Id = StudentId;
    type Filter = StudentFilter;

    const KIND: EntityKind = EntityKind::Student;

    fn id(&self) -> &StudentId {
        &self.id
    }

    fn assign_id(&mut self, id: StudentId) {
        self.id = id;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn matches(&self, filter: &StudentFilter) -> bool {
        match filter {
            StudentFilter::All => true,
            StudentFilter::IdIn(ids) => ids.contains(&self.id),
        }
    }
}

impl Entity for Company {
    type Id = CompanyId;
    type Filter = CompanyFilter;

    const KIND: EntityKind = EntityKind::Company;

    fn id(&self) -> &CompanyId {
        &self.id
    }

    fn assign_id(&mut self, id: CompanyId) {
        self.id = id;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    fn matches(&self, filter: &CompanyFilter) -> bool {
        match filter {
            CompanyFilter::All => true,
            CompanyFilter::HasApplicant(student_id) => self.has_applicant(student_id),
        }
    }
}

/// Storage abstraction so the coordinator and cleanup service can be exercised in isolation.
pub trait EntityStore<E: Entity>: Send + Sync {
    /// Persist a new record, assigning its id and initial revision.
    fn insert(&self, entity: E) -> Result<E, RepositoryError>;
    fn fetch(&self, id: &E::Id) -> Result<Option<E>, RepositoryError>;
    fn find_where(&self, filter: &E::Filter) -> Result<Vec<E>, RepositoryError>;
    fn count_where(&self, filter: &E::Filter) -> Result<usize, RepositoryError>;
    fn page(
        &self,
        filter: &E::Filter,
        order: SortOrder,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<E>, RepositoryError>;
    /// Replace the stored record when its revision still matches `entity.revision()`.
    /// Returns the stored copy carrying the bumped revision.
    fn update(&self, entity: E) -> Result<E, RepositoryError>;
    /// Remove the stored record when its revision still matches `entity.revision()`.
    /// Returns the removed copy, which is what relation cleanup must be built from.
    fn delete(&self, entity: &E) -> Result<E, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
