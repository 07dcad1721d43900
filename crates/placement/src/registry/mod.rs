//! Student and company records plus the registration relation between them.
//!
//! A student's `appliedCount` must equal the number of companies whose `applied` list
//! holds that student's id. The [`RegistrationCoordinator`] keeps the two sides in step on
//! register/unregister; deletions repair references asynchronously through the
//! [`CleanupQueue`].

pub mod cleanup;
pub mod coordinator;
pub mod domain;
pub mod eligibility;
pub mod error;
pub mod memory;
pub mod pagination;
pub mod records;
pub mod repository;
pub mod router;
pub mod service;
pub mod validation;

#[cfg(test)]
mod tests;

pub use cleanup::{
    CascadeCleanupService, CleanupJob, CleanupQueue, CleanupSnapshot, CleanupTask, CleanupWorker,
    DeadLetter,
};
pub use coordinator::RegistrationCoordinator;
pub use domain::{
    Branch, Company, CompanyId, CompanyPatch, DeleteRequest, EntityKind, Gender, NewCompany,
    NewStudent, NumericInput, RegistrationRequest, Student, StudentId, StudentPatch,
};
pub use eligibility::{ineligibility_reasons, is_eligible, IneligibilityReason};
pub use error::{ErrorCode, PlacementError};
pub use memory::MemoryStore;
pub use pagination::{paginate, Offset, Page};
pub use records::RecordService;
pub use repository::{
    CompanyFilter, Entity, EntityStore, RepositoryError, SortOrder, StudentFilter,
};
pub use router::{placement_router, SUPER_AUTH_HEADER};
pub use service::PlacementService;
pub use validation::FieldViolation;
