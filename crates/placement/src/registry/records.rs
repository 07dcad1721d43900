use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use super::cleanup::{CleanupQueue, CleanupTask};
use super::domain::{
    Company, CompanyId, CompanyPatch, NewCompany, NewStudent, Student, StudentId, StudentPatch,
};
use super::error::PlacementError;
use super::pagination::{paginate, Offset, Page};
use super::repository::{
    CompanyFilter, Entity, EntityStore, RepositoryError, SortOrder, StudentFilter,
};
use super::validation;

/// Create/read/update/delete for students and companies.
///
/// Relation fields (`appliedCount`, `applied`) are never written here; deletes hand the
/// relation repair to the cleanup queue.
pub struct RecordService<S, C> {
    students: Arc<S>,
    companies: Arc<C>,
    cleanup: Arc<CleanupQueue>,
    page_size: usize,
    write_attempts: u32,
}

impl<S, C> RecordService<S, C>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    pub fn new(
        students: Arc<S>,
        companies: Arc<C>,
        cleanup: Arc<CleanupQueue>,
        page_size: usize,
        write_attempts: u32,
    ) -> Self {
        Self {
            students,
            companies,
            cleanup,
            page_size: page_size.max(1),
            write_attempts: write_attempts.max(1),
        }
    }

    pub fn create_student(&self, request: NewStudent) -> Result<Student, PlacementError> {
        let student = validation::new_student(request, Utc::now())?;
        let stored = self.students.insert(student).map_err(|source| {
            error!(error = %source, "student insert failed");
            PlacementError::Internal(source)
        })?;
        info!(student_id = %stored.id, branch = %stored.branch, "student created");
        Ok(stored)
    }

    pub fn update_student(&self, request: StudentPatch) -> Result<Student, PlacementError> {
        let (student_id, changes) = validation::student_patch(request)?;
        let stored: Student = self.rewrite(self.students.as_ref(), &student_id, |student| {
            changes.clone().apply(student)
        })?;
        info!(%student_id, revision = stored.revision, "student updated");
        Ok(stored)
    }

    pub fn get_student(&self, raw_id: &str) -> Result<Student, PlacementError> {
        let student_id = StudentId(validation::entity_id("id", Some(raw_id.to_string()))?);
        self.load(self.students.as_ref(), &student_id)
    }

    pub fn list_students(&self, offset: Offset) -> Result<Page<Student>, PlacementError> {
        Ok(paginate(
            self.students.as_ref(),
            offset,
            &StudentFilter::All,
            SortOrder::NewestFirst,
            self.page_size,
        )?)
    }

    pub fn delete_student(&self, raw_id: Option<String>) -> Result<(), PlacementError> {
        let student_id = StudentId(validation::entity_id("id", raw_id)?);
        self.remove::<Student, S>(self.students.as_ref(), &student_id)?;

        self.cleanup.enqueue(CleanupTask::DetachStudent {
            student_id: student_id.clone(),
        });
        info!(%student_id, "student deleted; detach queued");
        Ok(())
    }

    pub fn create_company(&self, request: NewCompany) -> Result<Company, PlacementError> {
        let company = validation::new_company(request, Utc::now())?;
        let stored = self.companies.insert(company).map_err(|source| {
            error!(error = %source, "company insert failed");
            PlacementError::Internal(source)
        })?;
        info!(company_id = %stored.id, name = %stored.name, "company created");
        Ok(stored)
    }

    pub fn update_company(&self, request: CompanyPatch) -> Result<Company, PlacementError> {
        let (company_id, changes) = validation::company_patch(request)?;
        let stored: Company = self.rewrite(self.companies.as_ref(), &company_id, |company| {
            changes.clone().apply(company)
        })?;
        info!(%company_id, revision = stored.revision, "company updated");
        Ok(stored)
    }

    pub fn get_company(&self, raw_id: &str) -> Result<Company, PlacementError> {
        let company_id = CompanyId(validation::entity_id("id", Some(raw_id.to_string()))?);
        self.load(self.companies.as_ref(), &company_id)
    }

    pub fn list_companies(&self, offset: Offset) -> Result<Page<Company>, PlacementError> {
        Ok(paginate(
            self.companies.as_ref(),
            offset,
            &CompanyFilter::All,
            SortOrder::NewestFirst,
            self.page_size,
        )?)
    }

    pub fn delete_company(&self, raw_id: Option<String>) -> Result<(), PlacementError> {
        let company_id = CompanyId(validation::entity_id("id", raw_id)?);
        let company: Company = self.remove(self.companies.as_ref(), &company_id)?;

        if company.applied.is_empty() {
            info!(%company_id, "company deleted");
        } else {
            info!(
                %company_id,
                applicants = company.applied.len(),
                "company deleted; applicant release queued"
            );
            self.cleanup.enqueue(CleanupTask::ReleaseApplicants {
                company_id,
                applicants: company.applied,
            });
        }
        Ok(())
    }

    fn load<E, St>(&self, store: &St, id: &E::Id) -> Result<E, PlacementError>
    where
        E: Entity,
        St: EntityStore<E> + ?Sized,
    {
        match store.fetch(id) {
            Ok(Some(record)) => Ok(record),
            Ok(None) => {
                warn!(kind = %E::KIND, %id, "record not found");
                Err(PlacementError::not_found(E::KIND, id))
            }
            Err(source) => {
                error!(kind = %E::KIND, %id, error = %source, "record lookup failed");
                Err(PlacementError::Internal(source))
            }
        }
    }

    /// Loads, edits, and writes back a record, re-reading when the write races another.
    fn rewrite<E, St>(
        &self,
        store: &St,
        id: &E::Id,
        edit: impl Fn(&mut E),
    ) -> Result<E, PlacementError>
    where
        E: Entity,
        St: EntityStore<E> + ?Sized,
    {
        let mut attempt = 1;
        loop {
            let mut record = self.load(store, id)?;
            edit(&mut record);
            match store.update(record) {
                Ok(stored) => return Ok(stored),
                Err(RepositoryError::Conflict) if attempt < self.write_attempts => attempt += 1,
                Err(RepositoryError::NotFound) => {
                    return Err(PlacementError::not_found(E::KIND, id))
                }
                Err(source) => {
                    error!(kind = %E::KIND, %id, error = %source, "record write failed");
                    return Err(PlacementError::update_failed(E::KIND, id, source));
                }
            }
        }
    }

    /// Deletes the current revision of a record and returns what was removed, re-reading
    /// when a concurrent write moves the revision first.
    fn remove<E, St>(&self, store: &St, id: &E::Id) -> Result<E, PlacementError>
    where
        E: Entity,
        St: EntityStore<E> + ?Sized,
    {
        let mut attempt = 1;
        loop {
            let record = self.load(store, id)?;
            match store.delete(&record) {
                Ok(removed) => return Ok(removed),
                Err(RepositoryError::Conflict) if attempt < self.write_attempts => {
                    warn!(
                        kind = %E::KIND,
                        %id,
                        attempt,
                        "record changed before delete; reloading"
                    );
                    attempt += 1;
                }
                Err(RepositoryError::NotFound) => {
                    return Err(PlacementError::not_found(E::KIND, id))
                }
                Err(source) => {
                    error!(kind = %E::KIND, %id, error = %source, "record delete failed");
                    return Err(PlacementError::update_failed(E::KIND, id, source));
                }
            }
        }
    }
}
