use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::domain::{Company, CompanyId, EntityKind, RegistrationRequest, Student, StudentId};
use super::eligibility::{ineligibility_reasons, is_eligible};
use super::error::PlacementError;
use super::repository::{EntityStore, RepositoryError};
use super::validation;

/// Direction of a relation change between one student and one company.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelationChange {
    Register,
    Unregister,
}

impl RelationChange {
    const fn action(self) -> &'static str {
        match self {
            RelationChange::Register => "register",
            RelationChange::Unregister => "unregister",
        }
    }

    const fn inverse(self) -> Self {
        match self {
            RelationChange::Register => RelationChange::Unregister,
            RelationChange::Unregister => RelationChange::Register,
        }
    }

    fn check(self, student: &Student, company: &Company) -> Result<(), PlacementError> {
        match self {
            RelationChange::Register => {
                if !is_eligible(student, company) {
                    return Err(PlacementError::Ineligible {
                        student_id: student.id.clone(),
                        company_id: company.id.clone(),
                        reasons: ineligibility_reasons(student, company),
                    });
                }
                if company.has_applicant(&student.id) {
                    return Err(self.already_applied(&student.id, &company.id));
                }
                Ok(())
            }
            RelationChange::Unregister => {
                if company.has_applicant(&student.id) {
                    Ok(())
                } else {
                    Err(self.already_applied(&student.id, &company.id))
                }
            }
        }
    }

    /// Error for a company side that is already in the state this change would produce.
    fn already_applied(self, student_id: &StudentId, company_id: &CompanyId) -> PlacementError {
        let student_id = student_id.clone();
        let company_id = company_id.clone();
        match self {
            RelationChange::Register => PlacementError::AlreadyRegistered {
                student_id,
                company_id,
            },
            RelationChange::Unregister => PlacementError::NoRegistrationFound {
                student_id,
                company_id,
            },
        }
    }

    fn adjust_student(self, student: &mut Student) {
        match self {
            RelationChange::Register => student.applied_count += 1,
            RelationChange::Unregister => {
                student.applied_count = student.applied_count.saturating_sub(1)
            }
        }
    }

    /// Returns `false` when the company already reflects this change.
    fn adjust_company(self, company: &mut Company, student_id: &StudentId) -> bool {
        match self {
            RelationChange::Register => company.add_applicant(student_id),
            RelationChange::Unregister => company.remove_applicant(student_id),
        }
    }
}

/// Maintains the student/company relation across both records.
///
/// Writes always land on the student first and the company second. Stale reads are
/// detected through the store's revision check and retried up to `write_attempts`.
pub struct RegistrationCoordinator<S, C> {
    students: Arc<S>,
    companies: Arc<C>,
    write_attempts: u32,
}

impl<S, C> RegistrationCoordinator<S, C>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    pub fn new(students: Arc<S>, companies: Arc<C>, write_attempts: u32) -> Self {
        Self {
            students,
            companies,
            write_attempts: write_attempts.max(1),
        }
    }

    pub fn register(&self, request: RegistrationRequest) -> Result<(), PlacementError> {
        let (student_id, company_id) = validation::registration_ids(request)?;
        self.apply(&student_id, &company_id, RelationChange::Register)
    }

    pub fn unregister(&self, request: RegistrationRequest) -> Result<(), PlacementError> {
        let (student_id, company_id) = validation::registration_ids(request)?;
        self.apply(&student_id, &company_id, RelationChange::Unregister)
    }

    fn apply(
        &self,
        student_id: &StudentId,
        company_id: &CompanyId,
        change: RelationChange,
    ) -> Result<(), PlacementError> {
        let mut attempt = 1;
        let company = loop {
            let mut student = self.load_student(student_id)?;
            let company = self.load_company(company_id)?;
            change.check(&student, &company)?;

            change.adjust_student(&mut student);
            match self.students.update(student) {
                Ok(_) => break company,
                Err(RepositoryError::Conflict) if attempt < self.write_attempts => {
                    debug!(
                        action = change.action(),
                        %student_id,
                        attempt,
                        "student changed underneath the write; re-reading"
                    );
                    attempt += 1;
                }
                Err(source) => {
                    error!(
                        action = change.action(),
                        %student_id,
                        error = %source,
                        "student write failed"
                    );
                    return Err(PlacementError::update_failed(
                        EntityKind::Student,
                        student_id,
                        source,
                    ));
                }
            }
        };

        self.persist_company(company, student_id, change)?;
        info!(action = change.action(), %student_id, %company_id, "relation updated");
        Ok(())
    }

    fn persist_company(
        &self,
        mut company: Company,
        student_id: &StudentId,
        change: RelationChange,
    ) -> Result<(), PlacementError> {
        let company_id = company.id.clone();
        let mut attempt = 1;
        loop {
            if !change.adjust_company(&mut company, student_id) {
                // A concurrent call already moved the company side; undo our student write.
                warn!(
                    action = change.action(),
                    %student_id,
                    %company_id,
                    "company already reflects the change; reverting student side"
                );
                self.revert_student(student_id, change);
                return Err(change.already_applied(student_id, &company_id));
            }

            let failure = match self.companies.update(company) {
                Ok(_) => return Ok(()),
                Err(RepositoryError::Conflict) if attempt < self.write_attempts => {
                    attempt += 1;
                    match self.companies.fetch(&company_id) {
                        Ok(Some(fresh)) => {
                            company = fresh;
                            continue;
                        }
                        Ok(None) => RepositoryError::NotFound,
                        Err(source) => source,
                    }
                }
                Err(source) => source,
            };

            if matches!(failure, RepositoryError::NotFound) {
                warn!(
                    action = change.action(),
                    %student_id,
                    %company_id,
                    "company deleted after student write; reverting student side"
                );
                self.revert_student(student_id, change);
                return Err(PlacementError::not_found(EntityKind::Company, &company_id));
            }

            warn!(
                action = change.action(),
                %student_id,
                %company_id,
                error = %failure,
                "company write failed after student write committed; relation is inconsistent"
            );
            return Err(PlacementError::update_failed(
                EntityKind::Company,
                &company_id,
                failure,
            ));
        }
    }

    fn revert_student(&self, student_id: &StudentId, change: RelationChange) {
        let undo = change.inverse();
        for _ in 0..self.write_attempts {
            let mut student = match self.students.fetch(student_id) {
                Ok(Some(student)) => student,
                Ok(None) => return,
                Err(source) => {
                    error!(%student_id, error = %source, "unable to reload student for revert");
                    return;
                }
            };
            undo.adjust_student(&mut student);
            match self.students.update(student) {
                Ok(_) => return,
                Err(RepositoryError::Conflict) => continue,
                Err(source) => {
                    error!(%student_id, error = %source, "student revert failed");
                    return;
                }
            }
        }
        error!(%student_id, "student revert exhausted its attempts");
    }

    fn load_student(&self, student_id: &StudentId) -> Result<Student, PlacementError> {
        match self.students.fetch(student_id) {
            Ok(Some(student)) => Ok(student),
            Ok(None) => {
                warn!(%student_id, "student not found");
                Err(PlacementError::not_found(EntityKind::Student, student_id))
            }
            Err(source) => {
                error!(%student_id, error = %source, "student lookup failed");
                Err(PlacementError::Internal(source))
            }
        }
    }

    fn load_company(&self, company_id: &CompanyId) -> Result<Company, PlacementError> {
        match self.companies.fetch(company_id) {
            Ok(Some(company)) => Ok(company),
            Ok(None) => {
                warn!(%company_id, "company not found");
                Err(PlacementError::not_found(EntityKind::Company, company_id))
            }
            Err(source) => {
                error!(%company_id, error = %source, "company lookup failed");
                Err(PlacementError::Internal(source))
            }
        }
    }
}
