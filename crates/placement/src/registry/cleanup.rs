//! Cascade cleanup of relation references after a student or company is deleted.
//!
//! Deletions enqueue a [`CleanupTask`] and return immediately. A [`CleanupWorker`]
//! drains the queue in the background; a task that fails for some records is narrowed
//! to those records and requeued with a `notBefore` retry time, then parked as a
//! [`DeadLetter`] once its attempts run out. Jobs waiting out their backoff stay in the
//! queue and show up in [`CleanupSnapshot::pending`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::CleanupPolicy;

use super::domain::{Company, CompanyId, Student, StudentId};
use super::repository::{CompanyFilter, EntityStore, RepositoryError, StudentFilter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CleanupTask {
    /// A company was deleted: each listed applicant loses one from `appliedCount`.
    ReleaseApplicants {
        company_id: CompanyId,
        applicants: Vec<StudentId>,
    },
    /// A student was deleted: drop the id from every company's `applied` list.
    DetachStudent { student_id: StudentId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupJob {
    pub task: CleanupTask,
    pub attempt: u32,
    /// Earliest time the worker may pick the job up again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
}

impl CleanupJob {
    pub fn new(task: CleanupTask) -> Self {
        Self {
            task,
            attempt: 1,
            not_before: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.not_before, Some(at) if at > now)
    }
}

fn retry_at(backoff: Duration) -> Option<DateTime<Utc>> {
    if backoff.is_zero() {
        return None;
    }
    let delay = chrono::Duration::from_std(backoff).ok()?;
    Utc::now().checked_add_signed(delay)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub job: CleanupJob,
    pub failed_at: DateTime<Utc>,
    pub last_error: String,
}

/// Point-in-time view of the queue for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSnapshot {
    pub pending: Vec<CleanupJob>,
    pub dead_letters: Vec<DeadLetter>,
}

#[derive(Default)]
pub struct CleanupQueue {
    pending: Mutex<VecDeque<CleanupJob>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    ready: Notify,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CleanupQueue {
    pub fn enqueue(&self, task: CleanupTask) {
        self.requeue(CleanupJob::new(task));
    }

    pub fn requeue(&self, job: CleanupJob) {
        relock(&self.pending).push_back(job);
        self.ready.notify_one();
    }

    /// Pops the oldest job whose retry time has passed.
    pub fn try_next(&self) -> Option<CleanupJob> {
        let now = Utc::now();
        let mut pending = relock(&self.pending);
        let index = pending.iter().position(|job| job.is_due(now))?;
        pending.remove(index)
    }

    /// Pops the oldest job regardless of its retry time.
    pub fn take_next(&self) -> Option<CleanupJob> {
        relock(&self.pending).pop_front()
    }

    fn next_deadline(&self) -> Option<DateTime<Utc>> {
        relock(&self.pending)
            .iter()
            .filter_map(|job| job.not_before)
            .min()
    }

    /// Waits until a job is due, sleeping until the earliest retry time when every
    /// queued job is still backing off.
    pub async fn next(&self) -> CleanupJob {
        loop {
            if let Some(job) = self.try_next() {
                return job;
            }
            match self.next_deadline() {
                Some(deadline) => {
                    let wait = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        _ = self.ready.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => self.ready.notified().await,
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        relock(&self.pending).len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        relock(&self.dead_letters).clone()
    }

    fn bury(&self, letter: DeadLetter) {
        relock(&self.dead_letters).push(letter);
    }

    pub fn snapshot(&self) -> CleanupSnapshot {
        CleanupSnapshot {
            pending: relock(&self.pending).iter().cloned().collect(),
            dead_letters: self.dead_letters(),
        }
    }
}

/// Records a task could not finish, narrowed to what still needs doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub remaining: CleanupTask,
    pub reason: String,
}

pub struct CascadeCleanupService<S, C> {
    students: Arc<S>,
    companies: Arc<C>,
    write_attempts: u32,
}

impl<S, C> CascadeCleanupService<S, C>
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

    /// Runs one task to completion, returning how many records were rewritten.
    pub fn run(&self, task: &CleanupTask) -> Result<usize, CleanupFailure> {
        match task {
            CleanupTask::ReleaseApplicants {
                company_id,
                applicants,
            } => self.release_applicants(company_id, applicants),
            CleanupTask::DetachStudent { student_id } => self.detach_student(student_id),
        }
    }

    fn release_applicants(
        &self,
        company_id: &CompanyId,
        applicants: &[StudentId],
    ) -> Result<usize, CleanupFailure> {
        let students = self
            .students
            .find_where(&StudentFilter::IdIn(applicants.to_vec()))
            .map_err(|source| {
                error!(
                    %company_id,
                    error = %source,
                    action = "company-delete-findStudents",
                    "applicant lookup failed"
                );
                CleanupFailure {
                    remaining: CleanupTask::ReleaseApplicants {
                        company_id: company_id.clone(),
                        applicants: applicants.to_vec(),
                    },
                    reason: source.to_string(),
                }
            })?;

        let mut updated = 0;
        let mut failed = Vec::new();
        let mut last_error = None;
        for student in students {
            let student_id = student.id.clone();
            match self.decrement_applied(student) {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(source) => {
                    error!(
                        %company_id,
                        %student_id,
                        error = %source,
                        action = "company-delete-updateStudent",
                        "applicant release failed"
                    );
                    last_error = Some(source.to_string());
                    failed.push(student_id);
                }
            }
        }

        match last_error {
            None => Ok(updated),
            Some(reason) => Err(CleanupFailure {
                remaining: CleanupTask::ReleaseApplicants {
                    company_id: company_id.clone(),
                    applicants: failed,
                },
                reason,
            }),
        }
    }

    /// Returns `false` when the student vanished before the write landed.
    fn decrement_applied(&self, mut student: Student) -> Result<bool, RepositoryError> {
        let mut attempt = 1;
        loop {
            let student_id = student.id.clone();
            student.applied_count = student.applied_count.saturating_sub(1);
            match self.students.update(student) {
                Ok(_) => return Ok(true),
                Err(RepositoryError::NotFound) => return Ok(false),
                Err(RepositoryError::Conflict) if attempt < self.write_attempts => {
                    attempt += 1;
                    match self.students.fetch(&student_id)? {
                        Some(fresh) => student = fresh,
                        None => return Ok(false),
                    }
                }
                Err(source) => return Err(source),
            }
        }
    }

    fn detach_student(&self, student_id: &StudentId) -> Result<usize, CleanupFailure> {
        let failure = |reason: String| CleanupFailure {
            remaining: CleanupTask::DetachStudent {
                student_id: student_id.clone(),
            },
            reason,
        };

        let companies = self
            .companies
            .find_where(&CompanyFilter::HasApplicant(student_id.clone()))
            .map_err(|source| {
                error!(
                    %student_id,
                    error = %source,
                    action = "student-delete-findCompanies",
                    "company lookup failed"
                );
                failure(source.to_string())
            })?;

        let mut updated = 0;
        let mut last_error = None;
        for company in companies {
            let company_id = company.id.clone();
            match self.remove_applicant(company, student_id) {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(source) => {
                    error!(
                        %student_id,
                        %company_id,
                        error = %source,
                        action = "student-delete-updateCompany",
                        "company detach failed"
                    );
                    last_error = Some(source.to_string());
                }
            }
        }

        // re-running a detach is harmless, so the whole task is retried
        match last_error {
            None => Ok(updated),
            Some(reason) => Err(failure(reason)),
        }
    }

    fn remove_applicant(
        &self,
        mut company: Company,
        student_id: &StudentId,
    ) -> Result<bool, RepositoryError> {
        let mut attempt = 1;
        loop {
            if !company.remove_applicant(student_id) {
                return Ok(false);
            }
            let company_id = company.id.clone();
            match self.companies.update(company) {
                Ok(_) => return Ok(true),
                Err(RepositoryError::NotFound) => return Ok(false),
                Err(RepositoryError::Conflict) if attempt < self.write_attempts => {
                    attempt += 1;
                    match self.companies.fetch(&company_id)? {
                        Some(fresh) => company = fresh,
                        None => return Ok(false),
                    }
                }
                Err(source) => return Err(source),
            }
        }
    }

    /// Runs one job. Returns the narrowed follow-up job, stamped with its retry time,
    /// when another attempt is allowed; exhausted jobs are dead-lettered on `queue`.
    pub fn process(
        &self,
        queue: &CleanupQueue,
        job: CleanupJob,
        policy: &CleanupPolicy,
    ) -> Option<CleanupJob> {
        match self.run(&job.task) {
            Ok(updated) => {
                info!(task = ?job.task, attempt = job.attempt, updated, "cleanup task finished");
                None
            }
            Err(failure) if job.attempt < policy.max_attempts => {
                let not_before = retry_at(policy.retry_backoff);
                warn!(
                    task = ?failure.remaining,
                    attempt = job.attempt,
                    reason = %failure.reason,
                    ?not_before,
                    "cleanup task incomplete; scheduling retry"
                );
                Some(CleanupJob {
                    task: failure.remaining,
                    attempt: job.attempt + 1,
                    not_before,
                })
            }
            Err(failure) => {
                error!(
                    task = ?failure.remaining,
                    attempt = job.attempt,
                    reason = %failure.reason,
                    "cleanup task exhausted its attempts; dead-lettering"
                );
                queue.bury(DeadLetter {
                    job: CleanupJob {
                        task: failure.remaining,
                        attempt: job.attempt,
                        not_before: None,
                    },
                    failed_at: Utc::now(),
                    last_error: failure.reason,
                });
                None
            }
        }
    }

    /// Processes queued jobs inline, ignoring retry times, until the queue is empty.
    pub fn drain(&self, queue: &CleanupQueue, policy: &CleanupPolicy) -> usize {
        let mut processed = 0;
        while let Some(job) = queue.take_next() {
            processed += 1;
            if let Some(retry) = self.process(queue, job, policy) {
                queue.requeue(retry);
            }
        }
        processed
    }
}

/// Background consumer of the cleanup queue.
pub struct CleanupWorker<S, C> {
    service: Arc<CascadeCleanupService<S, C>>,
    queue: Arc<CleanupQueue>,
    policy: CleanupPolicy,
}

impl<S, C> CleanupWorker<S, C>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    pub fn new(
        service: Arc<CascadeCleanupService<S, C>>,
        queue: Arc<CleanupQueue>,
        policy: CleanupPolicy,
    ) -> Self {
        Self {
            service,
            queue,
            policy,
        }
    }

    /// Spawns the worker loop on the current tokio runtime. Abort the handle to stop it;
    /// jobs still backing off stay in the queue.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("cleanup worker started");
            loop {
                let job = self.queue.next().await;
                if let Some(retry) = self.service.process(&self.queue, job, &self.policy) {
                    self.queue.requeue(retry);
                }
            }
        })
    }
}
