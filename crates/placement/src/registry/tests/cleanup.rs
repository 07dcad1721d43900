use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::common::*;
use crate::config::CleanupPolicy;
use crate::registry::cleanup::{
    CascadeCleanupService, CleanupJob, CleanupQueue, CleanupTask, CleanupWorker,
};
use crate::registry::domain::{Company, RegistrationRequest, Student};
use crate::registry::error::PlacementError;
use crate::registry::repository::EntityStore;
use crate::registry::StudentId;
use crate::registry::service::PlacementService;

fn register(
    service: &PlacementService<Students, Companies>,
    student: &Student,
    company: &Company,
) {
    service
        .coordinator()
        .register(RegistrationRequest::new(&student.id, &company.id))
        .expect("registration succeeds");
}

fn cleanup_service(
    students: &Arc<Students>,
    companies: &Arc<Companies>,
) -> CascadeCleanupService<Students, Companies> {
    CascadeCleanupService::new(Arc::clone(students), Arc::clone(companies), 3)
}

fn policy(max_attempts: u32) -> CleanupPolicy {
    CleanupPolicy {
        max_attempts,
        retry_backoff: Duration::ZERO,
    }
}

#[test]
fn company_delete_releases_each_applicant_once() {
    let (service, students, companies) = build_service();
    let asha = seed(&students, student("CSE", 85.0));
    let ravi = seed(&students, student("IT", 74.0));
    let initech = seed(&companies, company(&["CSE", "IT"], 70.0));
    let globex = seed(&companies, company(&["CSE"], 70.0));
    register(&service, &asha, &initech);
    register(&service, &ravi, &initech);
    register(&service, &asha, &globex);

    service
        .records()
        .delete_company(Some(initech.id.0.clone()))
        .expect("delete succeeds");

    assert_eq!(service.cleanup_queue().pending_len(), 1);
    assert_eq!(service.settle_cleanup(), 1);

    assert_eq!(reload(&students, &asha.id).applied_count, 1);
    assert_eq!(reload(&students, &ravi.id).applied_count, 0);
    assert!(matches!(
        service.records().get_company(&initech.id.0),
        Err(PlacementError::NotFound { .. })
    ));
    assert_relation_consistent(&students, &companies);
}

#[test]
fn company_delete_releases_registration_landing_just_before_it() {
    let (service, students, companies) = build_service();
    let asha = seed(&students, student("CSE", 85.0));
    let initech = seed(&companies, company(&["CSE"], 70.0));

    let racing_students = Arc::clone(&students);
    let (asha_id, initech_id) = (asha.id.clone(), initech.id.clone());
    companies.before_next_delete(move |store| {
        let mut applicant = reload(&racing_students, &asha_id);
        applicant.applied_count += 1;
        racing_students
            .inner
            .update(applicant)
            .expect("student side lands");
        let mut current = store.fetch(&initech_id).expect("fetch").expect("present");
        current.add_applicant(&asha_id);
        store.update(current).expect("company side lands");
    });

    service
        .records()
        .delete_company(Some(initech.id.0.clone()))
        .expect("delete succeeds");

    assert_eq!(service.settle_cleanup(), 1);
    assert_eq!(reload(&students, &asha.id).applied_count, 0);
    assert!(companies.inner.is_empty());
    assert_relation_consistent(&students, &companies);
}

#[test]
fn student_delete_detaches_registration_landing_just_before_it() {
    let (service, students, companies) = build_service();
    let asha = seed(&students, student("CSE", 85.0));
    let initech = seed(&companies, company(&["CSE"], 70.0));

    let racing_companies = Arc::clone(&companies);
    let (asha_id, initech_id) = (asha.id.clone(), initech.id.clone());
    students.before_next_delete(move |store| {
        let mut applicant = store.fetch(&asha_id).expect("fetch").expect("present");
        applicant.applied_count += 1;
        store.update(applicant).expect("student side lands");
        let mut current = reload(&racing_companies, &initech_id);
        current.add_applicant(&asha_id);
        racing_companies
            .inner
            .update(current)
            .expect("company side lands");
    });

    service
        .records()
        .delete_student(Some(asha.id.0.clone()))
        .expect("delete succeeds");

    assert_eq!(service.settle_cleanup(), 1);
    assert!(reload(&companies, &initech.id).applied.is_empty());
    assert!(students.inner.is_empty());
}

#[test]
fn company_without_applicants_queues_nothing() {
    let (service, _, companies) = build_service();
    let initech = seed(&companies, company(&["CSE"], 70.0));

    service
        .records()
        .delete_company(Some(initech.id.0.clone()))
        .expect("delete succeeds");

    assert_eq!(service.cleanup_queue().pending_len(), 0);
}

#[test]
fn student_delete_detaches_from_every_company() {
    let (service, students, companies) = build_service();
    let asha = seed(&students, student("CSE", 85.0));
    let ravi = seed(&students, student("CSE", 90.0));
    let initech = seed(&companies, company(&["CSE"], 70.0));
    let globex = seed(&companies, company(&["CSE"], 80.0));
    register(&service, &ravi, &initech);
    register(&service, &asha, &initech);
    register(&service, &asha, &globex);

    service
        .records()
        .delete_student(Some(asha.id.0.clone()))
        .expect("delete succeeds");
    service.settle_cleanup();

    assert_eq!(reload(&companies, &initech.id).applied, vec![ravi.id.clone()]);
    assert!(reload(&companies, &globex.id).applied.is_empty());
    assert_relation_consistent(&students, &companies);
}

#[test]
fn failed_applicant_is_retried_alone() {
    let (service, students, companies) = build_service();
    let asha = seed(&students, student("CSE", 85.0));
    let ravi = seed(&students, student("CSE", 75.0));
    let initech = seed(&companies, company(&["CSE"], 70.0));
    let globex = seed(&companies, company(&["CSE"], 70.0));
    register(&service, &asha, &initech);
    register(&service, &ravi, &initech);
    register(&service, &asha, &globex);
    students.fail_updates_for(&ravi.id);

    let cleanup = cleanup_service(&students, &companies);
    let queue = CleanupQueue::default();
    let job = CleanupJob::new(CleanupTask::ReleaseApplicants {
        company_id: initech.id.clone(),
        applicants: vec![asha.id.clone(), ravi.id.clone()],
    });

    let retry = cleanup
        .process(&queue, job, &policy(3))
        .expect("partial failure schedules a retry");
    assert_eq!(retry.attempt, 2);
    assert_eq!(retry.not_before, None);
    assert_eq!(
        retry.task,
        CleanupTask::ReleaseApplicants {
            company_id: initech.id.clone(),
            applicants: vec![ravi.id.clone()],
        }
    );
    assert_eq!(reload(&students, &asha.id).applied_count, 1);

    students.heal(&ravi.id);
    assert!(cleanup.process(&queue, retry, &policy(3)).is_none());

    // asha was released on the first pass only
    assert_eq!(reload(&students, &asha.id).applied_count, 1);
    assert_eq!(reload(&students, &ravi.id).applied_count, 0);
    assert!(queue.dead_letters().is_empty());
}

#[test]
fn exhausted_job_is_dead_lettered() {
    let (_, students, companies) = build_service();
    let initech = seed(&companies, company(&["CSE"], 70.0));
    companies.set_finds_offline(true);

    let cleanup = cleanup_service(&students, &companies);
    let queue = CleanupQueue::default();
    queue.enqueue(CleanupTask::DetachStudent {
        student_id: StudentId("stu-000042".to_string()),
    });

    assert_eq!(cleanup.drain(&queue, &policy(3)), 3);

    let letters = queue.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].job.attempt, 3);
    assert!(letters[0].last_error.contains("database offline"));
    assert_eq!(queue.pending_len(), 0);
    assert!(reload(&companies, &initech.id).applied.is_empty());
}

#[test]
fn release_for_vanished_student_is_skipped() {
    let (service, students, companies) = build_service();
    let asha = seed(&students, student("CSE", 85.0));
    let initech = seed(&companies, company(&["CSE"], 70.0));
    register(&service, &asha, &initech);
    let current = reload(&students, &asha.id);
    students.inner.delete(&current).expect("delete");

    let cleanup = cleanup_service(&students, &companies);
    let updated = cleanup
        .run(&CleanupTask::ReleaseApplicants {
            company_id: initech.id.clone(),
            applicants: vec![asha.id.clone()],
        })
        .expect("nothing left to release");
    assert_eq!(updated, 0);
}

#[test]
fn snapshot_reports_pending_jobs() {
    let (service, students, _) = build_service();
    let asha = seed(&students, student("CSE", 85.0));

    service
        .records()
        .delete_student(Some(asha.id.0.clone()))
        .expect("delete succeeds");

    let snapshot = serde_json::to_value(service.cleanup_snapshot()).expect("serializes");
    assert_eq!(snapshot["pending"][0]["task"]["kind"], "detachStudent");
    assert_eq!(snapshot["pending"][0]["task"]["studentId"], asha.id.0.as_str());
    assert_eq!(snapshot["deadLetters"], serde_json::json!([]));
}

#[tokio::test]
async fn worker_settles_queued_cleanup() {
    let (service, students, companies) = build_service();
    let asha = seed(&students, student("CSE", 85.0));
    let initech = seed(&companies, company(&["CSE"], 70.0));
    register(&service, &asha, &initech);

    let worker = service.spawn_cleanup_worker();
    service
        .records()
        .delete_company(Some(initech.id.0.clone()))
        .expect("delete succeeds");

    let settled = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if reload(&students, &asha.id).applied_count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    worker.abort();

    assert!(settled.is_ok(), "worker did not release the applicant");
    assert_eq!(service.cleanup_queue().pending_len(), 0);
}

#[tokio::test]
async fn worker_retries_after_backoff() {
    let (_, students, companies) = build_service();
    let asha = seed(&students, student("CSE", 85.0));
    let mut initech = company(&["CSE"], 70.0);
    initech.applied.push(asha.id.clone());
    let initech = seed(&companies, initech);
    let mut stored = reload(&students, &asha.id);
    stored.applied_count = 1;
    students.inner.update(stored).expect("seed count");
    students.fail_updates_for(&asha.id);

    let cleanup = Arc::new(cleanup_service(&students, &companies));
    let queue = Arc::new(CleanupQueue::default());
    let worker = CleanupWorker::new(
        Arc::clone(&cleanup),
        Arc::clone(&queue),
        CleanupPolicy {
            max_attempts: 5,
            retry_backoff: Duration::from_millis(20),
        },
    )
    .spawn();

    queue.enqueue(CleanupTask::ReleaseApplicants {
        company_id: initech.id.clone(),
        applicants: vec![asha.id.clone()],
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    students.heal(&asha.id);

    let settled = tokio::time::timeout(Duration::from_secs(2), async {
        while reload(&students, &asha.id).applied_count != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    worker.abort();

    assert!(settled.is_ok(), "retry never landed");
    assert!(queue.dead_letters().is_empty());
}

#[test]
fn queue_holds_back_jobs_until_their_retry_time() {
    let queue = CleanupQueue::default();
    queue.requeue(CleanupJob {
        task: CleanupTask::DetachStudent {
            student_id: StudentId("stu-000001".to_string()),
        },
        attempt: 2,
        not_before: Some(Utc::now() + chrono::Duration::seconds(60)),
    });
    queue.enqueue(CleanupTask::DetachStudent {
        student_id: StudentId("stu-000002".to_string()),
    });

    let due = queue.try_next().expect("fresh job is due");
    assert_eq!(due.attempt, 1);
    assert!(queue.try_next().is_none());
    assert_eq!(queue.pending_len(), 1);

    let held = queue.take_next().expect("drain ignores retry times");
    assert_eq!(held.attempt, 2);
}

#[tokio::test]
async fn job_backing_off_stays_visible_in_snapshot() {
    let (_, students, companies) = build_service();
    let asha = seed(&students, student("CSE", 85.0));
    let mut initech = company(&["CSE"], 70.0);
    initech.applied.push(asha.id.clone());
    let initech = seed(&companies, initech);
    let mut stored = reload(&students, &asha.id);
    stored.applied_count = 1;
    students.inner.update(stored).expect("seed count");
    students.fail_updates_for(&asha.id);

    let queue = Arc::new(CleanupQueue::default());
    let worker = CleanupWorker::new(
        Arc::new(cleanup_service(&students, &companies)),
        Arc::clone(&queue),
        CleanupPolicy {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(5),
        },
    )
    .spawn();

    queue.enqueue(CleanupTask::ReleaseApplicants {
        company_id: initech.id.clone(),
        applicants: vec![asha.id.clone()],
    });

    let retried = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let snapshot = queue.snapshot();
            if snapshot.pending.iter().any(|job| job.attempt == 2) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first attempt fails and is requeued");

    assert_eq!(retried.pending.len(), 1);
    assert!(retried.dead_letters.is_empty());
    let not_before = retried.pending[0].not_before.expect("retry time recorded");
    assert!(not_before > Utc::now());

    let payload = serde_json::to_value(&retried).expect("serializes");
    assert!(payload["pending"][0]["notBefore"].is_string());

    worker.abort();
    let _ = worker.await;
    assert_eq!(queue.pending_len(), 1, "aborting the worker keeps the job queued");
}
