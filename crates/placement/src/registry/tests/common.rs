use std::collections::{BTreeSet, HashSet};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::response::Response;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value;

use crate::config::{AuthConfig, CleanupPolicy, RegistryConfig};
use crate::registry::domain::{Branch, Company, CompanyId, Gender, Student, StudentId};
use crate::registry::memory::MemoryStore;
use crate::registry::repository::{
    CompanyFilter, Entity, EntityStore, RepositoryError, SortOrder, StudentFilter,
};
use crate::registry::router::SUPER_AUTH_HEADER;
use crate::registry::service::PlacementService;

pub(crate) const TOKEN: &str = "test-token";

fn fixed_created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

pub(crate) fn student(branch: &str, aggregate: f64) -> Student {
    Student {
        id: StudentId::default(),
        created_at: fixed_created_at(),
        first_name: "Asha".to_string(),
        middle_name: String::new(),
        last_name: "Rao".to_string(),
        email: Some("asha.rao@campus.edu".to_string()),
        contact_number: "9876543210".to_string(),
        dob: NaiveDate::from_ymd_opt(2002, 4, 17).expect("valid date"),
        gender: Gender::Female,
        branch: Branch::parse(branch).expect("known branch"),
        aggregate,
        applied_count: 0,
        revision: 0,
    }
}

pub(crate) fn company(branches: &[&str], threshold: f64) -> Company {
    Company {
        id: CompanyId::default(),
        created_at: fixed_created_at(),
        name: "Initech".to_string(),
        email: "hr@initech.com".to_string(),
        contact_number: "0123456789".to_string(),
        aggregate_threshold: threshold,
        allowed_branches: branches
            .iter()
            .map(|raw| Branch::parse(raw).expect("known branch"))
            .collect::<BTreeSet<_>>(),
        applied: Vec::new(),
        revision: 0,
    }
}

pub(crate) fn registry_config() -> RegistryConfig {
    RegistryConfig {
        page_size: 10,
        write_max_attempts: 3,
        cleanup: CleanupPolicy {
            max_attempts: 3,
            retry_backoff: Duration::ZERO,
        },
    }
}

pub(crate) type Students = ScriptedStore<Student>;
pub(crate) type Companies = ScriptedStore<Company>;

pub(crate) fn build_service() -> (
    Arc<PlacementService<Students, Companies>>,
    Arc<Students>,
    Arc<Companies>,
) {
    let students = Arc::new(Students::default());
    let companies = Arc::new(Companies::default());
    let service = PlacementService::new(
        Arc::clone(&students),
        Arc::clone(&companies),
        registry_config(),
    );
    (Arc::new(service), students, companies)
}

pub(crate) fn seed<E: Entity>(store: &ScriptedStore<E>, record: E) -> E {
    store.inner.insert(record).expect("seed insert")
}

pub(crate) fn reload<E: Entity>(store: &ScriptedStore<E>, id: &E::Id) -> E {
    store
        .inner
        .fetch(id)
        .expect("fetch")
        .expect("record present")
}

/// Every student's `applied_count` matches the number of companies listing it.
pub(crate) fn assert_relation_consistent(students: &Students, companies: &Companies) {
    let companies = companies
        .inner
        .find_where(&CompanyFilter::All)
        .expect("companies");
    for student in students.inner.find_where(&StudentFilter::All).expect("students") {
        let listed = companies
            .iter()
            .filter(|company| company.has_applicant(&student.id))
            .count();
        assert_eq!(
            student.applied_count as usize, listed,
            "relation drifted for {}",
            student.id
        );
    }
    for company in &companies {
        let unique: HashSet<_> = company.applied.iter().collect();
        assert_eq!(unique.len(), company.applied.len(), "duplicate applicant");
    }
}

type StoreHook<E> = Box<dyn FnOnce(&MemoryStore<E>) + Send>;

/// Memory store with injectable failures for exercising retry and partial-failure paths.
pub(crate) struct ScriptedStore<E: Entity> {
    pub(crate) inner: MemoryStore<E>,
    failing_updates: Mutex<HashSet<String>>,
    forced_conflicts: AtomicU32,
    finds_offline: AtomicBool,
    before_update: Mutex<Option<StoreHook<E>>>,
    before_delete: Mutex<Option<StoreHook<E>>>,
}

impl<E: Entity> Default for ScriptedStore<E> {
    fn default() -> Self {
        Self {
            inner: MemoryStore::default(),
            failing_updates: Mutex::new(HashSet::new()),
            forced_conflicts: AtomicU32::new(0),
            finds_offline: AtomicBool::new(false),
            before_update: Mutex::new(None),
            before_delete: Mutex::new(None),
        }
    }
}

impl<E: Entity> ScriptedStore<E> {
    pub(crate) fn fail_updates_for(&self, id: &E::Id) {
        self.failing_updates
            .lock()
            .expect("script mutex poisoned")
            .insert(id.to_string());
    }

    pub(crate) fn heal(&self, id: &E::Id) {
        self.failing_updates
            .lock()
            .expect("script mutex poisoned")
            .remove(&id.to_string());
    }

    pub(crate) fn force_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    pub(crate) fn set_finds_offline(&self, offline: bool) {
        self.finds_offline.store(offline, Ordering::SeqCst);
    }

    /// Runs `hook` against the backing store right before the next update is applied,
    /// standing in for a concurrent writer.
    pub(crate) fn before_next_update(&self, hook: impl FnOnce(&MemoryStore<E>) + Send + 'static) {
        *self.before_update.lock().expect("script mutex poisoned") = Some(Box::new(hook));
    }

    /// Runs `hook` against the backing store right before the next delete is applied.
    pub(crate) fn before_next_delete(&self, hook: impl FnOnce(&MemoryStore<E>) + Send + 'static) {
        *self.before_delete.lock().expect("script mutex poisoned") = Some(Box::new(hook));
    }
}

impl<E: Entity> EntityStore<E> for ScriptedStore<E> {
    fn insert(&self, entity: E) -> Result<E, RepositoryError> {
        self.inner.insert(entity)
    }

    fn fetch(&self, id: &E::Id) -> Result<Option<E>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn find_where(&self, filter: &E::Filter) -> Result<Vec<E>, RepositoryError> {
        if self.finds_offline.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("database offline".to_string()));
        }
        self.inner.find_where(filter)
    }

    fn count_where(&self, filter: &E::Filter) -> Result<usize, RepositoryError> {
        self.inner.count_where(filter)
    }

    fn page(
        &self,
        filter: &E::Filter,
        order: SortOrder,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<E>, RepositoryError> {
        self.inner.page(filter, order, skip, limit)
    }

    fn update(&self, entity: E) -> Result<E, RepositoryError> {
        let hook = self.before_update.lock().expect("script mutex poisoned").take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        let forced = self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if forced.is_ok() {
            return Err(RepositoryError::Conflict);
        }
        let failing = self
            .failing_updates
            .lock()
            .expect("script mutex poisoned")
            .contains(&entity.id().to_string());
        if failing {
            return Err(RepositoryError::Unavailable("database offline".to_string()));
        }
        self.inner.update(entity)
    }

    fn delete(&self, entity: &E) -> Result<E, RepositoryError> {
        let hook = self.before_delete.lock().expect("script mutex poisoned").take();
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        self.inner.delete(entity)
    }
}

/// Store whose every call fails.
pub(crate) struct UnavailableStore<E>(PhantomData<fn() -> E>);

impl<E> Default for UnavailableStore<E> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

impl<E: Entity> EntityStore<E> for UnavailableStore<E> {
    fn insert(&self, _entity: E) -> Result<E, RepositoryError> {
        offline()
    }

    fn fetch(&self, _id: &E::Id) -> Result<Option<E>, RepositoryError> {
        offline()
    }

    fn find_where(&self, _filter: &E::Filter) -> Result<Vec<E>, RepositoryError> {
        offline()
    }

    fn count_where(&self, _filter: &E::Filter) -> Result<usize, RepositoryError> {
        offline()
    }

    fn page(
        &self,
        _filter: &E::Filter,
        _order: SortOrder,
        _skip: usize,
        _limit: usize,
    ) -> Result<Vec<E>, RepositoryError> {
        offline()
    }

    fn update(&self, _entity: E) -> Result<E, RepositoryError> {
        offline()
    }

    fn delete(&self, _entity: &E) -> Result<E, RepositoryError> {
        offline()
    }
}

pub(crate) fn auth() -> AuthConfig {
    AuthConfig {
        api_prefix: "/api/v1".to_string(),
        super_auth_token: Some(TOKEN.to_string()),
    }
}

pub(crate) fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(SUPER_AUTH_HEADER, TOKEN);
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request builds"),
        None => builder.body(Body::empty()).expect("request builds"),
    }
}

pub(crate) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
