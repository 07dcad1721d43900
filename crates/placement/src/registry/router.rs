use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::config::AuthConfig;

use super::domain::{
    Company, CompanyPatch, DeleteRequest, NewCompany, NewStudent, RegistrationRequest, Student,
    StudentPatch,
};
use super::error::{ErrorCode, PlacementError};
use super::pagination::Offset;
use super::repository::EntityStore;
use super::service::PlacementService;
use super::validation::FieldViolation;

/// Header carrying the shared secret for every registry route.
pub const SUPER_AUTH_HEADER: &str = "authentication";

type Shared<S, C> = State<Arc<PlacementService<S, C>>>;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    offset: Option<String>,
}

/// Router exposing the registry under `auth.api_prefix`, guarded by the super-auth header.
pub fn placement_router<S, C>(service: Arc<PlacementService<S, C>>, auth: &AuthConfig) -> Router
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    let token = Arc::new(auth.super_auth_token.clone());
    let guarded = Router::new()
        .route("/student/create", post(create_student_handler::<S, C>))
        .route("/student/update", put(update_student_handler::<S, C>))
        .route("/student/list", get(list_students_handler::<S, C>))
        .route("/student/:id", get(get_student_handler::<S, C>))
        .route("/student", delete(delete_student_handler::<S, C>))
        .route("/company/create", post(create_company_handler::<S, C>))
        .route("/company/update", put(update_company_handler::<S, C>))
        .route("/company/list", get(list_companies_handler::<S, C>))
        .route("/company/:id", get(get_company_handler::<S, C>))
        .route("/company", delete(delete_company_handler::<S, C>))
        .route(
            "/register",
            post(register_handler::<S, C>).delete(unregister_handler::<S, C>),
        )
        .route("/cleanup", get(cleanup_handler::<S, C>))
        .route_layer(middleware::from_fn_with_state(token, require_super_auth))
        .with_state(service);

    if auth.api_prefix.is_empty() {
        Router::new().merge(guarded)
    } else {
        Router::new().nest(&auth.api_prefix, guarded)
    }
}

pub(crate) async fn require_super_auth(
    State(token): State<Arc<Option<String>>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let presented = headers
        .get(SUPER_AUTH_HEADER)
        .and_then(|value| value.to_str().ok());

    match (token.as_deref(), presented) {
        (Some(expected), Some(presented)) if expected == presented => next.run(request).await,
        _ => {
            warn!(path = %request.uri().path(), "rejected request without valid super auth");
            let payload = json!({
                "error": "Invalid Credentials",
                "message": "missing or invalid authentication header",
                "errorCode": ErrorCode::InvalidCredentials.value(),
            });
            (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
        }
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, PlacementError> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            let violation = FieldViolation::new("body", rejection.body_text());
            Err(PlacementError::InvalidInput(vec![violation]))
        }
    }
}

fn result<T: serde::Serialize>(status: StatusCode, value: T) -> Response {
    (status, Json(json!({ "result": value }))).into_response()
}

pub(crate) async fn create_student_handler<S, C>(
    State(service): Shared<S, C>,
    payload: Result<Json<NewStudent>, JsonRejection>,
) -> Result<Response, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    let student = service.records().create_student(body(payload)?)?;
    Ok(result(StatusCode::CREATED, student))
}

pub(crate) async fn update_student_handler<S, C>(
    State(service): Shared<S, C>,
    payload: Result<Json<StudentPatch>, JsonRejection>,
) -> Result<Response, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    let student = service.records().update_student(body(payload)?)?;
    Ok(result(StatusCode::OK, student))
}

pub(crate) async fn list_students_handler<S, C>(
    State(service): Shared<S, C>,
    Query(query): Query<ListQuery>,
) -> Result<Response, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    let page = service
        .records()
        .list_students(Offset::parse(query.offset.as_deref()))?;
    Ok((StatusCode::OK, Json(page)).into_response())
}

pub(crate) async fn get_student_handler<S, C>(
    State(service): Shared<S, C>,
    Path(id): Path<String>,
) -> Result<Response, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    let student = service.records().get_student(&id)?;
    Ok(result(StatusCode::OK, student))
}

pub(crate) async fn delete_student_handler<S, C>(
    State(service): Shared<S, C>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<StatusCode, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    service.records().delete_student(body(payload)?.id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn create_company_handler<S, C>(
    State(service): Shared<S, C>,
    payload: Result<Json<NewCompany>, JsonRejection>,
) -> Result<Response, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    let company = service.records().create_company(body(payload)?)?;
    Ok(result(StatusCode::CREATED, company))
}

pub(crate) async fn update_company_handler<S, C>(
    State(service): Shared<S, C>,
    payload: Result<Json<CompanyPatch>, JsonRejection>,
) -> Result<Response, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    let company = service.records().update_company(body(payload)?)?;
    Ok(result(StatusCode::OK, company))
}

pub(crate) async fn list_companies_handler<S, C>(
    State(service): Shared<S, C>,
    Query(query): Query<ListQuery>,
) -> Result<Response, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    let page = service
        .records()
        .list_companies(Offset::parse(query.offset.as_deref()))?;
    Ok((StatusCode::OK, Json(page)).into_response())
}

pub(crate) async fn get_company_handler<S, C>(
    State(service): Shared<S, C>,
    Path(id): Path<String>,
) -> Result<Response, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    let company = service.records().get_company(&id)?;
    Ok(result(StatusCode::OK, company))
}

pub(crate) async fn delete_company_handler<S, C>(
    State(service): Shared<S, C>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<StatusCode, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    service.records().delete_company(body(payload)?.id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn register_handler<S, C>(
    State(service): Shared<S, C>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<StatusCode, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    service.coordinator().register(body(payload)?)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn unregister_handler<S, C>(
    State(service): Shared<S, C>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<StatusCode, PlacementError>
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    service.coordinator().unregister(body(payload)?)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn cleanup_handler<S, C>(State(service): Shared<S, C>) -> Response
where
    S: EntityStore<Student> + 'static,
    C: EntityStore<Company> + 'static,
{
    (StatusCode::OK, Json(service.cleanup_snapshot())).into_response()
}
