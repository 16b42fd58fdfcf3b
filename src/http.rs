use crate::backend::SchedulingBackend;
use crate::configuration::Configuration;
use crate::engine::{EngineSettings, ReservationEngine};
use crate::error::SchedulingError;
use crate::ledger::Appointment;
use crate::principal::Principal;
use crate::types::{AppointmentId, NewUser, Role, SlotTime, User, UserId};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts, Path};
use axum::response::Response;
use axum::routing::delete;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum::{
    routing::{get, post},
    Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use validator::{Validate, ValidationErrors};

lazy_static! {
    static ref NAME_PATTERN: Regex =
        Regex::new(r"^\p{L}[\p{L} .'-]*$").expect("name pattern is a valid regex");
}

#[derive(Clone)]
pub struct AppState<B: SchedulingBackend> {
    engine: ReservationEngine<B>,
}

/// `Json` whose rejections render as [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// `Path` whose rejections render as [`ApiError`].
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
struct ApiPath<T>(T);

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct RegisterUserRequest {
    #[validate(length(min = 1, max = 100), regex(path = *NAME_PATTERN))]
    name: String,
    #[validate(email)]
    email: String,
    role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct AddAvailabilityRequest {
    #[validate(length(min = 1, message = "At least one slot is required"))]
    available_slots: Vec<SlotTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AvailabilityResponse {
    available_slots: Vec<SlotTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BookingRequest {
    professor_id: UserId,
    slot: SlotTime,
}

pub fn create_app<B: SchedulingBackend, C: Configuration>(backend: B, configuration: C) -> Router {
    let settings = EngineSettings {
        store_timeout: configuration.store_timeout(),
        validate_students: configuration.validate_students(),
    };
    let state = AppState {
        engine: ReservationEngine::new(backend, settings),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(get_root))
        .route("/users", post(register_user::<B>))
        .route(
            "/professors/:professor_id/availability",
            get(get_availability::<B>).post(add_availability::<B>),
        )
        .route(
            "/professors/:professor_id/appointments",
            get(get_appointments::<B>),
        )
        .route("/appointments/book", post(book_appointment::<B>))
        .route(
            "/appointments/:appointment_id",
            delete(cancel_appointment::<B>),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Error returned by the handlers, rendered as `{"error": {"code", "message"}}`.
#[derive(Debug)]
pub enum ApiError {
    Scheduling(SchedulingError),
    Validation(String),
    WrongRole(Role),
    NotOwner,
}

impl From<SchedulingError> for ApiError {
    fn from(err: SchedulingError) -> Self {
        ApiError::Scheduling(err)
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(err: ValidationErrors) -> Self {
        ApiError::Validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Scheduling(err) => match err {
                SchedulingError::InvalidParty(reason) => {
                    (StatusCode::BAD_REQUEST, "INVALID_PARTY", reason)
                }
                SchedulingError::SlotUnavailable(reason) => {
                    (StatusCode::CONFLICT, "SLOT_UNAVAILABLE", reason)
                }
                SchedulingError::NotFound(reason) => (StatusCode::NOT_FOUND, "NOT_FOUND", reason),
                SchedulingError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason),
                SchedulingError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason),
                SchedulingError::TransientStoreFailure(reason) => {
                    error!(%reason, "Store unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "TRANSIENT_STORE_FAILURE",
                        "Storage temporarily unavailable, please retry".to_string(),
                    )
                }
            },
            ApiError::Validation(reason) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason),
            ApiError::WrongRole(role) => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                format!("Access denied, {role} role required"),
            ),
            ApiError::NotOwner => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Access denied, not your resource".to_string(),
            ),
        };

        (
            status,
            Json(json!({ "error": { "code": code, "message": message } })),
        )
            .into_response()
    }
}

fn require_role(principal: &Principal, role: Role) -> Result<(), ApiError> {
    if principal.role != role {
        warn!(user_id = %principal.id, %role, "Insufficient permissions");
        return Err(ApiError::WrongRole(role));
    }
    Ok(())
}

async fn get_root() -> impl IntoResponse {
    Json(json!({ "message": "Professor Appointment System API" }))
}

async fn register_user<B: SchedulingBackend>(
    State(state): State<AppState<B>>,
    ApiJson(request): ApiJson<RegisterUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    request.validate()?;
    let user = state
        .engine
        .register_user(NewUser {
            name: request.name,
            email: request.email,
            role: request.role,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn add_availability<B: SchedulingBackend>(
    State(state): State<AppState<B>>,
    principal: Principal,
    ApiPath(professor_id): ApiPath<UserId>,
    ApiJson(request): ApiJson<AddAvailabilityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&principal, Role::Professor)?;
    if principal.id != professor_id {
        return Err(ApiError::NotOwner);
    }
    request.validate()?;

    state
        .engine
        .add_availability(professor_id, &request.available_slots)
        .await?;
    Ok(Json(
        json!({ "message": "Availability updated successfully" }),
    ))
}

async fn get_availability<B: SchedulingBackend>(
    State(state): State<AppState<B>>,
    _principal: Principal,
    ApiPath(professor_id): ApiPath<UserId>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let available_slots = state.engine.query_availability(professor_id).await?;
    Ok(Json(AvailabilityResponse { available_slots }))
}

async fn get_appointments<B: SchedulingBackend>(
    State(state): State<AppState<B>>,
    principal: Principal,
    ApiPath(professor_id): ApiPath<UserId>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    require_role(&principal, Role::Professor)?;
    let appointments = state
        .engine
        .list_appointments(principal.id, professor_id)
        .await?;
    Ok(Json(appointments))
}

async fn book_appointment<B: SchedulingBackend>(
    State(state): State<AppState<B>>,
    principal: Principal,
    ApiJson(booking): ApiJson<BookingRequest>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    require_role(&principal, Role::Student)?;
    let appointment = state
        .engine
        .book(principal.id, booking.professor_id, booking.slot)
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn cancel_appointment<B: SchedulingBackend>(
    State(state): State<AppState<B>>,
    principal: Principal,
    ApiPath(appointment_id): ApiPath<AppointmentId>,
) -> Result<impl IntoResponse, ApiError> {
    require_role(&principal, Role::Professor)?;
    state.engine.cancel(principal.id, appointment_id).await?;
    Ok(Json(
        json!({ "message": "Appointment cancelled successfully" }),
    ))
}
