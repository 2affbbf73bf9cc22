use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{delete, get, post, put},
    Json, Router,
};
use time::{macros::format_description, OffsetDateTime, PrimitiveDateTime};
use tracing::instrument;

use crate::errors::ApiError;
use crate::state::AppState;
use crate::users::dto::{
    AuthenticateRequest, CreateUserRequest, EmailQuery, FlagQuery, PhoneQuery,
    SubscriptionQuery, UpdatePasswordRequest, UpdateUserInfoRequest, UserResponse,
};
use crate::users::validator;

const SUBSCRIPTION_FORMAT: &str = "YYYY-MM-DDTHH:MM:SS";

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/add", post(add_user))
        .route("/users/all", get(get_all_users))
        .route("/users/authenticate", post(authenticate))
        .route("/users/by-email", get(get_user_by_email))
        .route("/users/by-phone-number", get(get_user_by_phone))
        .route("/users/update-user-info/:id", put(update_user_info))
        .route("/users/password/:id", put(update_password))
        .route("/users/subscription/:id", put(update_subscription))
        .route("/users/role/:id", put(update_role))
        .route("/users/active/:id", put(update_active))
        .route("/users/delete/:id", delete(delete_user))
        .route("/users/:id", get(get_user_by_id))
}

#[instrument(skip(state, payload))]
async fn add_user(
    State(state): State<AppState>,
    Json(mut payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, HeaderMap, Json<UserResponse>), ApiError> {
    payload.email = validator::normalize_email(&payload.email);

    let errors = validator::validate_registration(&payload);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let user = state.users.create(payload).await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = format!("/api/v1/users/{}", user.id).parse() {
        headers.insert(header::LOCATION, location);
    }
    Ok((StatusCode::CREATED, headers, Json(user.into())))
}

#[instrument(skip(state))]
async fn get_user_by_id(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.get_by_id(id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
async fn get_user_by_email(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.get_by_email(&query.email).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
async fn get_user_by_phone(
    State(state): State<AppState>,
    Query(query): Query<PhoneQuery>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.get_by_phone(&query.phone).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
async fn update_user_info(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserInfoRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let errors = validator::validate_user_info(&payload);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    let user = state.users.update_info(id, payload).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
async fn update_password(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .users
        .update_password(id, &payload.password, &payload.password_new)
        .await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
async fn update_subscription(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<Json<UserResponse>, ApiError> {
    let end = parse_subscription_date(&query.date_time)?;
    let user = state.users.update_subscription(id, end).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
async fn update_role(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<FlagQuery>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.update_role(id, query.param).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
async fn update_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<FlagQuery>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.users.update_active(id, query.param).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<String, ApiError> {
    state.users.delete(id).await?;
    Ok(format!("User with id {id} deleted."))
}

#[instrument(skip(state))]
async fn get_all_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = state.users.list_all().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[instrument(skip(state, payload))]
async fn authenticate(
    State(state): State<AppState>,
    Json(payload): Json<AuthenticateRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .users
        .authenticate(&payload.identifier, &payload.password)
        .await?;
    Ok(Json(user.into()))
}

fn parse_subscription_date(raw: &str) -> Result<OffsetDateTime, ApiError> {
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let parsed = PrimitiveDateTime::parse(raw, &format)
        .map_err(|_| ApiError::InvalidDate(SUBSCRIPTION_FORMAT))?;
    Ok(parsed.assume_utc())
}
