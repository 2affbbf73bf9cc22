use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::model::{User, UserRole};

/// Request body for registration.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub email: String,
    pub phone_number: String,
    pub password: String,
}

/// Request body for the profile update. Email, password, role, active and
/// subscription are not touched through this shape.
#[derive(Debug, Deserialize)]
pub struct UpdateUserInfoRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

/// Request body for the password change.
#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub password: String,
    pub password_new: String,
}

/// Request body for login; the identifier is a phone number or an email.
#[derive(Debug, Deserialize)]
pub struct AuthenticateRequest {
    pub identifier: String,
    pub password: String,
}

/// Query string for the role and active toggles.
#[derive(Debug, Deserialize)]
pub struct FlagQuery {
    pub param: bool,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionQuery {
    pub date_time: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct PhoneQuery {
    pub phone: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub phone_number: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub registration_date: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub subscription_end_date: Option<OffsetDateTime>,
    pub role: UserRole,
    pub active: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            date_of_birth: user.date_of_birth,
            phone_number: user.phone_number,
            email: user.email,
            registration_date: user.registration_date,
            subscription_end_date: user.subscription_end_date,
            role: user.role,
            active: user.active,
        }
    }
}
