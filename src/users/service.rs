use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::errors::{ApiError, FieldError};
use crate::mail::Mailer;
use crate::users::dto::{CreateUserRequest, UpdateUserInfoRequest};
use crate::users::model::{User, UserRole};
use crate::users::password::PasswordHasher;
use crate::users::store::{NewUser, UserStore};
use crate::users::validator::{normalize_email, UniquenessValidator, MIN_PASSWORD_LEN};

/// Account lifecycle operations. Owns the business invariants: field
/// uniqueness, password strength and opacity, and the default role/active
/// state. Collaborators come in through the constructor; nothing here knows
/// about HTTP.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    hasher: Arc<dyn PasswordHasher>,
    mailer: Arc<dyn Mailer>,
    uniqueness: UniquenessValidator,
}

fn looks_like_phone(identifier: &str) -> bool {
    identifier.starts_with("89") && identifier.chars().all(|c| c.is_ascii_digit())
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: Arc<dyn PasswordHasher>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let uniqueness = UniquenessValidator::new(store.clone());
        Self {
            store,
            hasher,
            mailer,
            uniqueness,
        }
    }

    pub async fn create(&self, mut req: CreateUserRequest) -> Result<User, ApiError> {
        req.email = normalize_email(&req.email);

        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::WeakPassword);
        }

        let conflicts = self
            .uniqueness
            .conflicts(&req.email, &req.phone_number)
            .await?;
        if !conflicts.is_empty() {
            warn!(email = %req.email, "registration conflicts with existing account");
            return Err(ApiError::Conflict(conflicts));
        }

        let password_hash = self.hasher.hash(&req.password)?;

        // A concurrent create that wins the race past the pre-check trips
        // the unique index instead; the store maps that to the same
        // Conflict kind.
        let user = self
            .store
            .create(NewUser {
                first_name: req.first_name,
                last_name: req.last_name,
                date_of_birth: req.date_of_birth,
                email: req.email,
                phone_number: req.phone_number,
                password_hash,
                registration_date: OffsetDateTime::now_utc(),
                role: UserRole::User,
                active: true,
            })
            .await?;

        if let Err(e) = self
            .mailer
            .send(&user.email, "Welcome", "Your account has been created.")
            .await
        {
            warn!(error = %e, user_id = user.id, "welcome email failed");
        }

        info!(user_id = user.id, email = %user.email, "user registered");
        Ok(user)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<User, ApiError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("user with id {id} not found")))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<User, ApiError> {
        let email = normalize_email(email);
        self.store
            .find_by_email(&email)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("user with email {email} not found")))
    }

    pub async fn get_by_phone(&self, phone: &str) -> Result<User, ApiError> {
        self.store
            .find_by_phone(phone)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("user with phone {phone} not found")))
    }

    /// Overwrites name, date of birth and (when supplied) phone; everything
    /// else on the row stays untouched.
    pub async fn update_info(
        &self,
        id: i64,
        req: UpdateUserInfoRequest,
    ) -> Result<User, ApiError> {
        let mut user = self.get_by_id(id).await?;
        user.first_name = req.first_name;
        user.last_name = req.last_name;
        user.date_of_birth = req.date_of_birth;
        if let Some(phone) = req.phone_number {
            if phone != user.phone_number && self.uniqueness.is_phone_taken(&phone).await? {
                return Err(ApiError::Conflict(vec![FieldError::new(
                    "phone_number",
                    "phone_number already in use",
                )]));
            }
            user.phone_number = phone;
        }
        Ok(self.store.update(&user).await?)
    }

    pub async fn update_password(
        &self,
        id: i64,
        old_password: &str,
        new_password: &str,
    ) -> Result<User, ApiError> {
        // An unknown id must be indistinguishable from a wrong password.
        let mut user = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(ApiError::Unauthorized)?;
        if !self.hasher.verify(old_password, &user.password_hash)? {
            warn!(user_id = id, "password change with wrong old password");
            return Err(ApiError::Unauthorized);
        }
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ApiError::WeakPassword);
        }
        user.password_hash = self.hasher.hash(new_password)?;
        info!(user_id = id, "password changed");
        Ok(self.store.update(&user).await?)
    }

    /// Unconditional overwrite; past dates are accepted.
    pub async fn update_subscription(
        &self,
        id: i64,
        end: OffsetDateTime,
    ) -> Result<User, ApiError> {
        let mut user = self.get_by_id(id).await?;
        user.subscription_end_date = Some(end);
        Ok(self.store.update(&user).await?)
    }

    pub async fn update_role(&self, id: i64, admin: bool) -> Result<User, ApiError> {
        let mut user = self.get_by_id(id).await?;
        user.role = if admin { UserRole::Admin } else { UserRole::User };
        Ok(self.store.update(&user).await?)
    }

    pub async fn update_active(&self, id: i64, active: bool) -> Result<User, ApiError> {
        let mut user = self.get_by_id(id).await?;
        user.active = active;
        Ok(self.store.update(&user).await?)
    }

    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        if self.store.delete(id).await? {
            info!(user_id = id, "user deleted");
            Ok(())
        } else {
            Err(ApiError::NotFound(format!("user with id {id} not found")))
        }
    }

    /// An empty list is a successful result, not an error.
    pub async fn list_all(&self) -> Result<Vec<User>, ApiError> {
        Ok(self.store.list_all().await?)
    }

    /// Looks up by phone or email depending on the identifier form. Lookup
    /// failure and password mismatch return the same error kind so the
    /// endpoint cannot be used to enumerate accounts.
    pub async fn authenticate(&self, identifier: &str, password: &str) -> Result<User, ApiError> {
        let found = if looks_like_phone(identifier) {
            self.store.find_by_phone(identifier).await?
        } else {
            self.store.find_by_email(&normalize_email(identifier)).await?
        };
        let user = found.ok_or(ApiError::Unauthorized)?;
        if self.hasher.verify(password, &user.password_hash)? {
            Ok(user)
        } else {
            warn!(user_id = user.id, "authentication with wrong password");
            Err(ApiError::Unauthorized)
        }
    }
}
