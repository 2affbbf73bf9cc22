use std::sync::Mutex;

use axum::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;

use crate::errors::{ApiError, FieldError};
use crate::users::model::{User, UserRole};

/// The two columns guarded by unique indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Email,
    Phone,
}

impl UniqueField {
    pub fn column(&self) -> &'static str {
        match self {
            UniqueField::Email => "email",
            UniqueField::Phone => "phone_number",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {}", .0.column())]
    Duplicate(UniqueField),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            // A unique-index violation the pre-check missed (lost race)
            // surfaces as the same conflict kind as the pre-check itself.
            StoreError::Duplicate(field) => ApiError::Conflict(vec![FieldError::new(
                field.column(),
                format!("{} already in use", field.column()),
            )]),
            StoreError::Database(e) => ApiError::Internal(anyhow::Error::new(e)),
        }
    }
}

/// Column values for an insert; the id comes back from the store.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: String,
    pub email: String,
    pub phone_number: String,
    pub password_hash: String,
    pub registration_date: OffsetDateTime,
    pub role: UserRole,
    pub active: bool,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new: NewUser) -> Result<User, StoreError>;
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError>;
    async fn update(&self, user: &User) -> Result<User, StoreError>;
    async fn delete(&self, id: i64) -> Result<bool, StoreError>;
    async fn list_all(&self) -> Result<Vec<User>, StoreError>;
    async fn email_exists(&self, email: &str) -> Result<bool, StoreError>;
    async fn phone_exists(&self, phone: &str) -> Result<bool, StoreError>;
}

fn map_unique_violation(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return match db_err.constraint() {
                Some("users_phone_number_key") => StoreError::Duplicate(UniqueField::Phone),
                _ => StoreError::Duplicate(UniqueField::Email),
            };
        }
    }
    StoreError::Database(err)
}

/// Postgres-backed store; the unique indexes are the final authority on
/// email and phone ownership.
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (first_name, last_name, date_of_birth, email, phone_number,
                               password_hash, registration_date, role, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, first_name, last_name, date_of_birth, email, phone_number,
                      password_hash, registration_date, subscription_end_date, role, active
            "#,
        )
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.date_of_birth)
        .bind(&new.email)
        .bind(&new.phone_number)
        .bind(&new.password_hash)
        .bind(new.registration_date)
        .bind(new.role)
        .bind(new.active)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, first_name, last_name, date_of_birth, email, phone_number,
                   password_hash, registration_date, subscription_end_date, role, active
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, first_name, last_name, date_of_birth, email, phone_number,
                   password_hash, registration_date, subscription_end_date, role, active
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, first_name, last_name, date_of_birth, email, phone_number,
                   password_hash, registration_date, subscription_end_date, role, active
            FROM users
            WHERE phone_number = $1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn update(&self, user: &User) -> Result<User, StoreError> {
        let updated = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET first_name = $2, last_name = $3, date_of_birth = $4, email = $5,
                phone_number = $6, password_hash = $7, subscription_end_date = $8,
                role = $9, active = $10
            WHERE id = $1
            RETURNING id, first_name, last_name, date_of_birth, email, phone_number,
                      password_hash, registration_date, subscription_end_date, role, active
            "#,
        )
        .bind(user.id)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.date_of_birth)
        .bind(&user.email)
        .bind(&user.phone_number)
        .bind(&user.password_hash)
        .bind(user.subscription_end_date)
        .bind(user.role)
        .bind(user.active)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(updated)
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, first_name, last_name, date_of_birth, email, phone_number,
                   password_hash, registration_date, subscription_end_date, role, active
            FROM users
            ORDER BY id
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                .bind(email)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }

    async fn phone_exists(&self, phone: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE phone_number = $1)")
                .bind(phone)
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }
}

/// Store used by tests and `AppState::fake`; mirrors the Postgres id
/// assignment and duplicate semantics so the race-mapping path behaves
/// the same way.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    next_id: i64,
    rows: Vec<User>,
}

impl InMemoryInner {
    fn duplicate_of(&self, email: &str, phone: &str, excluding: i64) -> Option<UniqueField> {
        // Email first, matching the index the insert would trip first.
        if self.rows.iter().any(|u| u.id != excluding && u.email == email) {
            return Some(UniqueField::Email);
        }
        if self
            .rows
            .iter()
            .any(|u| u.id != excluding && u.phone_number == phone)
        {
            return Some(UniqueField::Phone);
        }
        None
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().expect("users lock poisoned");
        if let Some(field) = inner.duplicate_of(&new.email, &new.phone_number, 0) {
            return Err(StoreError::Duplicate(field));
        }
        inner.next_id += 1;
        let user = User {
            id: inner.next_id,
            first_name: new.first_name,
            last_name: new.last_name,
            date_of_birth: new.date_of_birth,
            email: new.email,
            phone_number: new.phone_number,
            password_hash: new.password_hash,
            registration_date: new.registration_date,
            subscription_end_date: None,
            role: new.role,
            active: new.active,
        };
        inner.rows.push(user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock().expect("users lock poisoned");
        Ok(inner.rows.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock().expect("users lock poisoned");
        Ok(inner.rows.iter().find(|u| u.email == email).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.lock().expect("users lock poisoned");
        Ok(inner.rows.iter().find(|u| u.phone_number == phone).cloned())
    }

    async fn update(&self, user: &User) -> Result<User, StoreError> {
        let mut inner = self.inner.lock().expect("users lock poisoned");
        if let Some(field) = inner.duplicate_of(&user.email, &user.phone_number, user.id) {
            return Err(StoreError::Duplicate(field));
        }
        let row = inner
            .rows
            .iter_mut()
            .find(|u| u.id == user.id)
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
        *row = user.clone();
        Ok(row.clone())
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().expect("users lock poisoned");
        let before = inner.rows.len();
        inner.rows.retain(|u| u.id != id);
        Ok(inner.rows.len() < before)
    }

    async fn list_all(&self) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.lock().expect("users lock poisoned");
        Ok(inner.rows.clone())
    }

    async fn email_exists(&self, email: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().expect("users lock poisoned");
        Ok(inner.rows.iter().any(|u| u.email == email))
    }

    async fn phone_exists(&self, phone: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().expect("users lock poisoned");
        Ok(inner.rows.iter().any(|u| u.phone_number == phone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn new_user(email: &str, phone: &str) -> NewUser {
        NewUser {
            first_name: "Tom".into(),
            last_name: "Shelby".into(),
            date_of_birth: "01.01.1990".into(),
            email: email.into(),
            phone_number: phone.into(),
            password_hash: "$argon2id$stub".into(),
            registration_date: OffsetDateTime::now_utc(),
            role: UserRole::User,
            active: true,
        }
    }

    #[tokio::test]
    async fn in_memory_assigns_sequential_ids() {
        let store = InMemoryStore::default();
        let first = store.create(new_user("a@x.com", "89111111111")).await.unwrap();
        let second = store.create(new_user("b@x.com", "89222222222")).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn in_memory_rejects_duplicate_email() {
        let store = InMemoryStore::default();
        store.create(new_user("a@x.com", "89111111111")).await.unwrap();
        let err = store
            .create(new_user("a@x.com", "89222222222"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(UniqueField::Email)));
        // The failed insert must not leave a row behind.
        assert_eq!(store.list_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn in_memory_rejects_duplicate_phone_on_update() {
        let store = InMemoryStore::default();
        store.create(new_user("a@x.com", "89111111111")).await.unwrap();
        let mut second = store.create(new_user("b@x.com", "89222222222")).await.unwrap();
        second.phone_number = "89111111111".into();
        let err = store.update(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(UniqueField::Phone)));
    }

    #[tokio::test]
    async fn duplicate_maps_to_conflict() {
        let api: ApiError = StoreError::Duplicate(UniqueField::Phone).into();
        match api {
            ApiError::Conflict(fields) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "phone_number");
                assert_eq!(fields[0].message, "phone_number already in use");
            }
            other => panic!("expected Conflict, got {other:?}"),
        }
    }
}
