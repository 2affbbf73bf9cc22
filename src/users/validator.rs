use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::FieldError;
use crate::users::dto::{CreateUserRequest, UpdateUserInfoRequest};
use crate::users::store::{StoreError, UserStore};

pub const MIN_PASSWORD_LEN: usize = 6;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    // DD.MM.YYYY with real day/month ranges; the value stays a string.
    static ref DOB_RE: Regex =
        Regex::new(r"^(0[1-9]|[12][0-9]|3[01])\.(0[1-9]|1[0-2])\.\d{4}$").unwrap();
    // 89 followed by 9 digits, 11 digits total.
    static ref PHONE_RE: Regex = Regex::new(r"^89\d{9}$").unwrap();
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Canonical form for stored and looked-up emails. Registration, lookup and
/// login all go through this, so a mixed-case identifier always matches the
/// stored row.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_RE.is_match(phone)
}

pub fn is_valid_date_of_birth(date_of_birth: &str) -> bool {
    DOB_RE.is_match(date_of_birth)
}

fn check_name(field: &'static str, value: &str, errors: &mut Vec<FieldError>) {
    let len = value.chars().count();
    if !(2..=50).contains(&len) {
        errors.push(FieldError::new(field, "must be 2 to 50 characters"));
    }
}

fn check_date_of_birth(value: &str, errors: &mut Vec<FieldError>) {
    if !is_valid_date_of_birth(value) {
        errors.push(FieldError::new("date_of_birth", "must match DD.MM.YYYY"));
    }
}

fn check_phone(value: &str, errors: &mut Vec<FieldError>) {
    if !is_valid_phone(value) {
        errors.push(FieldError::new(
            "phone_number",
            "must be 89 followed by 9 digits",
        ));
    }
}

/// Syntactic checks for registration; uniqueness and password strength are
/// the service's concern.
pub fn validate_registration(req: &CreateUserRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_name("first_name", &req.first_name, &mut errors);
    check_name("last_name", &req.last_name, &mut errors);
    check_date_of_birth(&req.date_of_birth, &mut errors);
    if !is_valid_email(&req.email) {
        errors.push(FieldError::new("email", "must be a valid email address"));
    }
    check_phone(&req.phone_number, &mut errors);
    errors
}

/// Syntactic checks for the profile update; the phone is only checked when
/// supplied.
pub fn validate_user_info(req: &UpdateUserInfoRequest) -> Vec<FieldError> {
    let mut errors = Vec::new();
    check_name("first_name", &req.first_name, &mut errors);
    check_name("last_name", &req.last_name, &mut errors);
    check_date_of_birth(&req.date_of_birth, &mut errors);
    if let Some(phone) = &req.phone_number {
        check_phone(phone, &mut errors);
    }
    errors
}

/// Pre-write existence check over the store. The unique indexes remain the
/// correctness mechanism; this is the fast path that names the offending
/// fields before the insert is attempted.
#[derive(Clone)]
pub struct UniquenessValidator {
    store: Arc<dyn UserStore>,
}

impl UniquenessValidator {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub async fn is_email_taken(&self, email: &str) -> Result<bool, StoreError> {
        self.store.email_exists(email).await
    }

    pub async fn is_phone_taken(&self, phone: &str) -> Result<bool, StoreError> {
        self.store.phone_exists(phone).await
    }

    /// All conflicts for a prospective registration, email checked first.
    pub async fn conflicts(
        &self,
        email: &str,
        phone: &str,
    ) -> Result<Vec<FieldError>, StoreError> {
        let mut conflicts = Vec::new();
        if self.is_email_taken(email).await? {
            conflicts.push(FieldError::new("email", "email already in use"));
        }
        if self.is_phone_taken(phone).await? {
            conflicts.push(FieldError::new("phone_number", "phone_number already in use"));
        }
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::model::UserRole;
    use crate::users::store::{InMemoryStore, NewUser};
    use time::OffsetDateTime;

    #[test]
    fn email_pattern() {
        assert!(is_valid_email("tom@example.com"));
        assert!(!is_valid_email("tom@example"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("two words@example.com"));
    }

    #[test]
    fn phone_pattern() {
        assert!(is_valid_phone("89111111111"));
        assert!(!is_valid_phone("8911111111")); // 10 digits
        assert!(!is_valid_phone("891111111112")); // 12 digits
        assert!(!is_valid_phone("79111111111")); // wrong prefix
        assert!(!is_valid_phone("89abc111111"));
    }

    #[test]
    fn date_of_birth_pattern() {
        assert!(is_valid_date_of_birth("01.01.1990"));
        assert!(is_valid_date_of_birth("31.12.2000"));
        assert!(!is_valid_date_of_birth("1990-01-01"));
        assert!(!is_valid_date_of_birth("32.01.1990"));
        assert!(!is_valid_date_of_birth("01.13.1990"));
    }

    #[test]
    fn registration_collects_every_invalid_field() {
        let req = CreateUserRequest {
            first_name: "T".into(),
            last_name: "".into(),
            date_of_birth: "1990".into(),
            email: "nope".into(),
            phone_number: "123".into(),
            password: "abcdef".into(),
        };
        let errors = validate_registration(&req);
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            ["first_name", "last_name", "date_of_birth", "email", "phone_number"]
        );
    }

    #[test]
    fn valid_registration_passes() {
        let req = CreateUserRequest {
            first_name: "Tom".into(),
            last_name: "Shelby".into(),
            date_of_birth: "01.01.1990".into(),
            email: "tom@example.com".into(),
            phone_number: "89111111111".into(),
            password: "abcdef".into(),
        };
        assert!(validate_registration(&req).is_empty());
    }

    #[tokio::test]
    async fn conflicts_lists_email_before_phone() {
        let store = Arc::new(InMemoryStore::default());
        store
            .create(NewUser {
                first_name: "Tom".into(),
                last_name: "Shelby".into(),
                date_of_birth: "01.01.1990".into(),
                email: "taken@x.com".into(),
                phone_number: "89111111111".into(),
                password_hash: "$argon2id$stub".into(),
                registration_date: OffsetDateTime::now_utc(),
                role: UserRole::User,
                active: true,
            })
            .await
            .unwrap();

        let validator = UniquenessValidator::new(store);
        let conflicts = validator
            .conflicts("taken@x.com", "89111111111")
            .await
            .unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].field, "email");
        assert_eq!(conflicts[1].field, "phone_number");

        let only_phone = validator
            .conflicts("free@x.com", "89111111111")
            .await
            .unwrap();
        assert_eq!(only_phone.len(), 1);
        assert_eq!(only_phone[0].field, "phone_number");
    }
}
