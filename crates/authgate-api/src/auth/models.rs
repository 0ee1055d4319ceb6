//! Request and response models for the authentication endpoints
//!
//! Request bodies deserialize every field as optional so that a missing field
//! is reported by validation alongside every other violation, instead of
//! failing JSON extraction on the first one.

use authgate_core::{Role, User};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use validator::{Validate, ValidationError, ValidationErrors};

/// Registration request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(required, length(min = 2, max = 255))]
    #[schema(example = "Ann")]
    pub name: Option<String>,

    #[validate(required, email, length(max = 255))]
    #[schema(example = "ann@x.com")]
    pub email: Option<String>,

    /// `user` (default) or `admin`
    #[schema(example = "user")]
    pub role: Option<String>,

    #[validate(required, length(min = 8, max = 128))]
    #[schema(example = "password1")]
    pub password: Option<String>,
}

/// Registration input after normalization and validation
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub role: Role,
    pub password: String,
}

impl RegisterRequest {
    /// Trim the name, trim and lower-case the email.
    ///
    /// Fields that are blank after trimming count as missing.
    pub fn normalized(self) -> Self {
        Self {
            name: non_blank(self.name.map(|n| n.trim().to_string())),
            email: non_blank(self.email.map(|e| e.trim().to_lowercase())),
            role: self.role,
            password: non_blank(self.password),
        }
    }

    /// Normalize, validate, and convert into a [`Registration`].
    ///
    /// On failure every violated field is reported, in field order.
    pub fn into_registration(self) -> Result<Registration, Vec<String>> {
        let request = self.normalized();
        let mut violations = match request.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => describe_errors(
                &errors,
                &[
                    ("name", request.name.as_deref()),
                    ("email", request.email.as_deref()),
                    ("password", request.password.as_deref()),
                ],
            ),
        };

        let role = match request.role.as_deref() {
            None => Some(Role::default()),
            Some(raw) => match raw.parse::<Role>() {
                Ok(role) => Some(role),
                Err(_) => {
                    // Keep field order: name, email, role, password
                    let at = violations
                        .iter()
                        .position(|v| v.starts_with("password "))
                        .unwrap_or(violations.len());
                    violations.insert(at, "role must be one of: user, admin".to_string());
                    None
                }
            },
        };

        match (request.name, request.email, role, request.password) {
            (Some(name), Some(email), Some(role), Some(password)) if violations.is_empty() => {
                Ok(Registration {
                    name,
                    email,
                    role,
                    password,
                })
            }
            _ => Err(violations),
        }
    }
}

/// Login request
#[derive(Debug, Clone, Default, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(required, email, length(max = 255))]
    #[schema(example = "ann@x.com")]
    pub email: Option<String>,

    #[validate(required, length(min = 8, max = 128))]
    #[schema(example = "password1")]
    pub password: Option<String>,
}

/// Login input after normalization and validation
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn into_credentials(self) -> Result<Credentials, Vec<String>> {
        let request = Self {
            email: non_blank(self.email.map(|e| e.trim().to_lowercase())),
            password: non_blank(self.password),
        };

        if let Err(errors) = request.validate() {
            return Err(describe_errors(
                &errors,
                &[
                    ("email", request.email.as_deref()),
                    ("password", request.password.as_deref()),
                ],
            ));
        }

        match (request.email, request.password) {
            (Some(email), Some(password)) => Ok(Credentials { email, password }),
            _ => Err(vec!["email and password are required".to_string()]),
        }
    }
}

/// Optional body of `POST /refresh-token` when the cookie is unavailable
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: Option<String>,
}

/// Query of `GET /verify-email`
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerifyEmailQuery {
    /// Email verification token from the emailed link
    pub token: Option<String>,
}

/// Public user projection (never carries the password hash)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    #[schema(value_type = i64, example = 1)]
    pub id: i64,
    pub name: String,
    pub email: String,
    #[schema(value_type = String, example = "user")]
    pub role: Role,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.0,
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            email_verified: user.email_verified,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// `data` of a successful registration
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserPayload {
    pub user: UserView,
}

/// `data` of a session grant (verify-email, login)
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub user: UserView,
    pub access_token: String,
}

/// `data` of a token refresh
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenPayload {
    pub access_token: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Render validator errors as `"<field> ..."` messages, one per field,
/// in the order given by `fields`.
fn describe_errors(errors: &ValidationErrors, fields: &[(&str, Option<&str>)]) -> Vec<String> {
    let by_field = errors.field_errors();
    fields
        .iter()
        .filter_map(|(field, value)| {
            by_field
                .get(field)
                .and_then(|errs| errs.first())
                .map(|err| describe(field, *value, err))
        })
        .collect()
}

fn describe(field: &str, value: Option<&str>, error: &ValidationError) -> String {
    let param = |name: &str| error.params.get(name).and_then(Value::as_u64);

    match error.code.as_ref() {
        "required" => format!("{field} is required"),
        "email" => format!("{field} must be a valid email"),
        "length" => {
            let len = value.map(|v| v.chars().count() as u64);
            match (len, param("min"), param("max")) {
                (Some(len), Some(min), _) if len < min => {
                    format!("{field} must be at least {min} characters")
                }
                (_, _, Some(max)) => format!("{field} must be at most {max} characters"),
                (_, Some(min), None) => format!("{field} must be at least {min} characters"),
                _ => format!("{field} has an invalid length"),
            }
        }
        _ => error
            .message
            .as_ref()
            .map(|m| format!("{field} {m}"))
            .unwrap_or_else(|| format!("{field} is invalid")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, email: &str, role: Option<&str>, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: Some(name.to_string()),
            email: Some(email.to_string()),
            role: role.map(str::to_string),
            password: Some(password.to_string()),
        }
    }

    #[test]
    fn test_valid_registration_is_normalized() {
        let registration = request("  Ann ", "  Ann@X.com ", None, "password1")
            .into_registration()
            .unwrap();

        assert_eq!(registration.name, "Ann");
        assert_eq!(registration.email, "ann@x.com");
        assert_eq!(registration.role, Role::User);
        assert_eq!(registration.password, "password1");
    }

    #[test]
    fn test_admin_role_accepted() {
        let registration = request("Ann", "ann@x.com", Some("admin"), "password1")
            .into_registration()
            .unwrap();
        assert_eq!(registration.role, Role::Admin);
    }

    #[test]
    fn test_every_violation_reported_in_field_order() {
        let violations = request("A", "not-an-email", Some("root"), "short")
            .into_registration()
            .unwrap_err();

        assert_eq!(
            violations,
            vec![
                "name must be at least 2 characters",
                "email must be a valid email",
                "role must be one of: user, admin",
                "password must be at least 8 characters",
            ]
        );
    }

    #[test]
    fn test_missing_fields_are_required() {
        let violations = RegisterRequest::default().into_registration().unwrap_err();
        assert_eq!(
            violations,
            vec!["name is required", "email is required", "password is required"]
        );
    }

    #[test]
    fn test_blank_name_counts_as_missing() {
        let violations = request("   ", "ann@x.com", None, "password1")
            .into_registration()
            .unwrap_err();
        assert_eq!(violations, vec!["name is required"]);
    }

    #[test]
    fn test_password_upper_bound() {
        let long = "p".repeat(129);
        let violations = request("Ann", "ann@x.com", None, &long)
            .into_registration()
            .unwrap_err();
        assert_eq!(violations, vec!["password must be at most 128 characters"]);
    }

    #[test]
    fn test_login_request_validation() {
        let credentials = LoginRequest {
            email: Some(" ANN@x.com".to_string()),
            password: Some("password1".to_string()),
        }
        .into_credentials()
        .unwrap();
        assert_eq!(credentials.email, "ann@x.com");

        let violations = LoginRequest::default().into_credentials().unwrap_err();
        assert_eq!(violations, vec!["email is required", "password is required"]);
    }

    #[test]
    fn test_login_keeps_registration_length_bounds() {
        let login = |email: String, password: &str| LoginRequest {
            email: Some(email),
            password: Some(password.to_string()),
        };

        let violations = login("ann@x.com".to_string(), "short")
            .into_credentials()
            .unwrap_err();
        assert_eq!(violations, vec!["password must be at least 8 characters"]);

        let violations = login("ann@x.com".to_string(), &"p".repeat(129))
            .into_credentials()
            .unwrap_err();
        assert_eq!(violations, vec!["password must be at most 128 characters"]);

        let label = "b".repeat(60);
        let long_email = format!("{}@{label}.{label}.{label}.{label}.com", "a".repeat(64));
        assert!(long_email.len() > 255);
        let violations = login(long_email, "password1")
            .into_credentials()
            .unwrap_err();
        assert_eq!(violations, vec!["email must be at most 255 characters"]);
    }

    #[test]
    fn test_user_view_hides_hash() {
        let now = Utc::now();
        let user = User {
            id: authgate_core::UserId(1),
            name: "Ann".to_string(),
            email: "ann@x.com".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            role: Role::User,
            email_verified: false,
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(UserView::from(&user)).unwrap();
        assert_eq!(json["emailVerified"], false);
        assert_eq!(json["role"], "user");
        assert!(!json.to_string().contains("argon2"));
    }
}
