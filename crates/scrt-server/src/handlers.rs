use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    auth::UserId,
    error::ApiError,
    notify::{self, Receipt},
    store::{
        model::{generate_alias, is_valid_alias},
        settings, NewSecret, RevealedSecret, SecretType, Stats, UserSettings,
    },
    AppState,
};

/// Largest accepted message, in bytes.
pub const MESSAGE_MAX_LEN: usize = 1_048_576;
pub const NEOGRAM_TIMEOUT_DEFAULT: u32 = 3;
pub const NEOGRAM_TIMEOUT_MAX: u32 = 3600;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<AppState>) -> Response {
    match state.store {
        Some(_) => Json(json!({"status": "ok"})).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded"})),
        )
            .into_response(),
    }
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub alias: Option<String>,
    pub secret_type: SecretType,
    pub message: String,
    #[serde(default)]
    pub is_encrypted_with_user_password: bool,
    pub neogram_destruction_message: Option<String>,
    pub neogram_destruction_timeout: Option<u32>,
    pub receipt_email: Option<String>,
    pub receipt_phone_number: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub alias: String,
}

impl CreateRequest {
    /// Validate and normalize into the alias to store under and the secret itself.
    fn into_new_secret(self) -> Result<(String, NewSecret), ApiError> {
        let alias = match self.alias.as_deref().map(str::trim) {
            Some(alias) if !alias.is_empty() => {
                if !is_valid_alias(alias) {
                    return Err(ApiError::InvalidInput(
                        "alias must be 1-64 characters of A-Z, a-z, 0-9, '_' or '-'".into(),
                    ));
                }
                alias.to_owned()
            }
            _ => generate_alias(),
        };

        if self.message.is_empty() {
            return Err(ApiError::InvalidInput("message must not be empty".into()));
        }
        if self.message.len() > MESSAGE_MAX_LEN {
            return Err(ApiError::InvalidInput("message exceeds 1 MiB limit".into()));
        }

        let (neogram_destruction_message, neogram_destruction_timeout) =
            if self.secret_type == SecretType::Neogram {
                let timeout = self
                    .neogram_destruction_timeout
                    .unwrap_or(NEOGRAM_TIMEOUT_DEFAULT);
                if timeout == 0 || timeout > NEOGRAM_TIMEOUT_MAX {
                    return Err(ApiError::InvalidInput(format!(
                        "neogramDestructionTimeout must be between 1 and {NEOGRAM_TIMEOUT_MAX} seconds"
                    )));
                }
                let message = self
                    .neogram_destruction_message
                    .map(|m| m.trim().to_owned())
                    .filter(|m| !m.is_empty());
                if message
                    .as_ref()
                    .is_some_and(|m| m.chars().count() > settings::DESTRUCTION_MESSAGE_MAX_LEN)
                {
                    return Err(ApiError::InvalidInput(format!(
                        "neogramDestructionMessage must be at most {} characters",
                        settings::DESTRUCTION_MESSAGE_MAX_LEN
                    )));
                }
                (message, Some(timeout))
            } else {
                (None, None)
            };

        let receipt_email = non_empty(self.receipt_email)
            .map(|email| validate_email(&email).map(|()| email))
            .transpose()?;
        let receipt_phone_number = non_empty(self.receipt_phone_number)
            .map(|phone| normalize_phone(&phone))
            .transpose()?;

        Ok((
            alias,
            NewSecret {
                secret_type: self.secret_type,
                message: self.message,
                is_encrypted_with_user_password: self.is_encrypted_with_user_password,
                neogram_destruction_message,
                neogram_destruction_timeout,
                receipt_email,
                receipt_phone_number,
            },
        ))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = email.len() <= 254
        && !email.contains(char::is_whitespace)
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidInput("receiptEmail is not a valid email address".into()))
    }
}

/// Strip formatting and the leading `+`; keep 7-15 digits.
fn normalize_phone(phone: &str) -> Result<String, ApiError> {
    let digits: String = phone
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    if (7..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) {
        Ok(digits)
    } else {
        Err(ApiError::InvalidInput(
            "receiptPhoneNumber must be an international number of 7-15 digits".into(),
        ))
    }
}

pub async fn create_secret(
    State(state): State<AppState>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateResponse>), ApiError> {
    let store = state.store()?;
    let Json(body) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let (alias, secret) = body.into_new_secret()?;

    if !store.insert_secret(&alias, &secret)? {
        return Err(ApiError::AliasTaken(alias));
    }
    info!(alias = %alias, secret_type = %secret.secret_type, "secret created");

    if let Err(e) = store.record_created(secret.secret_type) {
        notify::capture("stats", &alias, &*e);
    }

    Ok((StatusCode::CREATED, Json(CreateResponse { alias })))
}

// ── Retrieve and destroy ──────────────────────────────────────────────────────

/// Wiped on drop, like the [`RevealedSecret`] it is built from.
#[derive(Debug, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveResponse {
    #[zeroize(skip)]
    pub secret_type: SecretType,
    pub message: String,
    pub is_encrypted_with_user_password: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neogram_destruction_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neogram_destruction_timeout: Option<u32>,
}

impl From<&RevealedSecret> for RetrieveResponse {
    fn from(secret: &RevealedSecret) -> Self {
        let neogram = secret.secret_type == SecretType::Neogram;
        Self {
            secret_type: secret.secret_type,
            message: secret.message.clone(),
            is_encrypted_with_user_password: secret.is_encrypted_with_user_password,
            neogram_destruction_message: neogram.then(|| {
                secret
                    .neogram_destruction_message
                    .clone()
                    .unwrap_or_default()
            }),
            neogram_destruction_timeout: neogram.then(|| {
                secret
                    .neogram_destruction_timeout
                    .unwrap_or(NEOGRAM_TIMEOUT_DEFAULT)
            }),
        }
    }
}

/// `DELETE /api/secrets/{alias}`: hand the secret out once and destroy it.
///
/// Everything after the store call is best-effort: the secret is already gone,
/// so counter and receipt failures are logged and the response still succeeds.
pub async fn retrieve_secret(
    State(state): State<AppState>,
    alias: Result<Path<String>, PathRejection>,
) -> Result<Json<RetrieveResponse>, ApiError> {
    let store = state.store()?;
    let alias = match alias {
        Ok(Path(alias)) if is_valid_alias(&alias) => alias,
        _ => return Err(ApiError::InvalidInput("Invalid URL".into())),
    };

    let secret = store
        .take_secret(&alias)?
        .ok_or(ApiError::SecretNotFound)?;
    info!(alias = %alias, secret_type = %secret.secret_type, "secret viewed and destroyed");

    if let Err(e) = store.record_viewed(secret.secret_type) {
        notify::capture("stats", &alias, &*e);
    }

    // Dropping the handle detaches the task.
    let _ = state.notifier.dispatch(
        &alias,
        Receipt {
            email: secret.receipt_email.clone(),
            phone_number: secret.receipt_phone_number.clone(),
        },
    );

    Ok(Json(RetrieveResponse::from(&secret)))
}

// ── Stats ─────────────────────────────────────────────────────────────────────

pub async fn stats(State(state): State<AppState>) -> Result<Json<Stats>, ApiError> {
    Ok(Json(state.store()?.stats()?))
}

// ── User settings ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsRequest {
    pub name: String,
    pub neogram_destruction_message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsResponse {
    pub user: Option<UserSettings>,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub user_id: String,
}

pub async fn get_settings(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let user = state.store()?.get_settings(&user_id)?;
    Ok(Json(SettingsResponse {
        user,
        session: SessionInfo { user_id },
    }))
}

pub async fn save_settings(
    State(state): State<AppState>,
    Extension(UserId(user_id)): Extension<UserId>,
    payload: Result<Json<SettingsRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let store = state.store()?;
    let Json(body) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let (name, neogram_destruction_message) =
        settings::normalize_input(&body.name, &body.neogram_destruction_message)
            .map_err(ApiError::InvalidInput)?;

    let saved = store.upsert_settings(&user_id, &name, &neogram_destruction_message)?;
    info!(user = %user_id, "user settings saved");

    Ok(Json(json!({
        "data": saved,
        "message": "Your settings have been saved!",
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(secret_type: SecretType) -> CreateRequest {
        CreateRequest {
            alias: None,
            secret_type,
            message: "hello".into(),
            is_encrypted_with_user_password: false,
            neogram_destruction_message: Some("  poof  ".into()),
            neogram_destruction_timeout: None,
            receipt_email: None,
            receipt_phone_number: None,
        }
    }

    #[test]
    fn generates_alias_when_missing_or_blank() {
        let (alias, _) = request(SecretType::Text).into_new_secret().unwrap();
        assert!(is_valid_alias(&alias));

        let mut req = request(SecretType::Text);
        req.alias = Some("   ".into());
        let (alias, _) = req.into_new_secret().unwrap();
        assert!(is_valid_alias(&alias));
    }

    #[test]
    fn neogram_fields_dropped_for_text() {
        let (_, secret) = request(SecretType::Text).into_new_secret().unwrap();
        assert_eq!(secret.neogram_destruction_message, None);
        assert_eq!(secret.neogram_destruction_timeout, None);
    }

    #[test]
    fn neogram_defaults_timeout_and_trims_message() {
        let (_, secret) = request(SecretType::Neogram).into_new_secret().unwrap();
        assert_eq!(secret.neogram_destruction_message.as_deref(), Some("poof"));
        assert_eq!(secret.neogram_destruction_timeout, Some(NEOGRAM_TIMEOUT_DEFAULT));

        let mut req = request(SecretType::Neogram);
        req.neogram_destruction_timeout = Some(0);
        assert!(req.into_new_secret().is_err());
    }

    #[test]
    fn rejects_bad_input() {
        let mut req = request(SecretType::Text);
        req.message = String::new();
        assert!(matches!(req.into_new_secret(), Err(ApiError::InvalidInput(_))));

        let mut req = request(SecretType::Text);
        req.alias = Some("no/slashes".into());
        assert!(matches!(req.into_new_secret(), Err(ApiError::InvalidInput(_))));

        let mut req = request(SecretType::Text);
        req.receipt_email = Some("not-an-email".into());
        assert!(matches!(req.into_new_secret(), Err(ApiError::InvalidInput(_))));

        let mut req = request(SecretType::Text);
        req.receipt_phone_number = Some("+12ab".into());
        assert!(matches!(req.into_new_secret(), Err(ApiError::InvalidInput(_))));
    }

    #[test]
    fn empty_receipts_are_ignored_and_phone_normalized() {
        let mut req = request(SecretType::Url);
        req.receipt_email = Some("".into());
        req.receipt_phone_number = Some("+41 79 123-45-67".into());
        let (_, secret) = req.into_new_secret().unwrap();
        assert_eq!(secret.receipt_email, None);
        assert_eq!(secret.receipt_phone_number.as_deref(), Some("41791234567"));
    }

    #[test]
    fn retrieve_response_shape_depends_on_type() {
        let text = RevealedSecret {
            secret_type: SecretType::Text,
            message: "hello".into(),
            is_encrypted_with_user_password: false,
            neogram_destruction_message: None,
            neogram_destruction_timeout: None,
            receipt_email: Some("neo@example.com".into()),
            receipt_phone_number: None,
        };
        let body = serde_json::to_value(RetrieveResponse::from(&text)).unwrap();
        assert_eq!(
            body,
            json!({"secretType": "text", "message": "hello", "isEncryptedWithUserPassword": false})
        );

        let neogram = RevealedSecret {
            secret_type: SecretType::Neogram,
            message: "wake up".into(),
            is_encrypted_with_user_password: true,
            neogram_destruction_message: None,
            neogram_destruction_timeout: Some(7),
            receipt_email: None,
            receipt_phone_number: None,
        };
        let body = serde_json::to_value(RetrieveResponse::from(&neogram)).unwrap();
        assert_eq!(body["neogramDestructionMessage"], "");
        assert_eq!(body["neogramDestructionTimeout"], 7);
        assert_eq!(body["isEncryptedWithUserPassword"], true);
    }

    #[test]
    fn retrieve_response_wipes_plaintext() {
        let neogram = RevealedSecret {
            secret_type: SecretType::Neogram,
            message: "wake up".into(),
            is_encrypted_with_user_password: false,
            neogram_destruction_message: Some("poof".into()),
            neogram_destruction_timeout: Some(7),
            receipt_email: None,
            receipt_phone_number: None,
        };
        let mut response = RetrieveResponse::from(&neogram);
        assert_eq!(response.message, "wake up");

        response.zeroize();
        assert!(response.message.is_empty());
        assert_eq!(response.neogram_destruction_message, None);
        assert_eq!(response.neogram_destruction_timeout, None);
        assert_eq!(response.secret_type, SecretType::Neogram);

        fn wiped_on_drop<T: ZeroizeOnDrop>(_: &T) {}
        wiped_on_drop(&response);
    }
}
