//! Normalization of the upload credential response.
//!
//! The backend has returned the credential in several shapes over time. They
//! are tried in a fixed priority order:
//!
//! 1. nested object: `{"upload_token": {"token": "...", "recording_id": ...}}`
//!    (the wrapper key may also be `uploadToken` or `data`)
//! 2. flat object: `{"upload_token": "...", "recording_id": ..., "sdk_upload_id": ...}`
//! 3. bare string: a JSON string, or a plain-text body holding only the token
//!
//! Anything else is a normalization failure.

use serde::{Deserialize, Deserializer};

use super::{UploadCredential, UploadCredentialError};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UploadTokenResponse {
    Nested(NestedResponse),
    Flat(FlatResponse),
    Bare(String),
}

#[derive(Debug, Deserialize)]
struct NestedResponse {
    #[serde(rename = "upload_token", alias = "uploadToken", alias = "data")]
    credential: NestedCredential,
    #[serde(default, alias = "recordingId", deserialize_with = "opt_id")]
    recording_id: Option<String>,
    #[serde(default, alias = "sdkUploadId", deserialize_with = "opt_id")]
    sdk_upload_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NestedCredential {
    #[serde(alias = "upload_token", alias = "uploadToken", alias = "id")]
    token: String,
    #[serde(default, alias = "recordingId", deserialize_with = "opt_id")]
    recording_id: Option<String>,
    #[serde(default, alias = "sdkUploadId", deserialize_with = "opt_id")]
    sdk_upload_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FlatResponse {
    #[serde(rename = "upload_token", alias = "uploadToken", alias = "token")]
    token: String,
    #[serde(default, alias = "recordingId", deserialize_with = "opt_id")]
    recording_id: Option<String>,
    #[serde(default, alias = "sdkUploadId", deserialize_with = "opt_id")]
    sdk_upload_id: Option<String>,
}

/// Identifiers arrive as strings or numbers; empty strings count as absent.
fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Option::<Id>::deserialize(deserializer)? {
        Some(Id::Text(text)) if !text.trim().is_empty() => Some(text),
        Some(Id::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl UploadTokenResponse {
    fn into_credential(self) -> Result<UploadCredential, UploadCredentialError> {
        let (token, recording_id, sdk_upload_id) = match self {
            UploadTokenResponse::Nested(nested) => (
                nested.credential.token,
                nested.credential.recording_id.or(nested.recording_id),
                nested.credential.sdk_upload_id.or(nested.sdk_upload_id),
            ),
            UploadTokenResponse::Flat(flat) => (flat.token, flat.recording_id, flat.sdk_upload_id),
            UploadTokenResponse::Bare(token) => (token, None, None),
        };

        let token = token.trim();
        if token.is_empty() {
            return Err(UploadCredentialError::Normalization(
                "upload token is empty".to_string(),
            ));
        }

        Ok(UploadCredential {
            upload_token: token.to_string(),
            recording_id,
            sdk_upload_id,
        })
    }
}

pub fn parse_upload_credential(body: &str) -> Result<UploadCredential, UploadCredentialError> {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => serde_json::from_value::<UploadTokenResponse>(value)
            .map_err(|_| {
                UploadCredentialError::Normalization(format!(
                    "unrecognized response shape: {}",
                    truncate(body)
                ))
            })?
            .into_credential(),
        Err(_) => parse_plain_text(body),
    }
}

fn parse_plain_text(body: &str) -> Result<UploadCredential, UploadCredentialError> {
    let token = body.trim();
    if token.is_empty() || token.contains(char::is_whitespace) || token.starts_with('<') {
        return Err(UploadCredentialError::Normalization(format!(
            "response is neither JSON nor a bare token: {}",
            truncate(body)
        )));
    }
    UploadTokenResponse::Bare(token.to_string()).into_credential()
}

fn truncate(body: &str) -> String {
    body.chars().take(120).collect()
}
