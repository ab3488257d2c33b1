//! Request/response types for the HTTP API
//!
//! Every response body is wrapped in the `{ok, data|error}` envelope, and
//! error codes are drawn from a closed set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use keyp_core::models::{Field, FieldType, Secret};

/// Closed set of API error codes
pub mod error_codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Envelope wrapping every API response
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Error payload inside the envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiResponse {
    pub fn success(data: impl Serialize) -> Self {
        Self {
            ok: true,
            data: Some(serde_json::to_value(data).unwrap_or(Value::Null)),
            error: None,
        }
    }

    pub fn success_empty() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorDetail {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
}

/// Body for POST /v1/unlock
#[derive(Debug, Deserialize)]
pub struct UnlockRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UnlockResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub expires_at: DateTime<Utc>,
}

/// Minimal record view for list and search responses
#[derive(Debug, Serialize)]
pub struct SecretSummary {
    pub name: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Secret> for SecretSummary {
    fn from(secret: &Secret) -> Self {
        Self {
            name: secret.name.clone(),
            tags: secret.tags.clone(),
            created_at: secret.created_at,
            updated_at: secret.updated_at,
        }
    }
}

/// Field view inside a secret response
#[derive(Debug, Serialize)]
pub struct ApiField {
    pub label: String,
    pub value: String,
    pub sensitive: bool,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// Full record view, redacted by default
#[derive(Debug, Serialize)]
pub struct SecretDetail {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub fields: Vec<ApiField>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SecretDetail {
    pub fn from_secret(secret: &Secret, redact: bool) -> Self {
        let source = if redact {
            secret.redacted()
        } else {
            secret.clone()
        };

        Self {
            id: source.id,
            name: source.name,
            tags: source.tags,
            fields: source
                .fields
                .into_iter()
                .map(|f| ApiField {
                    label: f.label,
                    value: f.value,
                    sensitive: f.sensitive,
                    field_type: f.field_type,
                })
                .collect(),
            notes: source.notes,
            created_at: source.created_at,
            updated_at: source.updated_at,
        }
    }
}

/// Field in a create or update request body
#[derive(Debug, Deserialize)]
pub struct FieldInput {
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
}

impl FieldInput {
    fn into_field(self, sort_order: i64) -> Field {
        let mut field = Field::new(self.label, self.value);
        field.sensitive = self.sensitive;
        field.field_type = self.field_type;
        field.sort_order = sort_order;
        field
    }
}

/// Body for POST /v1/secrets
#[derive(Debug, Deserialize)]
pub struct CreateSecretRequest {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldInput>,
    #[serde(default)]
    pub notes: String,
}

impl CreateSecretRequest {
    pub fn into_secret(self) -> Secret {
        let mut secret = Secret::new(self.name);
        secret.tags = self.tags;
        secret.notes = self.notes;
        secret.fields = fields_from_inputs(self.fields);
        secret
    }
}

/// Body for PUT /v1/secrets/{name}; absent members are left unchanged
#[derive(Debug, Deserialize)]
pub struct UpdateSecretRequest {
    pub tags: Option<Vec<String>>,
    pub fields: Option<Vec<FieldInput>>,
    pub notes: Option<String>,
}

pub fn fields_from_inputs(inputs: Vec<FieldInput>) -> Vec<Field> {
    inputs
        .into_iter()
        .enumerate()
        .map(|(i, input)| input.into_field(i as i64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shapes() {
        let ok = serde_json::to_value(ApiResponse::success(HealthResponse { status: "ok" }))
            .unwrap();
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["data"]["status"], "ok");
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(ApiResponse::error(
            error_codes::NOT_FOUND,
            "secret not found",
        ))
        .unwrap();
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"]["code"], "not_found");
        assert!(err.get("data").is_none());
    }

    #[test]
    fn test_detail_redacts_by_default() {
        let mut secret = Secret::new("gh");
        let mut user = Field::new("username", "alice");
        user.sensitive = false;
        secret.add_field(user);
        secret.add_field(Field::new("token", "ghp_abc"));

        let redacted = SecretDetail::from_secret(&secret, true);
        assert_eq!(redacted.fields[0].value, "alice");
        assert_eq!(redacted.fields[1].value, "********");

        let revealed = SecretDetail::from_secret(&secret, false);
        assert_eq!(revealed.fields[1].value, "ghp_abc");
    }

    #[test]
    fn test_create_request_conversion() {
        let req: CreateSecretRequest = serde_json::from_str(
            r#"{"name":"wifi","fields":[{"label":"psk","value":"s3cret","sensitive":true}]}"#,
        )
        .unwrap();

        let secret = req.into_secret();
        assert_eq!(secret.name, "wifi");
        assert_eq!(secret.fields.len(), 1);
        assert!(secret.fields[0].sensitive);
        assert_eq!(secret.fields[0].field_type, FieldType::Text);
        assert_eq!(secret.fields[0].sort_order, 0);
    }
}
