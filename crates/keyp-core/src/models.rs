//! Data models for secrets and their fields

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mask substituted for sensitive values in redacted output
pub const REDACTED_VALUE: &str = "********";

/// UI type hint for a field value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Text,
    Password,
    Pin,
    Url,
    Email,
}

impl FieldType {
    /// String form stored in the `fields.type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Password => "password",
            FieldType::Pin => "pin",
            FieldType::Url => "url",
            FieldType::Email => "email",
        }
    }

    /// Parse the database `TEXT` value. Unknown hints fall back to text so
    /// older vault files keep loading.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "password" => FieldType::Password,
            "pin" => FieldType::Pin,
            "url" => FieldType::Url,
            "email" => FieldType::Email,
            _ => FieldType::Text,
        }
    }
}

/// A single labeled value inside a secret
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Unique identifier
    pub id: String,

    /// Label, unique within the parent secret
    pub label: String,

    /// The value; ciphertext at rest when `sensitive` is set
    pub value: String,

    /// Whether the value is encrypted at rest and masked in display
    pub sensitive: bool,

    /// UI type hint
    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Position within the parent secret
    pub sort_order: i64,
}

impl Field {
    /// Create a new sensitive text field.
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            value: value.into(),
            sensitive: true,
            field_type: FieldType::Text,
            sort_order: 0,
        }
    }
}

/// A structured secret: named record with fields, tags, and notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    /// Stable opaque identifier, generated at creation
    pub id: String,

    /// Human-chosen name, unique per vault
    pub name: String,

    /// Unordered tag strings
    pub tags: Vec<String>,

    /// Ordered fields
    #[serde(default)]
    pub fields: Vec<Field>,

    /// Free-text note
    #[serde(default)]
    pub notes: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Secret {
    /// Create a new secret with defaults.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a field, assigning the next sort position.
    pub fn add_field(&mut self, mut field: Field) {
        field.sort_order = self.fields.len() as i64;
        self.fields.push(field);
        self.updated_at = Utc::now();
    }

    /// Look up a field by label.
    pub fn field(&self, label: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.label == label)
    }

    /// Tags as the JSON array string stored in the `secrets.tags` column.
    pub fn tags_json(&self) -> String {
        serde_json::to_string(&self.tags).unwrap_or_else(|_| "[]".to_string())
    }

    /// A copy with every sensitive field value replaced by the mask.
    ///
    /// Pure projection: the receiver is untouched, and only values whose
    /// field carries the sensitive flag change. Applied by callers right
    /// before rendering, never by the vault itself.
    pub fn redacted(&self) -> Secret {
        let mut copy = self.clone();
        for field in &mut copy.fields {
            if field.sensitive {
                field.value = REDACTED_VALUE.to_string();
            }
        }
        copy
    }
}

/// Parse the JSON tag array stored in the database.
pub fn parse_tags(json: &str) -> Vec<String> {
    if json.is_empty() {
        return Vec::new();
    }
    serde_json::from_str(json).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_secret_defaults() {
        let secret = Secret::new("github");

        assert_eq!(secret.name, "github");
        assert!(secret.fields.is_empty());
        assert!(secret.tags.is_empty());
        assert_eq!(secret.created_at, secret.updated_at);
        assert!(!secret.id.is_empty());
    }

    #[test]
    fn test_add_field_assigns_sort_order() {
        let mut secret = Secret::new("github");
        secret.add_field(Field::new("username", "alice"));
        secret.add_field(Field::new("token", "tok"));

        assert_eq!(secret.fields[0].sort_order, 0);
        assert_eq!(secret.fields[1].sort_order, 1);
        assert!(secret.updated_at >= secret.created_at);
    }

    #[test]
    fn test_redacted_masks_only_sensitive_fields() {
        let mut secret = Secret::new("gh");
        let mut user = Field::new("username", "alice");
        user.sensitive = false;
        secret.add_field(user);
        secret.add_field(Field::new("token", "ghp_abc123"));

        let redacted = secret.redacted();

        assert_eq!(redacted.fields[0].value, "alice");
        assert_eq!(redacted.fields[1].value, REDACTED_VALUE);
        // Original untouched
        assert_eq!(secret.fields[1].value, "ghp_abc123");
    }

    #[test]
    fn test_tags_json_roundtrip() {
        let mut secret = Secret::new("gh");
        secret.tags = vec!["work".to_string(), "dev".to_string()];

        assert_eq!(parse_tags(&secret.tags_json()), secret.tags);
        assert!(parse_tags("").is_empty());
        assert!(parse_tags("not json").is_empty());
    }

    #[test]
    fn test_field_type_db_mapping() {
        for ft in [
            FieldType::Text,
            FieldType::Password,
            FieldType::Pin,
            FieldType::Url,
            FieldType::Email,
        ] {
            assert_eq!(FieldType::from_str_lossy(ft.as_str()), ft);
        }
        assert_eq!(FieldType::from_str_lossy("mystery"), FieldType::Text);
    }
}
