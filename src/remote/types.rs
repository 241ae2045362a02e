//! Remote catalog payload types.
//!
//! These mirror what a warehouse returns for `SHOW STAGES` (one row per
//! stage) and `DESCRIBE STAGE` (one row per property), plus the identity a
//! create call hands back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::QualifiedName;

/// Describe property groups and names understood by the normalizer.
pub mod props {
    /// Location group.
    pub const STAGE_LOCATION: &str = "STAGE_LOCATION";
    /// Private link group.
    pub const PRIVATELINK: &str = "PRIVATELINK";
    /// Directory table group.
    pub const DIRECTORY: &str = "DIRECTORY";
    /// Encryption group.
    pub const STAGE_ENCRYPTION: &str = "STAGE_ENCRYPTION";
    /// File format group.
    pub const STAGE_FILE_FORMAT: &str = "STAGE_FILE_FORMAT";

    /// Location URL.
    pub const URL: &str = "URL";
    /// Private link flag.
    pub const USE_PRIVATELINK_ENDPOINT: &str = "USE_PRIVATELINK_ENDPOINT";
    /// Directory enabled.
    pub const ENABLE: &str = "ENABLE";
    /// Directory auto refresh.
    pub const AUTO_REFRESH: &str = "AUTO_REFRESH";
    /// Directory refresh on create.
    pub const REFRESH_ON_CREATE: &str = "REFRESH_ON_CREATE";
    /// Encryption type.
    pub const TYPE: &str = "TYPE";
    /// KMS key id.
    pub const KMS_KEY_ID: &str = "KMS_KEY_ID";
    /// Named file format.
    pub const FORMAT_NAME: &str = "FORMAT_NAME";

    /// Property type tags.
    pub const STRING: &str = "String";
    /// Boolean property type.
    pub const BOOLEAN: &str = "Boolean";
    /// Integer property type.
    pub const INTEGER: &str = "Integer";
    /// List property type.
    pub const LIST: &str = "List";
}

/// Opaque identity of a remote stage.
///
/// Two identities denote the same remote object iff their `object_id`s match;
/// a rename keeps the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageIdentity {
    /// Id issued by the remote on create.
    pub object_id: String,
    /// Current qualified name.
    pub name: QualifiedName,
    /// Fingerprints of the write-only secrets last applied, keyed by attribute path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secret_fingerprints: BTreeMap<String, String>,
}

/// Full remote read of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStageData {
    /// Remote object id.
    pub object_id: String,
    /// `SHOW STAGES` row.
    pub show: ShowStageRow,
    /// `DESCRIBE STAGE` rows.
    pub properties: Vec<DescribeProperty>,
}

/// One `SHOW STAGES` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowStageRow {
    /// Creation time.
    pub created_on: DateTime<Utc>,
    /// Stage name.
    pub name: String,
    /// Database name.
    pub database_name: String,
    /// Schema name.
    pub schema_name: String,
    /// Location URL (empty for internal stages).
    #[serde(default)]
    pub url: String,
    /// Whether inline credentials are stored.
    #[serde(default)]
    pub has_credentials: bool,
    /// Whether a client-side master key is stored.
    #[serde(default)]
    pub has_encryption_key: bool,
    /// Owning role.
    #[serde(default)]
    pub owner: String,
    /// Comment.
    #[serde(default)]
    pub comment: String,
    /// Cloud region.
    #[serde(default)]
    pub region: Option<String>,
    /// `INTERNAL` or `EXTERNAL`.
    pub stage_type: String,
    /// Cloud provider for external stages.
    #[serde(default)]
    pub cloud: Option<String>,
    /// Storage integration name.
    #[serde(default)]
    pub storage_integration: Option<String>,
    /// S3-compatible endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Owner role type.
    #[serde(default)]
    pub owner_role_type: String,
    /// Whether the directory table is enabled.
    #[serde(default)]
    pub directory_enabled: bool,
}

/// One `DESCRIBE STAGE` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeProperty {
    /// Property group.
    pub parent_property: String,
    /// Property name.
    pub property: String,
    /// Property type tag (`String`, `Boolean`, `Integer`, `List`).
    pub property_type: String,
    /// Current value.
    pub property_value: String,
    /// Backend default value.
    #[serde(default)]
    pub property_default: String,
}

impl StageIdentity {
    /// Creates an identity without fingerprints.
    #[must_use]
    pub const fn new(object_id: String, name: QualifiedName) -> Self {
        Self {
            object_id,
            name,
            secret_fingerprints: BTreeMap::new(),
        }
    }

    /// Returns true if both identities denote the same remote object.
    #[must_use]
    pub fn same_object(&self, other: &Self) -> bool {
        self.object_id == other.object_id
    }

    /// Returns a short object id for display.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.object_id.get(..8).unwrap_or(&self.object_id)
    }
}

impl fmt::Display for StageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.short_id())
    }
}

impl RawStageData {
    /// Returns the qualified name reported by the remote.
    #[must_use]
    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(
            &self.show.database_name,
            &self.show.schema_name,
            &self.show.name,
        )
    }

    /// Finds a property, ignoring case.
    #[must_use]
    pub fn property(&self, parent: &str, name: &str) -> Option<&DescribeProperty> {
        self.properties.iter().find(|p| {
            p.parent_property.eq_ignore_ascii_case(parent) && p.property.eq_ignore_ascii_case(name)
        })
    }

    /// Returns the properties of one group.
    pub fn group<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a DescribeProperty> + 'a {
        self.properties
            .iter()
            .filter(move |p| p.parent_property.eq_ignore_ascii_case(parent))
    }

    /// Returns true if the describe output reports the given group at all.
    #[must_use]
    pub fn has_group(&self, parent: &str) -> bool {
        self.group(parent).next().is_some()
    }
}

impl DescribeProperty {
    /// Creates a property row.
    #[must_use]
    pub fn new(parent: &str, property: &str, property_type: &str, value: &str, default: &str) -> Self {
        Self {
            parent_property: parent.to_string(),
            property: property.to_string(),
            property_type: property_type.to_string(),
            property_value: value.to_string(),
            property_default: default.to_string(),
        }
    }

    /// Creates a boolean property row.
    #[must_use]
    pub fn boolean(parent: &str, property: &str, value: bool, default: bool) -> Self {
        Self::new(
            parent,
            property,
            props::BOOLEAN,
            &value.to_string(),
            &default.to_string(),
        )
    }

    /// Creates a list property row (`['a', 'b']` encoding).
    #[must_use]
    pub fn list(parent: &str, property: &str, value: &[String], default: &[String]) -> Self {
        Self::new(
            parent,
            property,
            props::LIST,
            &encode_list(value),
            &encode_list(default),
        )
    }
}

/// Encodes a list the way `DESCRIBE` prints it: `['a', '']`.
///
/// Elements are single-quoted; quotes and backslashes inside them are
/// backslash-escaped.
#[must_use]
pub fn encode_list(items: &[String]) -> String {
    let quoted: Vec<String> = items
        .iter()
        .map(|item| format!("'{}'", item.replace('\\', "\\\\").replace('\'', "\\'")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

/// Decodes a `DESCRIBE` list value. Brackets are optional.
///
/// Quoted elements may contain commas and escaped quotes. Bare elements are
/// taken verbatim up to the next comma, trimmed.
#[must_use]
pub fn decode_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    let inner = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    if inner.trim().is_empty() {
        return Vec::new();
    }

    let mut items = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut item = String::new();
        if chars.next_if_eq(&'\'').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => item.extend(chars.next()),
                    '\'' => break,
                    other => item.push(other),
                }
            }
            while chars.next_if(|c| *c != ',').is_some() {}
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                item.push(c);
            }
            item = item.trim().to_string();
        }
        items.push(item);

        // Consumes the separator; the list ends when there is none.
        if chars.next().is_none() {
            break;
        }
    }
    items
}
