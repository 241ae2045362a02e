//! Canonical attribute representation shared by desired and observed state.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{StageKind, TriBool};

/// Well-known attribute paths.
pub mod paths {
    /// Database the stage lives in.
    pub const DATABASE: &str = "database";
    /// Schema the stage lives in.
    pub const SCHEMA: &str = "schema";
    /// Stage name.
    pub const NAME: &str = "name";

    /// Storage backend variant tag.
    pub const STAGE_KIND: &str = "stage_kind";
    /// Location URL.
    pub const URL: &str = "url";
    /// S3-compatible endpoint.
    pub const ENDPOINT: &str = "endpoint";
    /// Synthetic: `none`, `storage_integration` or `credentials`.
    pub const CREDENTIAL_METHOD: &str = "credential_method";
    /// Storage integration name.
    pub const STORAGE_INTEGRATION: &str = "storage_integration";
    /// Fingerprint of the inline credentials.
    pub const CREDENTIALS: &str = "credentials";
    /// Private link routing.
    pub const USE_PRIVATELINK_ENDPOINT: &str = "use_privatelink_endpoint";

    /// Directory block presence.
    pub const DIRECTORY: &str = "directory";
    /// Directory table enabled.
    pub const DIRECTORY_ENABLE: &str = "directory.enable";
    /// Directory auto refresh.
    pub const DIRECTORY_AUTO_REFRESH: &str = "directory.auto_refresh";
    /// Directory refresh on create.
    pub const DIRECTORY_REFRESH_ON_CREATE: &str = "directory.refresh_on_create";

    /// Synthetic encryption sub-variant.
    pub const ENCRYPTION_TYPE: &str = "encryption.type";
    /// KMS key id.
    pub const ENCRYPTION_KMS_KEY_ID: &str = "encryption.kms_key_id";
    /// Fingerprint of the client-side master key.
    pub const ENCRYPTION_MASTER_KEY: &str = "encryption.master_key";

    /// Synthetic: `inline` or `named`.
    pub const FILE_FORMAT_KIND: &str = "file_format.kind";
    /// Named file format.
    pub const FILE_FORMAT_NAME: &str = "file_format.format_name";
    /// Inline format type.
    pub const FILE_FORMAT_TYPE: &str = "file_format.type";
    /// Prefix of inline CSV options.
    pub const CSV_PREFIX: &str = "file_format.csv.";

    /// Free-form comment.
    pub const COMMENT: &str = "comment";

    pub(crate) const BACKEND: &[&str] = &[
        STAGE_KIND,
        URL,
        ENDPOINT,
        CREDENTIAL_METHOD,
        STORAGE_INTEGRATION,
        CREDENTIALS,
        USE_PRIVATELINK_ENDPOINT,
    ];
}

/// Ordering section of an attribute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Database, schema, name.
    Identity,
    /// Backend binding: kind, location, credentials.
    Backend,
    /// Directory table.
    Directory,
    /// Encryption.
    Encryption,
    /// File format.
    FileFormat,
    /// Comment.
    Comment,
    /// Anything the engine does not manage.
    Other,
}

/// Dotted attribute path, ordered by section and then alphabetically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributePath {
    section: Section,
    name: String,
}

/// Presence of an optional block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockPresence {
    /// The block is set.
    Present,
    /// The block is absent (explicitly empty).
    Empty,
}

/// Typed canonical value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CanonicalValue {
    /// String value.
    Text(String),
    /// Boolean value.
    Bool(bool),
    /// Tri-state boolean.
    Tri(TriBool),
    /// Integer value.
    Int(i64),
    /// List of strings.
    List(Vec<String>),
    /// Optional block presence.
    Block(BlockPresence),
    /// Fingerprint of a write-only secret.
    Secret(String),
    /// Omitted optional scalar; the backend default applies.
    Unset,
}

/// Flat canonical view of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalStageView {
    /// Backend kind.
    pub kind: StageKind,
    /// Attribute map.
    pub attributes: BTreeMap<AttributePath, CanonicalValue>,
}

impl AttributePath {
    /// Creates a path, deriving its section from the name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let section = Self::section_of(&name);
        Self { section, name }
    }

    /// Returns the dotted name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Returns the ordering section.
    #[must_use]
    pub const fn section(&self) -> Section {
        self.section
    }

    /// Returns true if this path is `parent` or nested under it.
    #[must_use]
    pub fn is_within(&self, parent: &str) -> bool {
        self.name == parent
            || self
                .name
                .strip_prefix(parent)
                .is_some_and(|rest| rest.starts_with('.'))
    }

    fn section_of(name: &str) -> Section {
        let head = name.split('.').next().unwrap_or(name);
        match head {
            paths::DATABASE | paths::SCHEMA | paths::NAME => Section::Identity,
            paths::DIRECTORY => Section::Directory,
            "encryption" => Section::Encryption,
            "file_format" => Section::FileFormat,
            paths::COMMENT => Section::Comment,
            _ if paths::BACKEND.contains(&name) => Section::Backend,
            _ => Section::Other,
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for AttributePath {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Serialize for AttributePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for AttributePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

impl CanonicalValue {
    /// Creates a text value.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Returns true for [`CanonicalValue::Unset`] and `Tri(Default)`.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        matches!(self, Self::Unset | Self::Tri(TriBool::Default))
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean meaning of `Bool` and explicit `Tri` values.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Tri(t) => t.explicit(),
            _ => None,
        }
    }
}

impl fmt::Display for CanonicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Tri(t) => write!(f, "{t}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
            Self::Block(BlockPresence::Present) => write!(f, "(block)"),
            Self::Block(BlockPresence::Empty) => write!(f, "(empty)"),
            Self::Secret(_) => write!(f, "(sensitive)"),
            Self::Unset => write!(f, "(default)"),
        }
    }
}

impl CanonicalStageView {
    /// Creates an empty view.
    #[must_use]
    pub const fn new(kind: StageKind) -> Self {
        Self {
            kind,
            attributes: BTreeMap::new(),
        }
    }

    /// Sets a value.
    pub fn insert(&mut self, path: &str, value: CanonicalValue) {
        self.attributes.insert(AttributePath::new(path), value);
    }

    /// Looks a value up by dotted name.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&CanonicalValue> {
        self.attributes.get(&AttributePath::new(path))
    }

    /// Returns true if the path was observed.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Iterates over paths and values in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&AttributePath, &CanonicalValue)> {
        self.attributes.iter()
    }

    /// Returns every secret fingerprint keyed by path.
    #[must_use]
    pub fn secrets(&self) -> BTreeMap<String, String> {
        self.attributes
            .iter()
            .filter_map(|(path, value)| match value {
                CanonicalValue::Secret(fp) => Some((path.to_string(), fp.clone())),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_order_by_section() {
        let mut sorted: Vec<AttributePath> = [
            paths::COMMENT,
            "file_format.csv.compression",
            paths::ENCRYPTION_TYPE,
            paths::DIRECTORY_ENABLE,
            paths::URL,
            paths::NAME,
            paths::DATABASE,
        ]
        .into_iter()
        .map(AttributePath::new)
        .collect();
        sorted.sort();

        let names: Vec<&str> = sorted.iter().map(AttributePath::as_str).collect();
        assert_eq!(
            names,
            vec![
                "database",
                "name",
                "url",
                "directory.enable",
                "encryption.type",
                "file_format.csv.compression",
                "comment",
            ]
        );
    }

    #[test]
    fn test_unknown_path_sorts_last() {
        let owner = AttributePath::new("owner");
        let comment = AttributePath::new(paths::COMMENT);
        assert_eq!(owner.section(), Section::Other);
        assert!(comment < owner);
    }

    #[test]
    fn test_is_within() {
        let path = AttributePath::new(paths::DIRECTORY_ENABLE);
        assert!(path.is_within(paths::DIRECTORY));
        assert!(!AttributePath::new("directory_x").is_within(paths::DIRECTORY));
    }

    #[test]
    fn test_secret_display_is_redacted() {
        let value = CanonicalValue::Secret(String::from("abcd"));
        assert_eq!(value.to_string(), "(sensitive)");
    }
}
