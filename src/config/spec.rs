//! Desired-state specification types for stages.
//!
//! This module defines the structs that map to the `stagectl.yaml` manifest.
//! A [`StageDesiredState`] fully describes one stage; the storage backend is a
//! tagged union so every backend shares one diff engine and one policy table.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// The root manifest structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageManifest {
    /// Identity state configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Remote catalog configuration.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Reconciliation options.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Stages to reconcile.
    #[serde(default)]
    pub stages: Vec<StageDesiredState>,
}

/// Identity state backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Directory holding the state file (defaults to `.stagectl` next to the manifest).
    #[serde(default)]
    pub path: Option<String>,
}

/// Remote catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RemoteConfig {
    /// Backend type.
    #[serde(default)]
    pub backend: RemoteBackend,
    /// Catalog file path (file backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// Remote catalog backends available to the CLI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// JSON catalog file.
    #[default]
    File,
    /// Process-local catalog (discarded on exit; useful for dry runs).
    Memory,
}

/// Reconciliation options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// How a replace is carried out.
    #[serde(default)]
    pub replace_strategy: ReplaceStrategy,
    /// Whether database/schema moves are applied as a rename.
    #[serde(default = "default_true")]
    pub allow_identifier_move: bool,
    /// Recreate stages deleted out-of-band instead of reporting drift.
    #[serde(default)]
    pub recreate_missing: bool,
}

/// Ordering of the drop and create calls of a replace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Drop the old stage, then create the new one.
    #[default]
    DropThenCreate,
    /// Create the new stage first; only possible when the names differ.
    CreateThenDrop,
}

/// Desired configuration of a single stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageDesiredState {
    /// Logical id used to track the stage across renames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Database the stage lives in.
    pub database: String,
    /// Schema the stage lives in.
    pub schema: String,
    /// Stage name.
    pub name: String,
    /// Storage backend.
    pub storage: StageStorage,
    /// Directory table settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<DirectoryConfig>,
    /// File format attached to the stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format: Option<FileFormatConfig>,
    /// Free-form comment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Storage backend of a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageStorage {
    /// Warehouse-managed storage.
    Internal(InternalStorage),
    /// Amazon S3.
    S3(S3Storage),
    /// S3-compatible object storage.
    S3Compatible(S3CompatibleStorage),
    /// Google Cloud Storage.
    Gcs(GcsStorage),
    /// Azure Blob Storage.
    Azure(AzureStorage),
}

/// Discriminant of [`StageStorage`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Internal stage.
    Internal,
    /// External S3 stage.
    S3,
    /// External S3-compatible stage.
    S3Compatible,
    /// External GCS stage.
    Gcs,
    /// External Azure stage.
    Azure,
}

/// Internal stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InternalStorage {
    /// Encryption block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<InternalEncryption>,
}

/// Internal stage encryption; at most one sub-variant may be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InternalEncryption {
    /// Client- and server-side encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snowflake_full: Option<Marker>,
    /// Server-side encryption only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snowflake_sse: Option<Marker>,
}

/// S3 stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct S3Storage {
    /// Bucket URL (`s3://bucket/path/`).
    #[serde(default)]
    pub url: String,
    /// Storage integration name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_integration: Option<String>,
    /// Inline credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<AwsCredentials>,
    /// Encryption block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<S3Encryption>,
    /// Route traffic through a private link endpoint.
    #[serde(default, skip_serializing_if = "TriBool::is_default")]
    pub use_privatelink_endpoint: TriBool,
}

/// AWS credentials: either a key pair or a role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AwsCredentials {
    /// Access key id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_key_id: Option<String>,
    /// Secret access key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_secret_key: Option<String>,
    /// Session token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_token: Option<String>,
    /// IAM role ARN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_role: Option<String>,
}

/// S3 encryption; at most one sub-variant may be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct S3Encryption {
    /// Client-side encryption with a master key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_cse: Option<MasterKey>,
    /// S3-managed server-side encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_sse_s3: Option<Marker>,
    /// KMS-managed server-side encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_sse_kms: Option<KmsKey>,
    /// Explicitly no encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub none: Option<Marker>,
}

/// S3-compatible stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct S3CompatibleStorage {
    /// Bucket URL (`s3compat://bucket/path/`).
    #[serde(default)]
    pub url: String,
    /// Storage endpoint host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Inline credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<AwsCredentials>,
}

/// GCS stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GcsStorage {
    /// Bucket URL (`gcs://bucket/path/`).
    #[serde(default)]
    pub url: String,
    /// Storage integration name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_integration: Option<String>,
    /// Encryption block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<GcsEncryption>,
}

/// GCS encryption; at most one sub-variant may be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct GcsEncryption {
    /// KMS-managed server-side encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs_sse_kms: Option<KmsKey>,
    /// Explicitly no encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub none: Option<Marker>,
}

/// Azure stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AzureStorage {
    /// Container URL (`azure://account.blob.core.windows.net/container/`).
    #[serde(default)]
    pub url: String,
    /// Storage integration name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_integration: Option<String>,
    /// Inline credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<AzureCredentials>,
    /// Encryption block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<AzureEncryption>,
}

/// Azure credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AzureCredentials {
    /// Shared access signature token.
    #[serde(default)]
    pub azure_sas_token: String,
}

/// Azure encryption; at most one sub-variant may be set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AzureEncryption {
    /// Client-side encryption with a master key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_cse: Option<MasterKey>,
    /// Explicitly no encryption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub none: Option<Marker>,
}

/// Empty block used for encryption sub-variants without parameters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Marker {}

/// Master key for client-side encryption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MasterKey {
    /// Base64-encoded key.
    #[serde(default)]
    pub master_key: String,
}

/// KMS key reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct KmsKey {
    /// KMS key id; the backend default key is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
}

/// Directory table settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DirectoryConfig {
    /// Whether the directory table is enabled.
    pub enable: bool,
    /// Refresh automatically from cloud event notifications.
    #[serde(default, skip_serializing_if = "TriBool::is_default")]
    pub auto_refresh: TriBool,
    /// Refresh once right after creation.
    #[serde(default, skip_serializing_if = "TriBool::is_default")]
    pub refresh_on_create: TriBool,
}

/// File format attached to a stage: a named format or an inline CSV descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FileFormatConfig {
    /// Reference to a named file format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_name: Option<String>,
    /// Inline CSV options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv: Option<CsvFormat>,
}

/// Inline CSV file format options. Unset options take the backend default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CsvFormat {
    /// Compression algorithm (`AUTO`, `GZIP`, `NONE`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    /// Record delimiter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_delimiter: Option<String>,
    /// Field delimiter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_delimiter: Option<String>,
    /// Number of header lines to skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_header: Option<i64>,
    /// Quote character.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_optionally_enclosed_by: Option<String>,
    /// Trim whitespace around fields.
    #[serde(default, skip_serializing_if = "TriBool::is_default")]
    pub trim_space: TriBool,
    /// Strings interpreted as SQL NULL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub null_if: Option<Vec<String>>,
    /// Load empty fields as NULL.
    #[serde(default, skip_serializing_if = "TriBool::is_default")]
    pub empty_field_as_null: TriBool,
    /// Character encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// A boolean that distinguishes "explicitly false" from "left to the backend default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TriBool {
    /// Explicitly true.
    True,
    /// Explicitly false.
    False,
    /// Not set; the backend default applies.
    #[default]
    Default,
}

/// Fully qualified stage name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    /// Database name.
    pub database: String,
    /// Schema name.
    pub schema: String,
    /// Object name.
    pub name: String,
}

/// Name of the `TriBool` default sentinel in manifests and remote payloads.
pub const DEFAULT_SENTINEL: &str = "default";

const fn default_true() -> bool {
    true
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            replace_strategy: ReplaceStrategy::default(),
            allow_identifier_move: true,
            recreate_missing: false,
        }
    }
}

impl TriBool {
    /// Returns true for [`TriBool::Default`].
    #[must_use]
    pub const fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    /// Resolves the value, substituting `default` when unset.
    #[must_use]
    pub const fn resolve(self, default: bool) -> bool {
        match self {
            Self::True => true,
            Self::False => false,
            Self::Default => default,
        }
    }

    /// Returns the explicit value, if any.
    #[must_use]
    pub const fn explicit(self) -> Option<bool> {
        match self {
            Self::True => Some(true),
            Self::False => Some(false),
            Self::Default => None,
        }
    }

    /// Parses `true`, `false` or `default` (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Self::True),
            "false" => Some(Self::False),
            DEFAULT_SENTINEL => Some(Self::Default),
            _ => None,
        }
    }
}

impl From<bool> for TriBool {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl fmt::Display for TriBool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "true"),
            Self::False => write!(f, "false"),
            Self::Default => write!(f, "{DEFAULT_SENTINEL}"),
        }
    }
}

impl Serialize for TriBool {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::True => serializer.serialize_bool(true),
            Self::False => serializer.serialize_bool(false),
            Self::Default => serializer.serialize_str(DEFAULT_SENTINEL),
        }
    }
}

impl<'de> Deserialize<'de> for TriBool {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TriBoolVisitor;

        impl Visitor<'_> for TriBoolVisitor {
            type Value = TriBool;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a boolean or the string \"default\"")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<TriBool, E> {
                Ok(TriBool::from(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<TriBool, E> {
                TriBool::parse(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }

            fn visit_unit<E: de::Error>(self) -> Result<TriBool, E> {
                Ok(TriBool::Default)
            }
        }

        deserializer.deserialize_any(TriBoolVisitor)
    }
}

impl StageStorage {
    /// Returns the variant tag.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        match self {
            Self::Internal(_) => StageKind::Internal,
            Self::S3(_) => StageKind::S3,
            Self::S3Compatible(_) => StageKind::S3Compatible,
            Self::Gcs(_) => StageKind::Gcs,
            Self::Azure(_) => StageKind::Azure,
        }
    }

    /// Returns the location URL of external stages.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Internal(_) => None,
            Self::S3(s) => Some(&s.url),
            Self::S3Compatible(s) => Some(&s.url),
            Self::Gcs(s) => Some(&s.url),
            Self::Azure(s) => Some(&s.url),
        }
    }

    /// Returns the storage integration reference, if the backend supports one.
    #[must_use]
    pub fn storage_integration(&self) -> Option<&str> {
        match self {
            Self::S3(s) => s.storage_integration.as_deref(),
            Self::Gcs(s) => s.storage_integration.as_deref(),
            Self::Azure(s) => s.storage_integration.as_deref(),
            Self::Internal(_) | Self::S3Compatible(_) => None,
        }
    }

    /// Returns true if inline credentials are configured.
    #[must_use]
    pub const fn has_credentials(&self) -> bool {
        match self {
            Self::S3(s) => s.credentials.is_some(),
            Self::S3Compatible(s) => s.credentials.is_some(),
            Self::Azure(s) => s.credentials.is_some(),
            Self::Internal(_) | Self::Gcs(_) => false,
        }
    }

    /// Returns a copy with every write-only secret removed.
    ///
    /// Credential blocks are kept (so the method choice survives) with empty values.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut storage = self.clone();
        match &mut storage {
            Self::S3(s) => {
                if let Some(creds) = &mut s.credentials {
                    creds.redact();
                }
                if let Some(MasterKey { master_key }) =
                    s.encryption.as_mut().and_then(|e| e.aws_cse.as_mut())
                {
                    master_key.clear();
                }
            }
            Self::S3Compatible(s) => {
                if let Some(creds) = &mut s.credentials {
                    creds.redact();
                }
            }
            Self::Azure(s) => {
                if let Some(creds) = &mut s.credentials {
                    creds.azure_sas_token.clear();
                }
                if let Some(MasterKey { master_key }) =
                    s.encryption.as_mut().and_then(|e| e.azure_cse.as_mut())
                {
                    master_key.clear();
                }
            }
            Self::Internal(_) | Self::Gcs(_) => {}
        }
        storage
    }
}

impl AwsCredentials {
    fn redact(&mut self) {
        if self.aws_secret_key.is_some() {
            self.aws_secret_key = Some(String::new());
        }
        if self.aws_token.is_some() {
            self.aws_token = Some(String::new());
        }
    }
}

impl StageKind {
    /// Returns true for external stages.
    #[must_use]
    pub const fn is_external(self) -> bool {
        !matches!(self, Self::Internal)
    }

    /// Returns the URL scheme expected for this backend.
    #[must_use]
    pub const fn url_scheme(self) -> Option<&'static str> {
        match self {
            Self::Internal => None,
            Self::S3 => Some("s3://"),
            Self::S3Compatible => Some("s3compat://"),
            Self::Gcs => Some("gcs://"),
            Self::Azure => Some("azure://"),
        }
    }

    /// Returns the cloud reported by the backend for this kind.
    #[must_use]
    pub const fn cloud(self) -> Option<&'static str> {
        match self {
            Self::Internal => None,
            Self::S3 | Self::S3Compatible => Some("AWS"),
            Self::Gcs => Some("GCP"),
            Self::Azure => Some("AZURE"),
        }
    }

    /// Returns the stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::S3 => "s3",
            Self::S3Compatible => "s3_compatible",
            Self::Gcs => "gcs",
            Self::Azure => "azure",
        }
    }

    /// Parses the stable lowercase name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "internal" => Some(Self::Internal),
            "s3" => Some(Self::S3),
            "s3_compatible" => Some(Self::S3Compatible),
            "gcs" => Some(Self::Gcs),
            "azure" => Some(Self::Azure),
            _ => None,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StageDesiredState {
    /// Creates an internal stage with no optional blocks.
    #[must_use]
    pub fn internal(database: &str, schema: &str, name: &str) -> Self {
        Self::with_storage(database, schema, name, StageStorage::Internal(InternalStorage::default()))
    }

    /// Creates a stage with the given storage and no optional blocks.
    #[must_use]
    pub fn with_storage(database: &str, schema: &str, name: &str, storage: StageStorage) -> Self {
        Self {
            id: None,
            database: database.to_string(),
            schema: schema.to_string(),
            name: name.to_string(),
            storage,
            directory: None,
            file_format: None,
            comment: None,
        }
    }

    /// Returns the backend kind.
    #[must_use]
    pub const fn kind(&self) -> StageKind {
        self.storage.kind()
    }

    /// Returns the qualified name as written in the manifest.
    #[must_use]
    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(&self.database, &self.schema, &self.name)
    }

    /// Returns the logical id used as the state key.
    #[must_use]
    pub fn logical_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| {
            format!("{}.{}.{}", self.database, self.schema, self.name).to_lowercase()
        })
    }

    /// Returns a copy with write-only secrets removed.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            storage: self.storage.redacted(),
            ..self.clone()
        }
    }

    /// Returns a copy with a different name.
    #[must_use]
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Returns a copy moved to another database and schema.
    #[must_use]
    pub fn moved(&self, database: &str, schema: &str) -> Self {
        Self {
            database: database.to_string(),
            schema: schema.to_string(),
            ..self.clone()
        }
    }

    /// Returns a copy with different storage.
    #[must_use]
    pub fn with_storage_replaced(&self, storage: StageStorage) -> Self {
        Self {
            storage,
            ..self.clone()
        }
    }

    /// Returns a copy with the given directory block.
    #[must_use]
    pub fn with_directory(&self, directory: Option<DirectoryConfig>) -> Self {
        Self {
            directory,
            ..self.clone()
        }
    }

    /// Returns a copy with the given file format.
    #[must_use]
    pub fn with_file_format(&self, file_format: Option<FileFormatConfig>) -> Self {
        Self {
            file_format,
            ..self.clone()
        }
    }

    /// Returns a copy with the given comment.
    #[must_use]
    pub fn with_comment(&self, comment: Option<&str>) -> Self {
        Self {
            comment: comment.map(String::from),
            ..self.clone()
        }
    }
}

impl DirectoryConfig {
    /// Creates a directory block with only `enable` set.
    #[must_use]
    pub const fn enabled(enable: bool) -> Self {
        Self {
            enable,
            auto_refresh: TriBool::Default,
            refresh_on_create: TriBool::Default,
        }
    }
}

impl FileFormatConfig {
    /// References a named file format.
    #[must_use]
    pub fn named(format_name: &str) -> Self {
        Self {
            format_name: Some(format_name.to_string()),
            csv: None,
        }
    }

    /// Uses an inline CSV descriptor.
    #[must_use]
    pub const fn inline(csv: CsvFormat) -> Self {
        Self {
            format_name: None,
            csv: Some(csv),
        }
    }
}

impl QualifiedName {
    /// Creates a qualified name.
    #[must_use]
    pub fn new(database: &str, schema: &str, name: &str) -> Self {
        Self {
            database: database.to_string(),
            schema: schema.to_string(),
            name: name.to_string(),
        }
    }

    /// Returns the name with every part case-normalized.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            database: normalize_identifier(&self.database),
            schema: normalize_identifier(&self.schema),
            name: normalize_identifier(&self.name),
        }
    }

    /// Returns true if both names denote the same object.
    #[must_use]
    pub fn same_object(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.name)
    }
}

/// Case-normalizes an identifier: unquoted identifiers are upper-cased,
/// double-quoted identifiers keep their exact spelling without the quotes.
#[must_use]
pub fn normalize_identifier(ident: &str) -> String {
    let trimmed = ident.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].replace("\"\"", "\"")
    } else {
        trimmed.to_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_stage_yaml() {
        let yaml = r#"
database: analytics
schema: raw
name: landing
storage:
  type: s3
  url: s3://bucket/landing/
  storage_integration: s3_int
  use_privatelink_endpoint: default
directory:
  enable: true
  auto_refresh: false
comment: "landing zone"
"#;
        let stage: StageDesiredState = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(stage.kind(), StageKind::S3);
        let StageStorage::S3(s3) = &stage.storage else {
            panic!("expected s3 storage");
        };
        assert_eq!(s3.storage_integration.as_deref(), Some("s3_int"));
        assert_eq!(s3.use_privatelink_endpoint, TriBool::Default);
        let directory = stage.directory.unwrap();
        assert!(directory.enable);
        assert_eq!(directory.auto_refresh, TriBool::False);
        assert_eq!(directory.refresh_on_create, TriBool::Default);
    }

    #[test]
    fn test_tribool_rejects_garbage() {
        let result: Result<DirectoryConfig, _> =
            serde_yaml::from_str("enable: true\nauto_refresh: maybe\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_tribool_serialization_keeps_default_sentinel() {
        let json = serde_json::to_string(&TriBool::Default).unwrap();
        assert_eq!(json, "\"default\"");
        let back: TriBool = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TriBool::Default);
        assert_ne!(back, TriBool::False);
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("my_stage"), "MY_STAGE");
        assert_eq!(normalize_identifier("\"MixedCase\""), "MixedCase");
        assert_eq!(normalize_identifier(" raw "), "RAW");
    }

    #[test]
    fn test_qualified_name_same_object() {
        let a = QualifiedName::new("db", "sc", "st");
        let b = QualifiedName::new("DB", "SC", "ST");
        let c = QualifiedName::new("db", "sc", "\"st\"");
        assert!(a.same_object(&b));
        assert!(!a.same_object(&c));
    }

    #[test]
    fn test_redacted_removes_secrets_but_keeps_method() {
        let stage = StageDesiredState::with_storage(
            "db",
            "sc",
            "st",
            StageStorage::S3(S3Storage {
                url: String::from("s3://b/"),
                credentials: Some(AwsCredentials {
                    aws_key_id: Some(String::from("AKIA")),
                    aws_secret_key: Some(String::from("secret")),
                    ..AwsCredentials::default()
                }),
                ..S3Storage::default()
            }),
        );
        let redacted = stage.redacted();
        assert!(redacted.storage.has_credentials());
        let StageStorage::S3(s3) = &redacted.storage else {
            panic!("expected s3 storage");
        };
        let creds = s3.credentials.as_ref().unwrap();
        assert_eq!(creds.aws_key_id.as_deref(), Some("AKIA"));
        assert_eq!(creds.aws_secret_key.as_deref(), Some(""));
    }

    #[test]
    fn test_logical_id_defaults_to_lowercase_name() {
        let stage = StageDesiredState::internal("DB", "Raw", "Files");
        assert_eq!(stage.logical_id(), "db.raw.files");
        let keyed = StageDesiredState {
            id: Some(String::from("files")),
            ..stage
        };
        assert_eq!(keyed.logical_id(), "files");
    }
}
