//! Schema validation for stage manifests.
//!
//! Validation is a pure function of its input: it never touches the remote
//! catalog. Every violated rule is collected so callers can report all problems
//! in a single pass, and each mutual-exclusion rule produces one error per
//! involved field.

use crate::error::{Result, StageError, ValidationError, ValidationErrors};
use std::collections::HashMap;
use tracing::debug;

use super::spec::{
    AwsCredentials, AzureStorage, CsvFormat, DirectoryConfig, FileFormatConfig, GcsStorage,
    InternalStorage, S3CompatibleStorage, S3Storage, StageDesiredState, StageKind, StageManifest,
    StageStorage, TriBool,
};

/// Maximum identifier length accepted by the backend.
const MAX_IDENTIFIER_LEN: usize = 255;

/// Validator for stage desired states and manifests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigValidator;

/// Validation result of a whole manifest.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Schema violations.
    pub errors: Vec<ValidationError>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

/// Accumulates errors for one stage.
#[derive(Debug, Default)]
struct Collector {
    errors: Vec<ValidationError>,
}

impl Collector {
    fn error(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError::new(field, message));
    }

    /// Records one error per field in `fields`, each naming the others.
    fn exclusive(&mut self, fields: &[&str], message: &str) {
        for field in fields {
            let others: Vec<&str> = fields.iter().copied().filter(|f| f != field).collect();
            self.errors
                .push(ValidationError::conflict(*field, &others, message));
        }
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a single stage.
    ///
    /// # Errors
    ///
    /// Returns every violated rule when the stage is invalid.
    pub fn validate_stage(
        &self,
        stage: &StageDesiredState,
    ) -> std::result::Result<(), ValidationErrors> {
        let mut c = Collector::default();

        Self::validate_identity(stage, &mut c);
        match &stage.storage {
            StageStorage::Internal(internal) => Self::validate_internal(internal, &mut c),
            StageStorage::S3(s3) => Self::validate_s3(s3, &mut c),
            StageStorage::S3Compatible(s3c) => Self::validate_s3_compatible(s3c, &mut c),
            StageStorage::Gcs(gcs) => Self::validate_gcs(gcs, &mut c),
            StageStorage::Azure(azure) => Self::validate_azure(azure, &mut c),
        }
        if let Some(directory) = &stage.directory {
            Self::validate_directory(directory, stage.kind(), &mut c);
        }
        if let Some(file_format) = &stage.file_format {
            Self::validate_file_format(file_format, &mut c);
        }

        if c.errors.is_empty() {
            Ok(())
        } else {
            debug!(
                "Stage {} failed validation with {} error(s)",
                stage.qualified_name(),
                c.errors.len()
            );
            Err(ValidationErrors(c.errors))
        }
    }

    /// Validates a whole manifest.
    ///
    /// Stage errors are prefixed with `stages[i]`. Duplicate logical ids and
    /// duplicate qualified names are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Validation`] carrying every violation.
    pub fn validate_manifest(&self, manifest: &StageManifest) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if manifest.stages.is_empty() {
            result
                .warnings
                .push(String::from("No stages defined in manifest"));
        }

        let mut seen_ids: HashMap<String, usize> = HashMap::new();
        let mut seen_names = HashMap::new();

        for (i, stage) in manifest.stages.iter().enumerate() {
            let prefix = format!("stages[{i}]");

            if let Err(errors) = self.validate_stage(stage) {
                result
                    .errors
                    .extend(errors.iter().map(|e| e.prefixed(&prefix)));
            }

            let logical_id = stage.logical_id();
            if let Some(first) = seen_ids.insert(logical_id.clone(), i) {
                result.errors.push(ValidationError::new(
                    format!("{prefix}.id"),
                    format!("Duplicate logical id '{logical_id}' (first used by stages[{first}])"),
                ));
            }

            let name = stage.qualified_name().normalized();
            if let Some(first) = seen_names.insert(name.clone(), i) {
                result.errors.push(ValidationError::new(
                    format!("{prefix}.name"),
                    format!("Duplicate stage {name} (first declared by stages[{first}])"),
                ));
            }

            if stage.storage.has_credentials() {
                result.warnings.push(format!(
                    "{prefix}: {} uses inline credentials; prefer a storage integration",
                    stage.qualified_name()
                ));
            }
        }

        if result.errors.is_empty() {
            debug!("Manifest validation passed");
            Ok(result)
        } else {
            Err(StageError::Validation(ValidationErrors(result.errors)))
        }
    }

    fn validate_identity(stage: &StageDesiredState, c: &mut Collector) {
        for (field, value) in [
            ("database", &stage.database),
            ("schema", &stage.schema),
            ("name", &stage.name),
        ] {
            if value.trim().is_empty() {
                c.error(field, format!("{field} cannot be empty"));
            } else if !is_valid_identifier(value) {
                c.error(
                    field,
                    format!(
                        "'{value}' is not a valid identifier; use letters, digits, '_' and '$' or double-quote it"
                    ),
                );
            }
        }
    }

    fn validate_internal(internal: &InternalStorage, c: &mut Collector) {
        if let Some(enc) = &internal.encryption {
            let mut set = Vec::new();
            if enc.snowflake_full.is_some() {
                set.push("storage.encryption.snowflake_full");
            }
            if enc.snowflake_sse.is_some() {
                set.push("storage.encryption.snowflake_sse");
            }
            Self::check_encryption(&set, c);
        }
    }

    fn validate_s3(s3: &S3Storage, c: &mut Collector) {
        Self::check_url(&s3.url, StageKind::S3, c);

        if s3.storage_integration.is_some() && s3.credentials.is_some() {
            c.exclusive(
                &["storage.storage_integration", "storage.credentials"],
                "storage_integration and credentials are mutually exclusive",
            );
        }
        if s3.storage_integration.is_some() && !s3.use_privatelink_endpoint.is_default() {
            c.exclusive(
                &["storage.storage_integration", "storage.use_privatelink_endpoint"],
                "storage_integration and use_privatelink_endpoint are mutually exclusive",
            );
        }
        if let Some(integration) = &s3.storage_integration {
            Self::check_integration(integration, c);
        }
        if let Some(creds) = &s3.credentials {
            Self::check_aws_credentials(creds, true, c);
        }

        if let Some(enc) = &s3.encryption {
            let mut set = Vec::new();
            if let Some(cse) = &enc.aws_cse {
                set.push("storage.encryption.aws_cse");
                if cse.master_key.trim().is_empty() {
                    c.error(
                        "storage.encryption.aws_cse.master_key",
                        "master_key cannot be empty",
                    );
                }
            }
            if enc.aws_sse_s3.is_some() {
                set.push("storage.encryption.aws_sse_s3");
            }
            if let Some(kms) = &enc.aws_sse_kms {
                set.push("storage.encryption.aws_sse_kms");
                if kms.kms_key_id.as_ref().is_some_and(|k| k.trim().is_empty()) {
                    c.error(
                        "storage.encryption.aws_sse_kms.kms_key_id",
                        "kms_key_id cannot be empty when given",
                    );
                }
            }
            if enc.none.is_some() {
                set.push("storage.encryption.none");
            }
            Self::check_encryption(&set, c);
        }
    }

    fn validate_s3_compatible(s3c: &S3CompatibleStorage, c: &mut Collector) {
        Self::check_url(&s3c.url, StageKind::S3Compatible, c);

        match &s3c.endpoint {
            None => c.error(
                "storage.endpoint",
                "endpoint is required for s3_compatible stages",
            ),
            Some(endpoint) if endpoint.trim().is_empty() => {
                c.error("storage.endpoint", "endpoint cannot be empty");
            }
            Some(_) => {}
        }

        if let Some(creds) = &s3c.credentials {
            Self::check_aws_credentials(creds, false, c);
        }
    }

    fn validate_gcs(gcs: &GcsStorage, c: &mut Collector) {
        Self::check_url(&gcs.url, StageKind::Gcs, c);
        if let Some(integration) = &gcs.storage_integration {
            Self::check_integration(integration, c);
        }
        if let Some(enc) = &gcs.encryption {
            let mut set = Vec::new();
            if let Some(kms) = &enc.gcs_sse_kms {
                set.push("storage.encryption.gcs_sse_kms");
                if kms.kms_key_id.as_ref().is_some_and(|k| k.trim().is_empty()) {
                    c.error(
                        "storage.encryption.gcs_sse_kms.kms_key_id",
                        "kms_key_id cannot be empty when given",
                    );
                }
            }
            if enc.none.is_some() {
                set.push("storage.encryption.none");
            }
            Self::check_encryption(&set, c);
        }
    }

    fn validate_azure(azure: &AzureStorage, c: &mut Collector) {
        Self::check_url(&azure.url, StageKind::Azure, c);

        if azure.storage_integration.is_some() && azure.credentials.is_some() {
            c.exclusive(
                &["storage.storage_integration", "storage.credentials"],
                "storage_integration and credentials are mutually exclusive",
            );
        }
        if let Some(integration) = &azure.storage_integration {
            Self::check_integration(integration, c);
        }
        if let Some(creds) = &azure.credentials {
            if creds.azure_sas_token.trim().is_empty() {
                c.error(
                    "storage.credentials.azure_sas_token",
                    "azure_sas_token cannot be empty",
                );
            }
        }

        if let Some(enc) = &azure.encryption {
            let mut set = Vec::new();
            if let Some(cse) = &enc.azure_cse {
                set.push("storage.encryption.azure_cse");
                if cse.master_key.trim().is_empty() {
                    c.error(
                        "storage.encryption.azure_cse.master_key",
                        "master_key cannot be empty",
                    );
                }
            }
            if enc.none.is_some() {
                set.push("storage.encryption.none");
            }
            Self::check_encryption(&set, c);
        }
    }

    fn validate_directory(directory: &DirectoryConfig, kind: StageKind, c: &mut Collector) {
        if directory.auto_refresh == TriBool::True {
            if !directory.enable {
                c.error(
                    "directory.auto_refresh",
                    "auto_refresh requires directory.enable = true",
                );
            }
            if matches!(kind, StageKind::Internal | StageKind::S3Compatible) {
                c.error(
                    "directory.auto_refresh",
                    format!("auto_refresh is not supported for {kind} stages"),
                );
            }
        }
        if directory.refresh_on_create == TriBool::True && !directory.enable {
            c.error(
                "directory.refresh_on_create",
                "refresh_on_create requires directory.enable = true",
            );
        }
    }

    fn validate_file_format(file_format: &FileFormatConfig, c: &mut Collector) {
        match (&file_format.format_name, &file_format.csv) {
            (Some(_), Some(_)) => c.exclusive(
                &["file_format.format_name", "file_format.csv"],
                "format_name and an inline format are mutually exclusive",
            ),
            (None, None) => c.error(
                "file_format",
                "file_format must set either format_name or csv",
            ),
            (Some(name), None) => {
                if name.trim().is_empty() {
                    c.error("file_format.format_name", "format_name cannot be empty");
                }
            }
            (None, Some(csv)) => Self::validate_csv(csv, c),
        }
    }

    fn validate_csv(csv: &CsvFormat, c: &mut Collector) {
        if csv.skip_header.is_some_and(|n| n < 0) {
            c.error("file_format.csv.skip_header", "skip_header cannot be negative");
        }
        if csv.field_delimiter.as_ref().is_some_and(String::is_empty) {
            c.error(
                "file_format.csv.field_delimiter",
                "field_delimiter cannot be empty; use NONE",
            );
        }
        if csv.record_delimiter.as_ref().is_some_and(String::is_empty) {
            c.error(
                "file_format.csv.record_delimiter",
                "record_delimiter cannot be empty; use NONE",
            );
        }
    }

    fn check_url(url: &str, kind: StageKind, c: &mut Collector) {
        let Some(scheme) = kind.url_scheme() else {
            return;
        };
        if url.trim().is_empty() {
            c.error("storage.url", format!("url is required for {kind} stages"));
        } else if !url.to_ascii_lowercase().starts_with(scheme) {
            c.error(
                "storage.url",
                format!("url '{url}' must start with '{scheme}' for {kind} stages"),
            );
        }
    }

    fn check_integration(integration: &str, c: &mut Collector) {
        if !is_valid_identifier(integration) {
            c.error(
                "storage.storage_integration",
                format!("'{integration}' is not a valid integration name"),
            );
        }
    }

    fn check_encryption(set: &[&str], c: &mut Collector) {
        if set.len() > 1 {
            c.exclusive(set, "encryption sub-variants are mutually exclusive");
        }
    }

    fn check_aws_credentials(creds: &AwsCredentials, allow_role: bool, c: &mut Collector) {
        let has_keys = creds.aws_key_id.is_some() || creds.aws_secret_key.is_some();
        match (&creds.aws_role, has_keys) {
            (Some(_), _) if !allow_role => c.error(
                "storage.credentials.aws_role",
                "aws_role is not supported for s3_compatible stages",
            ),
            (Some(_), true) => c.exclusive(
                &["storage.credentials.aws_role", "storage.credentials.aws_key_id"],
                "aws_role and key-pair credentials are mutually exclusive",
            ),
            (Some(role), false) => {
                if role.trim().is_empty() {
                    c.error("storage.credentials.aws_role", "aws_role cannot be empty");
                }
            }
            (None, _) => {
                if creds.aws_key_id.as_ref().is_none_or(|k| k.trim().is_empty()) {
                    c.error("storage.credentials.aws_key_id", "aws_key_id is required");
                }
                if creds.aws_secret_key.as_ref().is_none_or(|k| k.trim().is_empty()) {
                    c.error(
                        "storage.credentials.aws_secret_key",
                        "aws_secret_key is required",
                    );
                }
            }
        }
    }
}

/// Returns true for a valid unquoted identifier or a non-empty double-quoted one.
#[must_use]
pub fn is_valid_identifier(ident: &str) -> bool {
    if ident.len() > MAX_IDENTIFIER_LEN {
        return false;
    }
    if ident.len() >= 2 && ident.starts_with('"') && ident.ends_with('"') {
        return ident.len() > 2;
    }
    let mut chars = ident.chars();
    chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '$')
}
