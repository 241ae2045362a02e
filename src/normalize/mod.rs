//! Normalization of desired and observed stages into one canonical form.
//!
//! Both sides become a flat map from dotted attribute path to a typed value so
//! the diff engine can compare them attribute by attribute:
//! - identifiers are case-normalized
//! - tri-state booleans keep `default` distinct from `false`
//! - absent optional blocks become an explicit empty marker
//! - write-only secrets become SHA-256 fingerprints

mod canonical;
mod defaults;
mod desired;
mod observed;

pub use canonical::{
    AttributePath, BlockPresence, CanonicalStageView, CanonicalValue, Section, paths,
};
pub use defaults::{
    CSV_DEFAULTS, CsvDefault, DEFAULT_FORMAT_TYPE, EXTERNAL_DEFAULT_ENCRYPTION,
    INTERNAL_DEFAULT_ENCRYPTION, csv_default, default_encryption, documented_default,
};
pub use desired::method;
pub use observed::StageObservedState;

use crate::config::StageDesiredState;
use crate::error::Result;
use crate::remote::RawStageData;

/// Converts desired documents and remote payloads into canonical views.
#[derive(Debug, Default, Clone, Copy)]
pub struct Normalizer;

impl Normalizer {
    /// Normalizes a desired state.
    #[must_use]
    pub fn desired(stage: &StageDesiredState) -> CanonicalStageView {
        desired::view(stage)
    }

    /// Normalizes a remote describe/show payload.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidPayload`](crate::error::RemoteError::InvalidPayload)
    /// if the payload cannot be decoded.
    pub fn observed(raw: &RawStageData) -> Result<StageObservedState> {
        Ok(observed::decode(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AwsCredentials, CsvFormat, DirectoryConfig, FileFormatConfig, QualifiedName, S3Storage,
        StageKind, StageStorage, TriBool,
    };
    use crate::remote::{DescribeProperty, ShowStageRow, props};
    use chrono::Utc;

    fn show(url: &str, stage_type: &str) -> ShowStageRow {
        ShowStageRow {
            created_on: Utc::now(),
            name: String::from("LANDING"),
            database_name: String::from("ANALYTICS"),
            schema_name: String::from("RAW"),
            url: url.to_string(),
            has_credentials: false,
            has_encryption_key: false,
            owner: String::from("SYSADMIN"),
            comment: String::new(),
            region: None,
            stage_type: stage_type.to_string(),
            cloud: None,
            storage_integration: None,
            endpoint: None,
            owner_role_type: String::from("ROLE"),
            directory_enabled: false,
        }
    }

    #[test]
    fn test_desired_identifiers_are_case_normalized() {
        let stage = StageDesiredState::internal("analytics", "\"Raw\"", "landing");
        let view = Normalizer::desired(&stage);
        assert_eq!(view.get(paths::DATABASE), Some(&CanonicalValue::text("ANALYTICS")));
        assert_eq!(view.get(paths::SCHEMA), Some(&CanonicalValue::text("Raw")));
        assert_eq!(view.get(paths::NAME), Some(&CanonicalValue::text("LANDING")));
    }

    #[test]
    fn test_desired_absent_directory_is_empty_block() {
        let stage = StageDesiredState::internal("DB", "SC", "ST");
        let view = Normalizer::desired(&stage);
        assert_eq!(
            view.get(paths::DIRECTORY),
            Some(&CanonicalValue::Block(BlockPresence::Empty))
        );
        assert!(!view.contains(paths::DIRECTORY_ENABLE));
    }

    #[test]
    fn test_desired_tribool_is_preserved() {
        let stage = StageDesiredState::internal("DB", "SC", "ST").with_directory(Some(
            DirectoryConfig {
                enable: true,
                auto_refresh: TriBool::False,
                refresh_on_create: TriBool::Default,
            },
        ));
        let view = Normalizer::desired(&stage);
        assert_eq!(
            view.get(paths::DIRECTORY_AUTO_REFRESH),
            Some(&CanonicalValue::Tri(TriBool::False))
        );
        assert_eq!(
            view.get(paths::DIRECTORY_REFRESH_ON_CREATE),
            Some(&CanonicalValue::Tri(TriBool::Default))
        );
    }

    #[test]
    fn test_desired_credentials_become_fingerprint() {
        let stage = StageDesiredState::with_storage(
            "DB",
            "SC",
            "ST",
            StageStorage::S3(S3Storage {
                url: String::from("s3://b/"),
                credentials: Some(AwsCredentials {
                    aws_key_id: Some(String::from("AKIA")),
                    aws_secret_key: Some(String::from("topsecret")),
                    ..AwsCredentials::default()
                }),
                ..S3Storage::default()
            }),
        );
        let view = Normalizer::desired(&stage);
        assert_eq!(
            view.get(paths::CREDENTIAL_METHOD),
            Some(&CanonicalValue::text(method::CREDENTIALS))
        );
        let Some(CanonicalValue::Secret(fp)) = view.get(paths::CREDENTIALS) else {
            panic!("expected fingerprint");
        };
        assert!(!fp.contains("topsecret"));
        assert_eq!(view.secrets().len(), 1);
    }

    #[test]
    fn test_desired_inline_format_values() {
        let stage = StageDesiredState::internal("DB", "SC", "ST").with_file_format(Some(
            FileFormatConfig::inline(CsvFormat {
                compression: Some(String::from("gzip")),
                record_delimiter: Some(String::from("\n")),
                skip_header: Some(1),
                ..CsvFormat::default()
            }),
        ));
        let view = Normalizer::desired(&stage);
        assert_eq!(
            view.get("file_format.csv.compression"),
            Some(&CanonicalValue::text("GZIP"))
        );
        assert_eq!(
            view.get("file_format.csv.record_delimiter"),
            Some(&CanonicalValue::text("\\n"))
        );
        assert_eq!(view.get("file_format.csv.skip_header"), Some(&CanonicalValue::Int(1)));
        assert_eq!(view.get("file_format.csv.encoding"), Some(&CanonicalValue::Unset));
    }

    #[test]
    fn test_observed_decodes_properties_tolerantly() {
        let raw = RawStageData {
            object_id: String::from("obj-1"),
            show: ShowStageRow {
                storage_integration: Some(String::from("S3_INT")),
                ..show("s3://bucket/landing/", "EXTERNAL")
            },
            properties: vec![
                DescribeProperty::new("directory", "enable", "Boolean", "TRUE", "false"),
                DescribeProperty::new(props::STAGE_FILE_FORMAT, "NULL_IF", "List", "[\\N, NULL]", "[\\N]"),
                DescribeProperty::new(props::STAGE_FILE_FORMAT, "SKIP_HEADER", "Integer", "2", "0"),
                DescribeProperty::new("STAGE_COPY_OPTIONS", "ON_ERROR", "String", "ABORT", "ABORT"),
            ],
        };
        let observed = Normalizer::observed(&raw).unwrap();
        assert_eq!(observed.kind, StageKind::S3);
        assert_eq!(observed.cloud.as_deref(), Some("AWS"));
        assert!(observed.directory_enabled());
        assert!(!observed.has_directory_empty());
        assert_eq!(
            observed.attribute(paths::CREDENTIAL_METHOD),
            Some(&CanonicalValue::text(method::STORAGE_INTEGRATION))
        );
        assert_eq!(
            observed.attribute("file_format.csv.null_if"),
            Some(&CanonicalValue::List(vec![String::from("\\N"), String::from("NULL")]))
        );
        assert_eq!(
            observed.attribute("file_format.csv.skip_header"),
            Some(&CanonicalValue::Int(2))
        );
        assert_eq!(
            observed.attribute(paths::ENCRYPTION_TYPE),
            Some(&CanonicalValue::text("NONE"))
        );
    }

    #[test]
    fn test_observed_internal_defaults() {
        let raw = RawStageData {
            object_id: String::from("obj-2"),
            show: show("", "INTERNAL"),
            properties: Vec::new(),
        };
        let observed = Normalizer::observed(&raw).unwrap();
        assert_eq!(observed.kind, StageKind::Internal);
        assert!(observed.has_directory_empty());
        assert_eq!(observed.name, QualifiedName::new("ANALYTICS", "RAW", "LANDING"));
        assert_eq!(
            observed.attribute(paths::ENCRYPTION_TYPE),
            Some(&CanonicalValue::text("SNOWFLAKE_FULL"))
        );
    }

    #[test]
    fn test_observed_rejects_unknown_scheme() {
        let raw = RawStageData {
            object_id: String::from("obj-3"),
            show: show("ftp://host/", "EXTERNAL"),
            properties: Vec::new(),
        };
        assert!(Normalizer::observed(&raw).is_err());
    }

    #[test]
    fn test_observed_rejects_bad_boolean() {
        let raw = RawStageData {
            object_id: String::from("obj-4"),
            show: show("", "INTERNAL"),
            properties: vec![DescribeProperty::new("DIRECTORY", "ENABLE", "Boolean", "yes", "false")],
        };
        assert!(Normalizer::observed(&raw).is_err());
    }
}
