//! Documented backend defaults.
//!
//! An omitted optional value in the desired state equals the value the
//! backend fills in on create. The diff engine consults this table before
//! reporting a difference, so omitting a field never produces drift.

use crate::config::StageKind;

use super::canonical::{BlockPresence, CanonicalValue, paths};

/// Encryption type the backend applies to internal stages.
pub const INTERNAL_DEFAULT_ENCRYPTION: &str = "SNOWFLAKE_FULL";

/// Encryption type the backend applies to external stages.
pub const EXTERNAL_DEFAULT_ENCRYPTION: &str = "NONE";

/// Default inline file format type.
pub const DEFAULT_FORMAT_TYPE: &str = "CSV";

/// CSV option defaults: (option, default).
pub const CSV_DEFAULTS: &[(&str, CsvDefault)] = &[
    ("compression", CsvDefault::Text("AUTO")),
    ("empty_field_as_null", CsvDefault::Bool(true)),
    ("encoding", CsvDefault::Text("UTF8")),
    ("field_delimiter", CsvDefault::Text(",")),
    ("field_optionally_enclosed_by", CsvDefault::Text("NONE")),
    ("null_if", CsvDefault::List(&["\\N"])),
    ("record_delimiter", CsvDefault::Text("\\n")),
    ("skip_header", CsvDefault::Int(0)),
    ("trim_space", CsvDefault::Bool(false)),
];

/// A statically known CSV option default.
#[derive(Debug, Clone, Copy)]
pub enum CsvDefault {
    /// String default.
    Text(&'static str),
    /// Boolean default.
    Bool(bool),
    /// Integer default.
    Int(i64),
    /// List default.
    List(&'static [&'static str]),
}

impl CsvDefault {
    /// Converts to a canonical value.
    #[must_use]
    pub fn to_value(self) -> CanonicalValue {
        match self {
            Self::Text(s) => CanonicalValue::text(s),
            Self::Bool(b) => CanonicalValue::Bool(b),
            Self::Int(i) => CanonicalValue::Int(i),
            Self::List(items) => {
                CanonicalValue::List(items.iter().map(|s| (*s).to_string()).collect())
            }
        }
    }
}

/// Returns the default encryption type for a backend kind.
#[must_use]
pub const fn default_encryption(kind: StageKind) -> &'static str {
    match kind {
        StageKind::Internal => INTERNAL_DEFAULT_ENCRYPTION,
        _ => EXTERNAL_DEFAULT_ENCRYPTION,
    }
}

/// Returns the documented default of `path` for `kind`, if the backend fills one in.
#[must_use]
pub fn documented_default(kind: StageKind, path: &str) -> Option<CanonicalValue> {
    let value = match path {
        paths::COMMENT => CanonicalValue::text(""),
        paths::USE_PRIVATELINK_ENDPOINT
        | paths::DIRECTORY_ENABLE
        | paths::DIRECTORY_AUTO_REFRESH
        | paths::DIRECTORY_REFRESH_ON_CREATE => CanonicalValue::Bool(false),
        paths::DIRECTORY => CanonicalValue::Block(BlockPresence::Empty),
        paths::CREDENTIAL_METHOD => CanonicalValue::text("none"),
        paths::ENCRYPTION_TYPE => CanonicalValue::text(default_encryption(kind)),
        paths::FILE_FORMAT_KIND => CanonicalValue::text("inline"),
        paths::FILE_FORMAT_TYPE => CanonicalValue::text(DEFAULT_FORMAT_TYPE),
        other => {
            let option = other.strip_prefix(paths::CSV_PREFIX)?;
            return csv_default(option).map(CsvDefault::to_value);
        }
    };
    Some(value)
}

/// Looks up a CSV option default by option name.
#[must_use]
pub fn csv_default(option: &str) -> Option<CsvDefault> {
    CSV_DEFAULTS
        .iter()
        .find(|(name, _)| *name == option)
        .map(|(_, default)| *default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_default_depends_on_kind() {
        assert_eq!(
            documented_default(StageKind::Internal, paths::ENCRYPTION_TYPE),
            Some(CanonicalValue::text("SNOWFLAKE_FULL"))
        );
        assert_eq!(
            documented_default(StageKind::Gcs, paths::ENCRYPTION_TYPE),
            Some(CanonicalValue::text("NONE"))
        );
    }

    #[test]
    fn test_csv_defaults() {
        assert_eq!(
            documented_default(StageKind::S3, "file_format.csv.skip_header"),
            Some(CanonicalValue::Int(0))
        );
        assert_eq!(
            documented_default(StageKind::S3, "file_format.csv.null_if"),
            Some(CanonicalValue::List(vec![String::from("\\N")]))
        );
        assert_eq!(documented_default(StageKind::S3, "file_format.csv.bogus"), None);
    }

    #[test]
    fn test_no_default_for_identity() {
        assert_eq!(documented_default(StageKind::S3, paths::URL), None);
        assert_eq!(documented_default(StageKind::S3, paths::NAME), None);
    }
}
