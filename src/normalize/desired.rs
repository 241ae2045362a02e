//! Canonical view of a desired state.

use crate::config::{
    AwsCredentials, ConfigHasher, CsvFormat, FileFormatConfig, StageDesiredState, StageStorage,
    TriBool, normalize_identifier,
};

use super::canonical::{BlockPresence, CanonicalStageView, CanonicalValue, paths};
use super::defaults::DEFAULT_FORMAT_TYPE;

/// Credential method names used on the `credential_method` path.
pub mod method {
    /// No credentials (public bucket or internal stage).
    pub const NONE: &str = "none";
    /// Storage integration reference.
    pub const STORAGE_INTEGRATION: &str = "storage_integration";
    /// Inline credentials.
    pub const CREDENTIALS: &str = "credentials";
}

pub(super) fn view(stage: &StageDesiredState) -> CanonicalStageView {
    let kind = stage.kind();
    let mut view = CanonicalStageView::new(kind);

    view.insert(paths::DATABASE, CanonicalValue::Text(normalize_identifier(&stage.database)));
    view.insert(paths::SCHEMA, CanonicalValue::Text(normalize_identifier(&stage.schema)));
    view.insert(paths::NAME, CanonicalValue::Text(normalize_identifier(&stage.name)));
    view.insert(paths::STAGE_KIND, CanonicalValue::text(kind.as_str()));

    storage(&stage.storage, &mut view);
    directory(stage, &mut view);
    file_format(stage.file_format.as_ref(), &mut view);

    view.insert(
        paths::COMMENT,
        stage
            .comment
            .as_ref()
            .map_or(CanonicalValue::Unset, |c| CanonicalValue::text(c.clone())),
    );

    view
}

fn storage(storage: &StageStorage, view: &mut CanonicalStageView) {
    if let Some(url) = storage.url() {
        view.insert(paths::URL, CanonicalValue::text(url.trim()));
    }

    match storage {
        StageStorage::Internal(internal) => {
            let enc = internal.encryption.as_ref().and_then(|e| {
                if e.snowflake_full.is_some() {
                    Some("SNOWFLAKE_FULL")
                } else if e.snowflake_sse.is_some() {
                    Some("SNOWFLAKE_SSE")
                } else {
                    None
                }
            });
            encryption_type(enc, view);
        }
        StageStorage::S3(s3) => {
            credential_method(s3.storage_integration.as_deref(), s3.credentials.is_some(), view);
            if let Some(creds) = &s3.credentials {
                aws_credentials(creds, view);
            }
            view.insert(
                paths::USE_PRIVATELINK_ENDPOINT,
                CanonicalValue::Tri(s3.use_privatelink_endpoint),
            );

            let enc = s3.encryption.as_ref();
            if let Some(cse) = enc.and_then(|e| e.aws_cse.as_ref()) {
                encryption_type(Some("AWS_CSE"), view);
                master_key(&cse.master_key, view);
            } else if enc.is_some_and(|e| e.aws_sse_s3.is_some()) {
                encryption_type(Some("AWS_SSE_S3"), view);
            } else if let Some(kms) = enc.and_then(|e| e.aws_sse_kms.as_ref()) {
                encryption_type(Some("AWS_SSE_KMS"), view);
                kms_key(kms.kms_key_id.as_deref(), view);
            } else if enc.is_some_and(|e| e.none.is_some()) {
                encryption_type(Some("NONE"), view);
            } else {
                encryption_type(None, view);
            }
        }
        StageStorage::S3Compatible(s3c) => {
            if let Some(endpoint) = &s3c.endpoint {
                view.insert(paths::ENDPOINT, CanonicalValue::text(endpoint.trim().to_lowercase()));
            }
            credential_method(None, s3c.credentials.is_some(), view);
            if let Some(creds) = &s3c.credentials {
                aws_credentials(creds, view);
            }
            encryption_type(None, view);
        }
        StageStorage::Gcs(gcs) => {
            credential_method(gcs.storage_integration.as_deref(), false, view);
            let enc = gcs.encryption.as_ref();
            if let Some(kms) = enc.and_then(|e| e.gcs_sse_kms.as_ref()) {
                encryption_type(Some("GCS_SSE_KMS"), view);
                kms_key(kms.kms_key_id.as_deref(), view);
            } else if enc.is_some_and(|e| e.none.is_some()) {
                encryption_type(Some("NONE"), view);
            } else {
                encryption_type(None, view);
            }
        }
        StageStorage::Azure(azure) => {
            credential_method(
                azure.storage_integration.as_deref(),
                azure.credentials.is_some(),
                view,
            );
            if let Some(creds) = &azure.credentials {
                let fp = ConfigHasher::fingerprint(paths::CREDENTIALS, &creds.azure_sas_token);
                view.insert(paths::CREDENTIALS, CanonicalValue::Secret(fp));
            }
            let enc = azure.encryption.as_ref();
            if let Some(cse) = enc.and_then(|e| e.azure_cse.as_ref()) {
                encryption_type(Some("AZURE_CSE"), view);
                master_key(&cse.master_key, view);
            } else if enc.is_some_and(|e| e.none.is_some()) {
                encryption_type(Some("NONE"), view);
            } else {
                encryption_type(None, view);
            }
        }
    }
}

/// Records the method choice; the integration name is only managed when set.
fn credential_method(integration: Option<&str>, has_credentials: bool, view: &mut CanonicalStageView) {
    let method = match (integration, has_credentials) {
        (Some(name), _) => {
            view.insert(
                paths::STORAGE_INTEGRATION,
                CanonicalValue::Text(normalize_identifier(name)),
            );
            method::STORAGE_INTEGRATION
        }
        (None, true) => method::CREDENTIALS,
        (None, false) => method::NONE,
    };
    view.insert(paths::CREDENTIAL_METHOD, CanonicalValue::text(method));
}

fn aws_credentials(creds: &AwsCredentials, view: &mut CanonicalStageView) {
    let material = [
        creds.aws_key_id.as_deref(),
        creds.aws_secret_key.as_deref(),
        creds.aws_token.as_deref(),
        creds.aws_role.as_deref(),
    ]
    .map(|part| part.unwrap_or_default())
    .join("\u{0}");
    let fp = ConfigHasher::fingerprint(paths::CREDENTIALS, &material);
    view.insert(paths::CREDENTIALS, CanonicalValue::Secret(fp));
}

fn encryption_type(kind: Option<&str>, view: &mut CanonicalStageView) {
    view.insert(
        paths::ENCRYPTION_TYPE,
        kind.map_or(CanonicalValue::Unset, |k| CanonicalValue::text(k)),
    );
}

fn master_key(key: &str, view: &mut CanonicalStageView) {
    let fp = ConfigHasher::fingerprint(paths::ENCRYPTION_MASTER_KEY, key);
    view.insert(paths::ENCRYPTION_MASTER_KEY, CanonicalValue::Secret(fp));
}

fn kms_key(key: Option<&str>, view: &mut CanonicalStageView) {
    view.insert(
        paths::ENCRYPTION_KMS_KEY_ID,
        key.map_or(CanonicalValue::Unset, |k| CanonicalValue::text(k.trim())),
    );
}

fn directory(stage: &StageDesiredState, view: &mut CanonicalStageView) {
    let Some(directory) = &stage.directory else {
        view.insert(paths::DIRECTORY, CanonicalValue::Block(BlockPresence::Empty));
        return;
    };
    view.insert(paths::DIRECTORY, CanonicalValue::Block(BlockPresence::Present));
    view.insert(paths::DIRECTORY_ENABLE, CanonicalValue::Bool(directory.enable));
    view.insert(paths::DIRECTORY_AUTO_REFRESH, CanonicalValue::Tri(directory.auto_refresh));
    view.insert(
        paths::DIRECTORY_REFRESH_ON_CREATE,
        CanonicalValue::Tri(directory.refresh_on_create),
    );
}

fn file_format(file_format: Option<&FileFormatConfig>, view: &mut CanonicalStageView) {
    match file_format {
        Some(FileFormatConfig {
            format_name: Some(name),
            ..
        }) => {
            view.insert(paths::FILE_FORMAT_KIND, CanonicalValue::text("named"));
            view.insert(
                paths::FILE_FORMAT_NAME,
                CanonicalValue::Text(normalize_format_name(name)),
            );
        }
        Some(FileFormatConfig { csv: Some(csv), .. }) => {
            view.insert(paths::FILE_FORMAT_KIND, CanonicalValue::text("inline"));
            view.insert(paths::FILE_FORMAT_TYPE, CanonicalValue::text(DEFAULT_FORMAT_TYPE));
            csv_options(csv, view);
        }
        _ => {
            view.insert(paths::FILE_FORMAT_KIND, CanonicalValue::Unset);
            view.insert(paths::FILE_FORMAT_TYPE, CanonicalValue::Unset);
            csv_options(&CsvFormat::default(), view);
        }
    }
}

fn csv_options(csv: &CsvFormat, view: &mut CanonicalStageView) {
    let text = |value: &Option<String>, f: fn(&str) -> String| {
        value
            .as_deref()
            .map_or(CanonicalValue::Unset, |v| CanonicalValue::Text(f(v)))
    };
    let tri = |value: TriBool| value.explicit().map_or(CanonicalValue::Unset, CanonicalValue::Bool);

    let options = [
        ("compression", text(&csv.compression, upper)),
        ("record_delimiter", text(&csv.record_delimiter, escape_control)),
        ("field_delimiter", text(&csv.field_delimiter, escape_control)),
        (
            "skip_header",
            csv.skip_header.map_or(CanonicalValue::Unset, CanonicalValue::Int),
        ),
        (
            "field_optionally_enclosed_by",
            text(&csv.field_optionally_enclosed_by, enclosure),
        ),
        ("trim_space", tri(csv.trim_space)),
        (
            "null_if",
            csv.null_if
                .clone()
                .map_or(CanonicalValue::Unset, CanonicalValue::List),
        ),
        ("empty_field_as_null", tri(csv.empty_field_as_null)),
        ("encoding", text(&csv.encoding, upper)),
    ];
    for (option, value) in options {
        view.insert(&format!("{}{option}", paths::CSV_PREFIX), value);
    }
}

fn upper(value: &str) -> String {
    value.trim().to_uppercase()
}

fn enclosure(value: &str) -> String {
    if value.trim().eq_ignore_ascii_case("none") {
        String::from("NONE")
    } else {
        value.to_string()
    }
}

/// Spells control characters the way the backend prints them.
pub(crate) fn escape_control(value: &str) -> String {
    value
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

/// Normalizes a possibly qualified file format name part by part.
///
/// Dots inside double-quoted parts belong to the identifier.
pub(crate) fn normalize_format_name(name: &str) -> String {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in name.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '.' if !quoted => {
                parts.push(normalize_identifier(&name[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(normalize_identifier(&name[start..]));
    parts.join(".")
}
