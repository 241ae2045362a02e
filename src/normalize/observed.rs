//! Canonical view of a remote describe/show payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::{QualifiedName, StageKind};
use crate::error::RemoteError;
use crate::remote::{DescribeProperty, RawStageData, StageIdentity, decode_list, props};

use super::canonical::{BlockPresence, CanonicalStageView, CanonicalValue, paths};
use super::defaults::{CSV_DEFAULTS, CsvDefault, DEFAULT_FORMAT_TYPE, default_encryption};
use super::desired::{escape_control, method};

/// Observed state of a stage: the canonical view plus remote-only fields.
///
/// Never mutated by the engine; a fresh read replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageObservedState {
    /// Remote object id.
    pub object_id: String,
    /// Qualified name as reported by the remote.
    pub name: QualifiedName,
    /// Backend kind derived from the stage type and URL scheme.
    pub kind: StageKind,
    /// Creation time.
    pub created_on: DateTime<Utc>,
    /// Owning role.
    pub owner: String,
    /// Owner role type.
    pub owner_role_type: String,
    /// Cloud provider (computed for external stages).
    pub cloud: Option<String>,
    /// `INTERNAL` or `EXTERNAL`.
    pub stage_type: String,
    /// Canonical attributes.
    pub view: CanonicalStageView,
}

impl StageObservedState {
    /// Returns true when the remote reports no directory block.
    #[must_use]
    pub fn has_directory_empty(&self) -> bool {
        matches!(
            self.view.get(paths::DIRECTORY),
            None | Some(CanonicalValue::Block(BlockPresence::Empty))
        )
    }

    /// Returns the observed `directory.enable` value.
    #[must_use]
    pub fn directory_enabled(&self) -> bool {
        self.view
            .get(paths::DIRECTORY_ENABLE)
            .and_then(CanonicalValue::as_bool)
            .unwrap_or(false)
    }

    /// Returns the observed value of an attribute.
    #[must_use]
    pub fn attribute(&self, path: &str) -> Option<&CanonicalValue> {
        self.view.get(path)
    }

    /// Returns an identity for this object without secret fingerprints.
    #[must_use]
    pub fn identity(&self) -> StageIdentity {
        StageIdentity::new(self.object_id.clone(), self.name.clone())
    }

    /// Returns a copy whose view carries the given secret fingerprints.
    ///
    /// The remote never reports secrets; the fingerprints recorded when they
    /// were last applied stand in for them.
    #[must_use]
    pub fn with_fingerprints(&self, fingerprints: &BTreeMap<String, String>) -> Self {
        let mut observed = self.clone();
        for (path, fp) in fingerprints {
            observed
                .view
                .insert(path, CanonicalValue::Secret(fp.clone()));
        }
        observed
    }
}

pub(super) fn decode(raw: &RawStageData) -> Result<StageObservedState, RemoteError> {
    let name = raw.qualified_name();
    let kind = stage_kind(raw)?;
    let mut view = CanonicalStageView::new(kind);

    view.insert(paths::DATABASE, CanonicalValue::text(&raw.show.database_name));
    view.insert(paths::SCHEMA, CanonicalValue::text(&raw.show.schema_name));
    view.insert(paths::NAME, CanonicalValue::text(&raw.show.name));
    view.insert(paths::STAGE_KIND, CanonicalValue::text(kind.as_str()));

    backend(raw, kind, &mut view)?;
    directory(raw, &mut view)?;
    encryption(raw, kind, &mut view);
    file_format(raw, &name, &mut view)?;
    view.insert(paths::COMMENT, CanonicalValue::text(&raw.show.comment));

    for property in &raw.properties {
        if !is_known(property) {
            debug!(
                "Ignoring unknown property {}.{} on {}",
                property.parent_property, property.property, name
            );
        }
    }

    Ok(StageObservedState {
        object_id: raw.object_id.clone(),
        cloud: raw
            .show
            .cloud
            .clone()
            .or_else(|| kind.cloud().map(String::from)),
        stage_type: raw.show.stage_type.to_uppercase(),
        created_on: raw.show.created_on,
        owner: raw.show.owner.clone(),
        owner_role_type: raw.show.owner_role_type.clone(),
        name,
        kind,
        view,
    })
}

fn stage_kind(raw: &RawStageData) -> Result<StageKind, RemoteError> {
    let url = raw.show.url.trim().to_ascii_lowercase();
    if raw.show.stage_type.eq_ignore_ascii_case("INTERNAL") || url.is_empty() {
        return Ok(StageKind::Internal);
    }
    [
        StageKind::S3Compatible,
        StageKind::S3,
        StageKind::Gcs,
        StageKind::Azure,
    ]
    .into_iter()
    .find(|kind| kind.url_scheme().is_some_and(|scheme| url.starts_with(scheme)))
    .ok_or_else(|| RemoteError::InvalidPayload {
        name: raw.qualified_name().to_string(),
        message: format!("unrecognized location scheme in '{}'", raw.show.url),
    })
}

fn backend(
    raw: &RawStageData,
    kind: StageKind,
    view: &mut CanonicalStageView,
) -> Result<(), RemoteError> {
    if !kind.is_external() {
        return Ok(());
    }
    view.insert(paths::URL, CanonicalValue::text(raw.show.url.trim()));

    if kind == StageKind::S3Compatible {
        if let Some(endpoint) = &raw.show.endpoint {
            view.insert(paths::ENDPOINT, CanonicalValue::text(endpoint.trim().to_lowercase()));
        }
    }

    let integration = raw
        .show
        .storage_integration
        .as_deref()
        .filter(|s| !s.trim().is_empty());
    let method = match integration {
        Some(name) => {
            view.insert(paths::STORAGE_INTEGRATION, CanonicalValue::text(name));
            method::STORAGE_INTEGRATION
        }
        None if raw.show.has_credentials => method::CREDENTIALS,
        None => method::NONE,
    };
    view.insert(paths::CREDENTIAL_METHOD, CanonicalValue::text(method));

    if kind == StageKind::S3 {
        if let Some(p) = raw.property(props::PRIVATELINK, props::USE_PRIVATELINK_ENDPOINT) {
            view.insert(paths::USE_PRIVATELINK_ENDPOINT, CanonicalValue::Bool(parse_bool(raw, p)?));
        }
    }
    Ok(())
}

fn directory(raw: &RawStageData, view: &mut CanonicalStageView) -> Result<(), RemoteError> {
    let enable = match raw.property(props::DIRECTORY, props::ENABLE) {
        Some(p) => parse_bool(raw, p)?,
        None => raw.show.directory_enabled,
    };
    let auto_refresh = match raw.property(props::DIRECTORY, props::AUTO_REFRESH) {
        Some(p) => parse_bool(raw, p)?,
        None => false,
    };
    let refresh_on_create = raw
        .property(props::DIRECTORY, props::REFRESH_ON_CREATE)
        .map(|p| parse_bool(raw, p))
        .transpose()?;

    // The block exists when the backend reports it, even fully disabled.
    let present = raw.has_group(props::DIRECTORY) || enable;
    view.insert(
        paths::DIRECTORY,
        CanonicalValue::Block(if present {
            BlockPresence::Present
        } else {
            BlockPresence::Empty
        }),
    );
    view.insert(paths::DIRECTORY_ENABLE, CanonicalValue::Bool(enable));
    view.insert(paths::DIRECTORY_AUTO_REFRESH, CanonicalValue::Bool(auto_refresh));
    if let Some(value) = refresh_on_create {
        view.insert(paths::DIRECTORY_REFRESH_ON_CREATE, CanonicalValue::Bool(value));
    }
    Ok(())
}

fn encryption(raw: &RawStageData, kind: StageKind, view: &mut CanonicalStageView) {
    let enc_type = raw
        .property(props::STAGE_ENCRYPTION, props::TYPE)
        .map(|p| p.property_value.trim().to_uppercase())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| default_encryption(kind).to_string());

    if enc_type.ends_with("_KMS") {
        let key = raw
            .property(props::STAGE_ENCRYPTION, props::KMS_KEY_ID)
            .map(|p| p.property_value.trim())
            .filter(|k| !k.is_empty());
        view.insert(
            paths::ENCRYPTION_KMS_KEY_ID,
            key.map_or(CanonicalValue::Unset, |k| CanonicalValue::text(k)),
        );
    }
    view.insert(paths::ENCRYPTION_TYPE, CanonicalValue::Text(enc_type));
}

fn file_format(
    raw: &RawStageData,
    name: &QualifiedName,
    view: &mut CanonicalStageView,
) -> Result<(), RemoteError> {
    let format_name = raw
        .property(props::STAGE_FILE_FORMAT, props::FORMAT_NAME)
        .map(|p| p.property_value.trim())
        .filter(|v| !v.is_empty());

    if let Some(format_name) = format_name {
        view.insert(paths::FILE_FORMAT_KIND, CanonicalValue::text("named"));
        view.insert(paths::FILE_FORMAT_NAME, CanonicalValue::text(format_name));
        return Ok(());
    }

    view.insert(paths::FILE_FORMAT_KIND, CanonicalValue::text("inline"));
    let format_type = raw
        .property(props::STAGE_FILE_FORMAT, props::TYPE)
        .map_or_else(|| DEFAULT_FORMAT_TYPE.to_string(), |p| p.property_value.trim().to_uppercase());
    view.insert(paths::FILE_FORMAT_TYPE, CanonicalValue::Text(format_type));

    for (option, default) in CSV_DEFAULTS {
        let Some(p) = raw.property(props::STAGE_FILE_FORMAT, &option.to_uppercase()) else {
            continue;
        };
        let value = match default {
            CsvDefault::Bool(_) => CanonicalValue::Bool(parse_bool(raw, p)?),
            CsvDefault::Int(_) => {
                CanonicalValue::Int(p.property_value.trim().parse().map_err(|e| {
                    RemoteError::InvalidPayload {
                        name: name.to_string(),
                        message: format!("{} is not an integer: {e}", p.property),
                    }
                })?)
            }
            CsvDefault::List(_) => CanonicalValue::List(decode_list(&p.property_value)),
            CsvDefault::Text(_) => CanonicalValue::Text(csv_text(option, &p.property_value)),
        };
        view.insert(&format!("{}{option}", paths::CSV_PREFIX), value);
    }
    Ok(())
}

fn csv_text(option: &str, value: &str) -> String {
    match option {
        "compression" | "encoding" => value.trim().to_uppercase(),
        "field_optionally_enclosed_by" if value.trim().eq_ignore_ascii_case("none") => {
            String::from("NONE")
        }
        _ => escape_control(value),
    }
}

fn parse_bool(raw: &RawStageData, p: &DescribeProperty) -> Result<bool, RemoteError> {
    match p.property_value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        other => Err(RemoteError::InvalidPayload {
            name: raw.qualified_name().to_string(),
            message: format!("{} is not a boolean: '{other}'", p.property),
        }),
    }
}

fn is_known(p: &DescribeProperty) -> bool {
    let parent = p.parent_property.to_ascii_uppercase();
    let property = p.property.to_ascii_uppercase();
    match parent.as_str() {
        props::STAGE_LOCATION => property == props::URL,
        props::PRIVATELINK => property == props::USE_PRIVATELINK_ENDPOINT,
        props::DIRECTORY => [props::ENABLE, props::AUTO_REFRESH, props::REFRESH_ON_CREATE]
            .contains(&property.as_str()),
        props::STAGE_ENCRYPTION => property == props::TYPE || property == props::KMS_KEY_ID,
        props::STAGE_FILE_FORMAT => {
            property == props::FORMAT_NAME
                || property == props::TYPE
                || CSV_DEFAULTS
                    .iter()
                    .any(|(option, _)| option.eq_ignore_ascii_case(&property))
        }
        _ => false,
    }
}
