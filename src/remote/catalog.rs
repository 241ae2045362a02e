//! Stage catalog shared by the in-memory and file-backed stores.
//!
//! The catalog behaves like the warehouse from the engine's point of view:
//! it fills in defaults on create, reports identifiers in canonical case,
//! never echoes secrets back, and rejects alters the backend cannot apply in
//! place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::config::{
    DirectoryConfig, QualifiedName, StageDesiredState, StageKind, StageStorage, TriBool,
    normalize_identifier,
};
use crate::error::{RemoteError, RemoteResult};
use crate::normalize::{
    CSV_DEFAULTS, CanonicalValue, Normalizer, Section, default_encryption, documented_default,
    paths,
};
use crate::planner::AttributeChange;

use super::types::{
    DescribeProperty, RawStageData, ShowStageRow, StageIdentity, props,
};

/// Role reported as owner of every stage.
const DEFAULT_OWNER: &str = "SYSADMIN";

/// One stored stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Remote object id.
    pub object_id: String,
    /// Creation time.
    pub created_on: DateTime<Utc>,
    /// Owning role.
    pub owner: String,
    /// Stored configuration with secrets redacted.
    pub spec: StageDesiredState,
}

/// Stages keyed by canonical qualified name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Stored stages.
    #[serde(default)]
    pub stages: BTreeMap<String, CatalogEntry>,
}

fn key(name: &QualifiedName) -> String {
    name.normalized().to_string()
}

impl Catalog {
    /// Creates an empty catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            stages: BTreeMap::new(),
        }
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the catalog holds no stage.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Describes a stage.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] if no stage has that name.
    pub fn describe(&self, name: &QualifiedName) -> RemoteResult<RawStageData> {
        self.stages
            .get(&key(name))
            .map(render)
            .ok_or_else(|| RemoteError::not_found(name))
    }

    /// Creates a stage.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::AlreadyExists`] if the name is taken.
    pub fn create(&mut self, desired: &StageDesiredState) -> RemoteResult<StageIdentity> {
        let name = desired.qualified_name();
        let k = key(&name);
        if self.stages.contains_key(&k) {
            return Err(RemoteError::AlreadyExists { name: k });
        }
        check_directory(desired.kind(), desired.directory.as_ref())?;

        let object_id = Uuid::new_v4().to_string();
        debug!("Catalog: created {k} as {object_id}");
        self.stages.insert(
            k,
            CatalogEntry {
                object_id: object_id.clone(),
                created_on: Utc::now(),
                owner: String::from(DEFAULT_OWNER),
                spec: desired.redacted(),
            },
        );
        Ok(StageIdentity::new(object_id, name))
    }

    /// Applies changes to a stage atomically: either every change is applied or none.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] if the identity does not resolve and
    /// [`RemoteError::Rejected`] if a change cannot be applied in place.
    pub fn alter(
        &mut self,
        identity: &StageIdentity,
        desired: &StageDesiredState,
        changes: &[AttributeChange],
    ) -> RemoteResult<()> {
        let old_key = self.resolve(identity)?;
        let Some(entry) = self.stages.get(&old_key) else {
            return Err(RemoteError::not_found(&identity.name));
        };
        let mut spec = entry.spec.clone();
        let redacted = desired.redacted();

        for change in changes {
            apply_change(&mut spec, &redacted, change)?;
        }
        check_directory(spec.kind(), spec.directory.as_ref())?;

        let new_key = key(&spec.qualified_name());
        if new_key != old_key && self.stages.contains_key(&new_key) {
            return Err(RemoteError::AlreadyExists { name: new_key });
        }

        if let Some(mut entry) = self.stages.remove(&old_key) {
            entry.spec = spec;
            debug!("Catalog: altered {old_key} ({} change(s))", changes.len());
            self.stages.insert(new_key, entry);
        }
        Ok(())
    }

    /// Drops a stage.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::NotFound`] if the identity does not resolve.
    pub fn drop_stage(&mut self, identity: &StageIdentity) -> RemoteResult<()> {
        let k = self.resolve(identity)?;
        self.stages.remove(&k);
        debug!("Catalog: dropped {k}");
        Ok(())
    }

    /// Removes a stage without going through the engine.
    pub fn remove(&mut self, name: &QualifiedName) -> Option<CatalogEntry> {
        self.stages.remove(&key(name))
    }

    /// Mutates a stored stage without going through the engine.
    ///
    /// Returns false if the stage does not exist.
    pub fn mutate<F>(&mut self, name: &QualifiedName, f: F) -> bool
    where
        F: FnOnce(&mut StageDesiredState),
    {
        match self.stages.get_mut(&key(name)) {
            Some(entry) => {
                f(&mut entry.spec);
                true
            }
            None => false,
        }
    }

    /// Returns the catalog key of the stage an identity refers to.
    fn resolve(&self, identity: &StageIdentity) -> RemoteResult<String> {
        let k = key(&identity.name);
        match self.stages.get(&k) {
            Some(entry) if entry.object_id == identity.object_id => Ok(k),
            _ => Err(RemoteError::not_found(&identity.name)),
        }
    }
}

fn apply_change(
    spec: &mut StageDesiredState,
    desired: &StageDesiredState,
    change: &AttributeChange,
) -> RemoteResult<()> {
    let path = change.path.as_str();
    match path {
        paths::NAME => spec.name.clone_from(&desired.name),
        paths::DATABASE => spec.database.clone_from(&desired.database),
        paths::SCHEMA => spec.schema.clone_from(&desired.schema),
        paths::STORAGE_INTEGRATION | paths::CREDENTIALS | paths::USE_PRIVATELINK_ENDPOINT => {
            apply_external(&mut spec.storage, &desired.storage, path)?;
        }
        paths::DIRECTORY
        | paths::DIRECTORY_ENABLE
        | paths::DIRECTORY_AUTO_REFRESH
        | paths::DIRECTORY_REFRESH_ON_CREATE => {
            let wanted = desired.directory.clone().unwrap_or_default();
            let current = spec.directory.get_or_insert_with(DirectoryConfig::default);
            match path {
                paths::DIRECTORY_ENABLE => current.enable = wanted.enable,
                paths::DIRECTORY_AUTO_REFRESH => current.auto_refresh = wanted.auto_refresh,
                paths::DIRECTORY_REFRESH_ON_CREATE => {
                    current.refresh_on_create = wanted.refresh_on_create;
                }
                _ => *current = wanted,
            }
        }
        paths::COMMENT => spec.comment.clone_from(&desired.comment),
        _ if change.path.section() == Section::FileFormat => {
            spec.file_format.clone_from(&desired.file_format);
        }
        _ => {
            return Err(RemoteError::rejected(
                "alter",
                format!("{path} cannot be changed in place"),
            ));
        }
    }
    Ok(())
}

fn apply_external(
    current: &mut StageStorage,
    desired: &StageStorage,
    path: &str,
) -> RemoteResult<()> {
    match (current, desired) {
        (StageStorage::S3(cur), StageStorage::S3(want)) => match path {
            paths::STORAGE_INTEGRATION => cur.storage_integration.clone_from(&want.storage_integration),
            paths::CREDENTIALS => cur.credentials.clone_from(&want.credentials),
            _ => cur.use_privatelink_endpoint = want.use_privatelink_endpoint,
        },
        (StageStorage::S3Compatible(cur), StageStorage::S3Compatible(want))
            if path == paths::CREDENTIALS =>
        {
            cur.credentials.clone_from(&want.credentials);
        }
        (StageStorage::Gcs(cur), StageStorage::Gcs(want)) if path == paths::STORAGE_INTEGRATION => {
            cur.storage_integration.clone_from(&want.storage_integration);
        }
        (StageStorage::Azure(cur), StageStorage::Azure(want))
            if path != paths::USE_PRIVATELINK_ENDPOINT =>
        {
            if path == paths::STORAGE_INTEGRATION {
                cur.storage_integration.clone_from(&want.storage_integration);
            } else {
                cur.credentials.clone_from(&want.credentials);
            }
        }
        _ => {
            return Err(RemoteError::rejected(
                "alter",
                format!("{path} is not supported by this storage backend"),
            ));
        }
    }
    Ok(())
}

fn check_directory(kind: StageKind, directory: Option<&DirectoryConfig>) -> RemoteResult<()> {
    let Some(directory) = directory else {
        return Ok(());
    };
    if directory.auto_refresh == TriBool::True
        && (!directory.enable || matches!(kind, StageKind::Internal | StageKind::S3Compatible))
    {
        return Err(RemoteError::rejected(
            "alter",
            "AUTO_REFRESH requires an enabled directory on an external stage",
        ));
    }
    Ok(())
}

/// Renders a stored stage the way `SHOW` and `DESCRIBE` report it.
fn render(entry: &CatalogEntry) -> RawStageData {
    let spec = &entry.spec;
    let kind = spec.kind();
    let directory = spec.directory.clone().unwrap_or_default();

    let show = ShowStageRow {
        created_on: entry.created_on,
        name: normalize_identifier(&spec.name),
        database_name: normalize_identifier(&spec.database),
        schema_name: normalize_identifier(&spec.schema),
        url: spec.storage.url().unwrap_or_default().trim().to_string(),
        has_credentials: spec.storage.has_credentials(),
        has_encryption_key: has_master_key(&spec.storage),
        owner: entry.owner.clone(),
        comment: spec.comment.clone().unwrap_or_default(),
        region: None,
        stage_type: String::from(if kind.is_external() { "EXTERNAL" } else { "INTERNAL" }),
        cloud: kind.cloud().map(String::from),
        storage_integration: spec.storage.storage_integration().map(normalize_identifier),
        endpoint: match &spec.storage {
            StageStorage::S3Compatible(s) => s.endpoint.as_ref().map(|e| e.trim().to_lowercase()),
            _ => None,
        },
        owner_role_type: String::from("ROLE"),
        directory_enabled: directory.enable,
    };

    let view = Normalizer::desired(spec);
    let mut properties = Vec::new();

    if let Some(url) = spec.storage.url() {
        properties.push(DescribeProperty::new(
            props::STAGE_LOCATION,
            props::URL,
            props::STRING,
            url.trim(),
            "",
        ));
    }
    if let StageStorage::S3(s3) = &spec.storage {
        properties.push(DescribeProperty::boolean(
            props::PRIVATELINK,
            props::USE_PRIVATELINK_ENDPOINT,
            s3.use_privatelink_endpoint.resolve(false),
            false,
        ));
    }

    // A stage created without a directory block reports no directory group.
    if spec.directory.is_some() {
        properties.push(DescribeProperty::boolean(props::DIRECTORY, props::ENABLE, directory.enable, false));
        properties.push(DescribeProperty::boolean(
            props::DIRECTORY,
            props::AUTO_REFRESH,
            directory.auto_refresh.resolve(false),
            false,
        ));
        properties.push(DescribeProperty::boolean(
            props::DIRECTORY,
            props::REFRESH_ON_CREATE,
            directory.refresh_on_create.resolve(false),
            false,
        ));
    }

    let enc_type = view
        .get(paths::ENCRYPTION_TYPE)
        .and_then(CanonicalValue::as_text)
        .unwrap_or(default_encryption(kind))
        .to_string();
    if enc_type.ends_with("_KMS") {
        let kms = view
            .get(paths::ENCRYPTION_KMS_KEY_ID)
            .and_then(CanonicalValue::as_text)
            .unwrap_or_default();
        properties.push(DescribeProperty::new(props::STAGE_ENCRYPTION, props::KMS_KEY_ID, props::STRING, kms, ""));
    }
    properties.push(DescribeProperty::new(
        props::STAGE_ENCRYPTION,
        props::TYPE,
        props::STRING,
        &enc_type,
        default_encryption(kind),
    ));

    if let Some(CanonicalValue::Text(name)) = view.get(paths::FILE_FORMAT_NAME) {
        properties.push(DescribeProperty::new(props::STAGE_FILE_FORMAT, props::FORMAT_NAME, props::STRING, name, ""));
    } else {
        properties.push(DescribeProperty::new(props::STAGE_FILE_FORMAT, props::TYPE, props::STRING, "CSV", "CSV"));
        for (option, default) in CSV_DEFAULTS {
            let path = format!("{}{option}", paths::CSV_PREFIX);
            let default_value = default.to_value();
            let value = match view.get(&path) {
                Some(v) if !v.is_unset() => v.clone(),
                _ => documented_default(kind, &path).unwrap_or_else(|| default_value.clone()),
            };
            properties.push(property_row(&option.to_uppercase(), &value, &default_value));
        }
    }

    // Backends report options the engine does not manage.
    properties.push(DescribeProperty::new(
        "STAGE_COPY_OPTIONS",
        "ON_ERROR",
        props::STRING,
        "ABORT_STATEMENT",
        "ABORT_STATEMENT",
    ));

    RawStageData {
        object_id: entry.object_id.clone(),
        show,
        properties,
    }
}

fn property_row(name: &str, value: &CanonicalValue, default: &CanonicalValue) -> DescribeProperty {
    let parent = props::STAGE_FILE_FORMAT;
    match (value, default) {
        (CanonicalValue::Bool(v), CanonicalValue::Bool(d)) => DescribeProperty::boolean(parent, name, *v, *d),
        (CanonicalValue::List(v), CanonicalValue::List(d)) => DescribeProperty::list(parent, name, v, d),
        (CanonicalValue::Int(v), CanonicalValue::Int(d)) => {
            DescribeProperty::new(parent, name, props::INTEGER, &v.to_string(), &d.to_string())
        }
        (v, d) => DescribeProperty::new(
            parent,
            name,
            props::STRING,
            v.as_text().unwrap_or_default(),
            d.as_text().unwrap_or_default(),
        ),
    }
}

fn has_master_key(storage: &StageStorage) -> bool {
    match storage {
        StageStorage::S3(s) => s.encryption.as_ref().is_some_and(|e| e.aws_cse.is_some()),
        StageStorage::Azure(s) => s.encryption.as_ref().is_some_and(|e| e.azure_cse.is_some()),
        _ => false,
    }
}
