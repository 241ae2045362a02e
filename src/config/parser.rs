//! Manifest parser: YAML loading, `.env` support, secret references and
//! environment overrides.

use crate::error::{ConfigError, Result, StageError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{AwsCredentials, StageManifest, StageStorage};

/// Environment variable overriding `state.path`.
pub const ENV_STATE_PATH: &str = "STAGECTL_STATE_PATH";

/// Environment variable overriding `remote.path`.
pub const ENV_REMOTE_PATH: &str = "STAGECTL_REMOTE_PATH";

/// Manifest parser.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StageManifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(StageError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StageError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StageManifest> {
        debug!("Parsing YAML manifest");

        let manifest: StageManifest = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StageError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!("Parsed manifest with {} stage(s)", manifest.stages.len());
        Ok(manifest)
    }

    /// Loads a manifest, resolves `${VAR}` secret references and applies
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or a referenced variable is unset.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StageManifest> {
        let mut manifest = self.load_file(path)?;
        Self::resolve_secrets(&mut manifest, |name| std::env::var(name).ok())?;
        Self::apply_env_overrides(&mut manifest);
        Ok(manifest)
    }

    /// Replaces `${VAR}` references in secret fields using `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] for the first unresolved reference.
    pub fn resolve_secrets<F>(manifest: &mut StageManifest, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for stage in &mut manifest.stages {
            match &mut stage.storage {
                StageStorage::S3(s3) => {
                    if let Some(creds) = &mut s3.credentials {
                        resolve_aws(creds, &lookup)?;
                    }
                    if let Some(cse) = s3.encryption.as_mut().and_then(|e| e.aws_cse.as_mut()) {
                        resolve_value(&mut cse.master_key, &lookup)?;
                    }
                }
                StageStorage::S3Compatible(s3c) => {
                    if let Some(creds) = &mut s3c.credentials {
                        resolve_aws(creds, &lookup)?;
                    }
                }
                StageStorage::Azure(azure) => {
                    if let Some(creds) = &mut azure.credentials {
                        resolve_value(&mut creds.azure_sas_token, &lookup)?;
                    }
                    if let Some(cse) = azure.encryption.as_mut().and_then(|e| e.azure_cse.as_mut())
                    {
                        resolve_value(&mut cse.master_key, &lookup)?;
                    }
                }
                StageStorage::Internal(_) | StageStorage::Gcs(_) => {}
            }
        }
        Ok(())
    }

    /// Applies environment variable overrides to the manifest.
    fn apply_env_overrides(manifest: &mut StageManifest) {
        if let Ok(path) = std::env::var(ENV_STATE_PATH) {
            debug!("Overriding state.path from environment");
            manifest.state.path = Some(path);
        }

        if let Ok(path) = std::env::var(ENV_REMOTE_PATH) {
            debug!("Overriding remote.path from environment");
            manifest.remote.path = Some(path);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StageError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn resolve_aws<F>(creds: &mut AwsCredentials, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    for value in [
        creds.aws_key_id.as_mut(),
        creds.aws_secret_key.as_mut(),
        creds.aws_token.as_mut(),
    ]
    .into_iter()
    .flatten()
    {
        resolve_value(value, lookup)?;
    }
    Ok(())
}

/// Resolves a whole-value `${VAR}` reference in place.
fn resolve_value<F>(value: &mut String, lookup: &F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let trimmed = value.trim();
    let Some(name) = trimmed
        .strip_prefix("${")
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Ok(());
    };

    match lookup(name) {
        Some(resolved) => {
            *value = resolved;
            Ok(())
        }
        None => Err(StageError::Config(ConfigError::MissingEnvVar {
            name: name.to_string(),
        })),
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "stagectl.yaml",
    "stagectl.yml",
    "stages.yaml",
    "stages.yml",
];

/// Finds the manifest in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found manifest: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StageError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{RemoteBackend, ReplaceStrategy, StageKind};

    #[test]
    fn test_parse_minimal_manifest() {
        let yaml = r"
stages:
  - database: DB
    schema: SC
    name: ST
    storage:
      type: internal
";
        let parser = ConfigParser::new();
        let manifest = parser.parse_yaml(yaml, None).unwrap();
        assert_eq!(manifest.stages.len(), 1);
        assert_eq!(manifest.stages[0].kind(), StageKind::Internal);
        assert_eq!(manifest.remote.backend, RemoteBackend::File);
        assert!(manifest.reconcile.allow_identifier_move);
        assert_eq!(
            manifest.reconcile.replace_strategy,
            ReplaceStrategy::DropThenCreate
        );
    }

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
state:
  path: .state
remote:
  backend: file
  path: .state/catalog.json
reconcile:
  replace_strategy: create_then_drop
  allow_identifier_move: false
stages:
  - id: landing
    database: ANALYTICS
    schema: RAW
    name: LANDING
    storage:
      type: s3
      url: s3://bucket/landing/
      credentials:
        aws_key_id: AKIAEXAMPLE
        aws_secret_key: ${LANDING_SECRET}
      encryption:
        aws_sse_kms:
          kms_key_id: alias/landing
    directory:
      enable: true
    file_format:
      csv:
        skip_header: 1
        null_if: ["", "NULL"]
    comment: landing zone
  - database: ANALYTICS
    schema: RAW
    name: EVENTS
    storage:
      type: gcs
      url: gcs://events/
      storage_integration: GCS_INT
"#;
        let parser = ConfigParser::new();
        let mut manifest = parser.parse_yaml(yaml, None).unwrap();
        assert_eq!(manifest.stages.len(), 2);
        assert_eq!(manifest.reconcile.replace_strategy, ReplaceStrategy::CreateThenDrop);
        assert!(!manifest.reconcile.allow_identifier_move);

        ConfigParser::resolve_secrets(&mut manifest, |name| {
            (name == "LANDING_SECRET").then(|| String::from("resolved"))
        })
        .unwrap();
        let StageStorage::S3(s3) = &manifest.stages[0].storage else {
            panic!("expected s3 storage");
        };
        let secret = s3.credentials.as_ref().and_then(|c| c.aws_secret_key.as_deref());
        assert_eq!(secret, Some("resolved"));
    }

    #[test]
    fn test_missing_secret_variable() {
        let yaml = r"
stages:
  - database: DB
    schema: SC
    name: ST
    storage:
      type: azure
      url: azure://acct.blob.core.windows.net/c/
      credentials:
        azure_sas_token: ${MISSING_TOKEN}
";
        let parser = ConfigParser::new();
        let mut manifest = parser.parse_yaml(yaml, None).unwrap();
        let err = ConfigParser::resolve_secrets(&mut manifest, |_| None).unwrap_err();
        assert!(matches!(
            err,
            StageError::Config(ConfigError::MissingEnvVar { ref name }) if name == "MISSING_TOKEN"
        ));
    }

    #[test]
    fn test_unknown_storage_type_is_parse_error() {
        let yaml = r"
stages:
  - database: DB
    schema: SC
    name: ST
    storage:
      type: ftp
";
        let parser = ConfigParser::new();
        assert!(parser.parse_yaml(yaml, None).is_err());
    }

    #[test]
    fn test_init_template_is_valid() {
        let parser = ConfigParser::new();
        let mut manifest = parser
            .parse_yaml(include_str!("../../templates/stagectl.yaml"), None)
            .unwrap();
        ConfigParser::resolve_secrets(&mut manifest, |_| Some(String::from("sv=2024&sig=x")))
            .unwrap();

        let result = crate::config::ConfigValidator::new()
            .validate_manifest(&manifest)
            .unwrap();
        assert!(result.errors.is_empty());
        assert_eq!(manifest.stages.len(), 3);
        assert_eq!(manifest.stages[1].logical_id(), "landing");
    }

    #[test]
    fn test_find_config_file_walks_parents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stages.yml"), "stages: []\n").unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("stages.yml"));
    }
}
