//! Configuration module for the stage reconciler.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `stagectl.yaml`
//! - Schema validation of desired stage states
//! - Computing stage hashes and secret fingerprints

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, ENV_REMOTE_PATH, ENV_STATE_PATH, find_config_file};
pub use spec::{
    AwsCredentials, AzureCredentials, AzureEncryption, AzureStorage, CsvFormat, DEFAULT_SENTINEL,
    DirectoryConfig, FileFormatConfig, GcsEncryption, GcsStorage, InternalEncryption,
    InternalStorage, KmsKey, Marker, MasterKey, QualifiedName, ReconcileConfig, RemoteBackend,
    RemoteConfig, ReplaceStrategy, S3CompatibleStorage, S3Encryption, S3Storage,
    StageDesiredState, StageKind, StageManifest, StageStorage, StateConfig, TriBool,
    normalize_identifier,
};
pub use validator::{ConfigValidator, ValidationResult, is_valid_identifier};
