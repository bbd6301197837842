use thiserror::Error;

/// Slipway error types
#[derive(Error, Debug)]
pub enum SlipwayError {
    /// Input archive framing or output pack I/O failed
    #[error("Tar error: {0}")]
    TarError(String),

    /// Both `.balena/` and `.resin/` metadata directories present
    #[error("Multiple metadata directories in project archive: {first} and {second}")]
    MultipleMetadataDirectoriesError { first: String, second: String },

    /// Project metadata file failed decoding or schema validation
    #[error("Invalid project metadata in {file}: {message}")]
    MetadataValidationError { file: String, message: String },

    /// Registry-secrets file failed schema validation
    #[error("Invalid registry secrets: {0}")]
    RegistrySecretValidationError(String),

    /// No resolution strategy matched a service's build context
    #[error("Could not resolve project for service '{service}': {message}")]
    ProjectResolutionError { service: String, message: String },

    /// Daemon communication failure, missing build stream, infrastructure fault
    #[error("Build process error: {0}")]
    BuildProcessError(String),

    /// Registry request failed
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Image reference could not be parsed
    #[error("Invalid image reference '{reference}': {message}")]
    InvalidReferenceError { reference: String, message: String },

    /// Manifest content outside the accepted schema range
    #[error("Invalid registry content: {0}")]
    InvalidContentError(String),

    /// Task or option validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for SlipwayError {
    fn from(err: serde_json::Error) -> Self {
        SlipwayError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for SlipwayError {
    fn from(err: serde_yaml::Error) -> Self {
        SlipwayError::SerializationError(err.to_string())
    }
}

/// Result type alias for Slipway operations
pub type Result<T> = std::result::Result<T, SlipwayError>;
