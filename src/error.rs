use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EgaError {
    #[error("{value} does not match {pattern}")]
    InvalidAccession { value: String, pattern: String },

    #[error("unknown schema kind: {0}")]
    InvalidSchemaKind(String),

    #[error("unknown reference assembly: {0}")]
    UnknownAssembly(String),

    #[error("unknown species: {0}")]
    UnknownSpecies(String),

    #[error("missing config file egameta.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(String),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("unknown environment {0} (not present in config)")]
    UnknownEnvironment(String),

    #[error("exactly one of password or password-file is required")]
    CredentialSource,

    #[error("{0}")]
    MetadataConstruction(String),

    #[error("{0}")]
    AccessionUpdate(String),

    #[error("graph store request failed: {0}")]
    GraphHttp(String),

    #[error("graph store returned status {status}: {message}")]
    GraphStatus { status: u16, message: String },

    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    #[error("archive request failed: {0}")]
    ArchiveHttp(String),

    #[error("archive returned status {status}: {message}")]
    ArchiveStatus { status: u16, message: String },

    #[error("no session token held; login to {0} failed at construction")]
    SessionUnavailable(String),

    #[error("failed to read alignment header from {path}: {message}")]
    AlignmentHeader { path: String, message: String },

    #[error("checksum for {filename} not found in {sidecar}")]
    ChecksumNotFound { sidecar: String, filename: String },

    #[error("malformed XML: {0}")]
    Xml(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
