use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Post-construction steps applied to every device, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    Path,
    Name,
    DisplayName,
    Register,
    Track,
    Initialize,
    History,
    GroupComm,
    Refresh,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SetupStep::Path => "path",
            SetupStep::Name => "name",
            SetupStep::DisplayName => "display name",
            SetupStep::Register => "register",
            SetupStep::Track => "track",
            SetupStep::Initialize => "initialize",
            SetupStep::History => "history",
            SetupStep::GroupComm => "group communication",
            SetupStep::Refresh => "refresh",
        };
        f.write_str(s)
    }
}

/// Everything that can go wrong while loading, isolated per connector or device.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoaderError {
    #[error("configuration unavailable at {location}: {reason}")]
    Configuration { location: String, reason: String },
    #[error("connector {connector} failed to come up: {reason}")]
    ConnectorBringup { connector: String, reason: String },
    #[error("unknown device type: {type_id}")]
    UnknownType { type_id: String },
    #[error("device type {type_id} has no form taking {address_count} addresses (available: {available:?})")]
    NoMatchingForm {
        type_id: String,
        address_count: usize,
        available: Vec<usize>,
    },
    #[error("address #{position} {address:?} is malformed: {reason}")]
    AddressFormat {
        position: usize,
        address: String,
        reason: String,
    },
    #[error("constructing {type_id} failed: {source}")]
    Construction {
        type_id: String,
        source: ConstructionError,
    },
    #[error("{step} step failed: {reason}")]
    PostSetup { step: SetupStep, reason: String },
    #[error("device #{index} is missing required key {missing}")]
    IncompleteDevice { index: usize, missing: &'static str },
}

/// Failures raised by a device constructor.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstructionError {
    #[error("argument #{position} ({role}) is required but absent")]
    MissingAddress { position: usize, role: &'static str },
    #[error("expected {expected} arguments, got {got}")]
    ArgumentCount { expected: usize, got: usize },
    #[error("constructor rejected arguments: {reason}")]
    Rejected { reason: String },
    #[error("constructor panicked: {reason}")]
    Panicked { reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("an object is already registered at {0}")]
    AlreadyRegistered(String),
    #[error("no object registered at {0}")]
    NotFound(String),
    #[error("invalid ipv6 address: {0}")]
    InvalidIpv6(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("device type {type_id} already has a form taking {address_count} addresses")]
    DuplicateForm {
        type_id: String,
        address_count: usize,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}
