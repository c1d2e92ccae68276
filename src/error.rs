//! Error types for the feature reconciliation engine

use thiserror::Error;

/// Errors produced while computing or converging feature state
#[derive(Error, Debug)]
pub enum Error {
    /// An operator-set annotation could not be parsed
    #[error("invalid value {value:?} for annotation {key}: {reason}")]
    InvalidAnnotation {
        key: String,
        value: String,
        reason: String,
    },

    /// A CIDR or CIDR list is malformed
    #[error("invalid CIDR {0:?}")]
    InvalidCidr(String),

    /// An IP address is malformed
    #[error("invalid IP address {0:?}")]
    InvalidIp(String),

    /// Configuration failed validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Daemon configuration error (CLI, config document, registry)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A host-level precondition does not hold
    #[error("{0}")]
    Environment(String),

    /// Another VXLAN interface already owns the requested destination port
    #[error("VXLAN port {port} is already in use by interface {interface}")]
    VxlanPortInUse { port: u16, interface: String },

    /// The CNI's own VXLAN device is bound to a different port than requested
    #[error(
        "{device} interface already exists with port {existing}, but tunnel port {requested} was requested; delete the interface or change the tunnel port"
    )]
    VxlanDevicePortMismatch {
        device: String,
        existing: u16,
        requested: u16,
    },

    /// The chart executor failed
    #[error("chart {chart}: {message}")]
    ChartError { chart: String, message: String },

    /// Required custom resource kinds never showed up in the API group
    #[error("timed out after {waited:?} waiting for {group_version} resources {missing:?}")]
    CrdWaitTimeout {
        group_version: String,
        missing: Vec<String>,
        waited: std::time::Duration,
    },

    /// A rollout restart kept failing until attempts ran out
    #[error("failed to restart {workload} after {attempts} attempts: {source}")]
    RolloutRestart {
        workload: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// A failed step, prefixed with a description of what was being done
    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<Error>,
    },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// IO error (probes, helm subprocess)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Trace exporter setup failed
    #[error("Telemetry error: {0}")]
    TelemetryError(#[from] opentelemetry::trace::TraceError),
}

impl Error {
    /// Whether a later reconcile has a reasonable chance to succeed without
    /// an operator changing the configuration
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::IoError(_)
            | Error::ChartError { .. }
            | Error::CrdWaitTimeout { .. }
            | Error::RolloutRestart { .. } => true,
            Error::Step { source, .. } => source.is_retriable(),
            _ => false,
        }
    }

    /// Short category used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidAnnotation { .. }
            | Error::InvalidCidr(_)
            | Error::InvalidIp(_)
            | Error::ValidationError(_)
            | Error::ConfigError(_) => "input",
            Error::Environment(_)
            | Error::VxlanPortInUse { .. }
            | Error::VxlanDevicePortMismatch { .. } => "environment",
            Error::ChartError { .. } => "chart",
            Error::CrdWaitTimeout { .. } => "crd_wait",
            Error::RolloutRestart { .. } => "rollout_restart",
            Error::Cancelled => "cancelled",
            Error::Step { source, .. } => source.kind(),
            Error::KubeError(_) => "kube",
            Error::IoError(_) => "io",
            Error::SerializationError(_) | Error::YamlError(_) => "serialization",
            Error::TelemetryError(_) => "telemetry",
        }
    }
}

/// Attach a step description to an error, mirroring how each reconcile
/// stage reports what it was attempting
pub trait StepExt<T> {
    fn step(self, step: impl Into<String>) -> Result<T>;
}

impl<T> StepExt<T> for Result<T> {
    fn step(self, step: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::Step {
            step: step.into(),
            source: Box::new(source),
        })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
