use crate::error::{LoaderError, SetupStep};
use crate::types::DeviceConfig;
use knx_transport::Connector;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A connector that came up during a load pass.
#[derive(Clone)]
pub struct ActiveConnector {
    pub name: String,
    pub connector: Arc<dyn Connector>,
}

impl fmt::Debug for ActiveConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.connector.info();
        f.debug_struct("ActiveConnector")
            .field("name", &self.name)
            .field("router", &info.router.to_string())
            .field("driver", &info.driver)
            .finish()
    }
}

/// Outcome of one load pass, per connector and per device.
#[derive(Debug, Default, Serialize)]
pub struct LoadReport {
    #[serde(skip)]
    pub active: Vec<ActiveConnector>,
    pub connectors: Vec<ConnectorReport>,
}

#[derive(Debug, Serialize)]
pub struct ConnectorReport {
    pub name: String,
    pub router: String,
    pub outcome: ConnectorOutcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectorOutcome {
    Disabled,
    ConnectFailed { reason: LoaderError },
    Connected { devices: Vec<DeviceReport> },
}

#[derive(Debug, Serialize)]
pub struct DeviceReport {
    pub index: usize,
    #[serde(rename = "type")]
    pub type_id: Option<String>,
    pub href: String,
    /// Malformed addresses that were replaced by an absent argument.
    pub address_issues: Vec<LoaderError>,
    pub steps: Vec<StepReport>,
    pub outcome: DeviceOutcome,
}

impl DeviceReport {
    pub(crate) fn new(index: usize, cfg: &DeviceConfig) -> Self {
        Self {
            index,
            type_id: cfg.type_id.clone(),
            href: cfg.href.clone(),
            address_issues: Vec::new(),
            steps: Vec::new(),
            outcome: DeviceOutcome::Pending,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.outcome, DeviceOutcome::Loaded { .. })
    }

    pub fn step(&self, step: SetupStep) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceOutcome {
    /// Not processed yet; never present in a finished report.
    Pending,
    Loaded { path: String },
    Skipped { reason: LoaderError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: SetupStep,
    pub status: StepStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    Skipped,
    Failed(String),
}

impl LoadReport {
    /// Connectors that connected, in configuration order.
    pub fn active_connectors(&self) -> &[ActiveConnector] {
        &self.active
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceReport> {
        self.connectors.iter().flat_map(|c| match &c.outcome {
            ConnectorOutcome::Connected { devices } => devices.as_slice(),
            _ => &[][..],
        })
    }

    pub fn devices_loaded(&self) -> usize {
        self.devices().filter(|d| d.is_loaded()).count()
    }

    pub fn loaded_paths(&self) -> Vec<&str> {
        self.devices()
            .filter_map(|d| match &d.outcome {
                DeviceOutcome::Loaded { path } => Some(path.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every connector or device level failure, address issues included.
    pub fn failures(&self) -> Vec<&LoaderError> {
        let mut out = Vec::new();
        for c in &self.connectors {
            match &c.outcome {
                ConnectorOutcome::ConnectFailed { reason } => out.push(reason),
                ConnectorOutcome::Connected { devices } => {
                    for d in devices {
                        out.extend(d.address_issues.iter());
                        if let DeviceOutcome::Skipped { reason } = &d.outcome {
                            out.push(reason);
                        }
                    }
                }
                ConnectorOutcome::Disabled => {}
            }
        }
        out
    }
}
