//! device-loader: configuration-driven loading of KNX connectors and devices
//!
//! Reads a hierarchical connector/device configuration, brings up each enabled
//! connector, resolves every device's implementation from a [`DeviceCatalog`]
//! by type identifier and address count, registers the built devices with an
//! [`ObjectBroker`] and tears them all down again on request.

mod error;
pub use error::{
    BrokerError, CatalogError, ConfigError, ConstructionError, LoaderError, SetupStep,
};

mod types;
pub use types::{ConnectorConfig, DeviceConfig, RouterConfig};

mod config;
pub use config::{
    bind_configuration, parse_connectors, ConfigView, DEFAULT_CONFIGURATION_LOCATION,
};

mod device;
pub use device::{Datapoint, Device, DeviceCore, DeviceHandle, DeviceMeta};

pub mod drivers;

mod catalog;
pub use catalog::{normalize_type_id, DeviceCatalog, DeviceCtor, DeviceForm};

mod broker;
pub use broker::{
    HistorySample, InMemoryBroker, ObjectBroker, RegistrationInfo, DEFAULT_HISTORY_DEPTH,
};

mod factory;
pub use factory::{build_arguments, registration_path, setup_device, NO_ADDRESS};

mod loaded;
pub use loaded::LoadedDevices;

mod report;
pub use report::{
    ActiveConnector, ConnectorOutcome, ConnectorReport, DeviceOutcome, DeviceReport, LoadReport,
    StepReport, StepStatus,
};

mod loader;
#[cfg(feature = "ip")]
pub use loader::IpConnectorFactory;
pub use loader::{ConnectorFactory, DeviceLoader};

mod metrics;
pub use metrics::{LoaderMetrics, MetricsHub};
