use crate::broker::ObjectBroker;
use crate::catalog::DeviceCatalog;
use crate::config::{bind_configuration, parse_connectors, ConfigView, DEFAULT_CONFIGURATION_LOCATION};
use crate::error::LoaderError;
use crate::factory::{build_arguments, setup_device};
use crate::loaded::LoadedDevices;
use crate::metrics::MetricsHub;
use crate::report::{
    ActiveConnector, ConnectorOutcome, ConnectorReport, DeviceOutcome, DeviceReport, LoadReport,
};
use crate::types::{ConnectorConfig, DeviceConfig};
use knx_transport::{Connector, RouterEndpoint};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Builds an unconnected connector for a configured router.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, router: &RouterEndpoint, local_address: &str) -> Box<dyn Connector>;
}

impl<F> ConnectorFactory for F
where
    F: Fn(&RouterEndpoint, &str) -> Box<dyn Connector> + Send + Sync,
{
    fn create(&self, router: &RouterEndpoint, local_address: &str) -> Box<dyn Connector> {
        self(router, local_address)
    }
}

/// Creates KNXnet/IP routing connectors.
#[cfg(feature = "ip")]
#[derive(Debug, Default, Clone, Copy)]
pub struct IpConnectorFactory;

#[cfg(feature = "ip")]
impl ConnectorFactory for IpConnectorFactory {
    fn create(&self, router: &RouterEndpoint, local_address: &str) -> Box<dyn Connector> {
        Box::new(knx_transport::IpConnector::new(router.clone(), local_address))
    }
}

/// Brings up configured connectors, builds and registers their devices, and
/// unregisters everything it built on teardown.
pub struct DeviceLoader {
    catalog: DeviceCatalog,
    connectors: Box<dyn ConnectorFactory>,
    config: Mutex<Option<ConfigView>>,
    default_location: PathBuf,
    loaded: LoadedDevices,
    metrics: Option<MetricsHub>,
}

impl DeviceLoader {
    pub fn new(catalog: DeviceCatalog, connectors: impl ConnectorFactory + 'static) -> Self {
        Self {
            catalog,
            connectors: Box::new(connectors),
            config: Mutex::new(None),
            default_location: PathBuf::from(DEFAULT_CONFIGURATION_LOCATION),
            loaded: LoadedDevices::new(),
            metrics: None,
        }
    }

    /// Loader with the built-in device kinds and KNXnet/IP connectors.
    #[cfg(feature = "ip")]
    pub fn with_defaults() -> Self {
        Self::new(DeviceCatalog::with_builtin_devices(), IpConnectorFactory)
    }

    pub fn with_default_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.default_location = location.into();
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsHub) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    pub fn loaded(&self) -> &LoadedDevices {
        &self.loaded
    }

    /// Bind an explicit configuration, or fall back to the default location
    /// when `None`. A failed fallback leaves the loader without configuration.
    pub fn set_configuration(&self, config: Option<ConfigView>) {
        let bound = bind_configuration(config, &self.default_location);
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = bound;
    }

    pub fn has_configuration(&self) -> bool {
        self.config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Run one load pass. Failures are isolated per connector and per device
    /// and reported; nothing here aborts the pass.
    pub fn init_devices(&self, broker: &dyn ObjectBroker) -> LoadReport {
        let config = {
            let mut guard = self.config.lock().unwrap_or_else(|e| e.into_inner());
            let current = guard.take();
            *guard = bind_configuration(current, &self.default_location);
            guard.clone()
        };

        let mut report = LoadReport::default();
        let Some(config) = config else {
            warn!("no device configuration bound, nothing to load");
            return report;
        };

        for connector in parse_connectors(&config) {
            self.bring_up(connector, broker, &mut report);
        }

        if let Some(m) = &self.metrics {
            m.loader.connectors_connected.set(report.active_connectors().len() as i64);
            m.loader.devices_loaded.set(self.loaded.len() as i64);
        }
        info!(
            connectors = report.active_connectors().len(),
            devices = report.devices_loaded(),
            failures = report.failures().len(),
            "device load finished"
        );
        report
    }

    fn bring_up(&self, cfg: ConnectorConfig, broker: &dyn ObjectBroker, report: &mut LoadReport) {
        let router = RouterEndpoint::new(cfg.router.ip.clone().unwrap_or_default(), cfg.router.port);
        let mut connector_report = ConnectorReport {
            name: cfg.name.clone(),
            router: router.to_string(),
            outcome: ConnectorOutcome::Disabled,
        };

        if !cfg.enabled {
            info!(connector = %cfg.name, "connector disabled, skipping");
            report.connectors.push(connector_report);
            return;
        }

        let connector = match self.connect(&cfg, &router) {
            Ok(c) => c,
            Err(reason) => {
                error!(connector = %cfg.name, error = %reason, "connector bring-up failed");
                if let Some(m) = &self.metrics {
                    m.loader.connector_failures.inc();
                }
                connector_report.outcome = ConnectorOutcome::ConnectFailed { reason };
                report.connectors.push(connector_report);
                return;
            }
        };
        report.active.push(ActiveConnector {
            name: cfg.name.clone(),
            connector: Arc::clone(&connector),
        });

        if cfg.devices.is_empty() {
            info!(connector = %cfg.name, "no devices configured for connector");
        } else {
            info!(connector = %cfg.name, count = cfg.devices.len(), "devices found in configuration");
        }

        let devices = cfg
            .devices
            .iter()
            .enumerate()
            .map(|(i, d)| self.load_device(i, &cfg.name, &connector, d, broker))
            .collect();
        connector_report.outcome = ConnectorOutcome::Connected { devices };
        report.connectors.push(connector_report);
    }

    fn connect(
        &self,
        cfg: &ConnectorConfig,
        router: &RouterEndpoint,
    ) -> Result<Arc<dyn Connector>, LoaderError> {
        let bringup_error = |reason: String| LoaderError::ConnectorBringup {
            connector: cfg.name.clone(),
            reason,
        };
        if cfg.router.ip.as_deref().map_or(true, str::is_empty) {
            return Err(bringup_error("router.ip is not configured".to_string()));
        }
        let mut connector = self.connectors.create(router, &cfg.local_ip);
        connector
            .connect()
            .map_err(|e| bringup_error(e.to_string()))?;
        Ok(Arc::from(connector))
    }

    fn load_device(
        &self,
        index: usize,
        connector_name: &str,
        connector: &Arc<dyn Connector>,
        cfg: &DeviceConfig,
        broker: &dyn ObjectBroker,
    ) -> DeviceReport {
        let mut report = DeviceReport::new(index, cfg);
        let outcome = self.build_device(index, connector_name, connector, cfg, broker, &mut report);
        report.outcome = match outcome {
            Ok(path) => DeviceOutcome::Loaded { path },
            Err(reason) => {
                warn!(
                    connector = connector_name,
                    device = index,
                    href = %cfg.href,
                    error = %reason,
                    "device skipped"
                );
                if let Some(m) = &self.metrics {
                    m.loader.device_failures.inc();
                }
                DeviceOutcome::Skipped { reason }
            }
        };
        report
    }

    fn build_device(
        &self,
        index: usize,
        connector_name: &str,
        connector: &Arc<dyn Connector>,
        cfg: &DeviceConfig,
        broker: &dyn ObjectBroker,
        report: &mut DeviceReport,
    ) -> Result<String, LoaderError> {
        let type_id = cfg.type_id.as_deref().ok_or(LoaderError::IncompleteDevice {
            index,
            missing: "type",
        })?;
        // no address key selects the connector-only form
        let addresses = cfg.address.as_deref().unwrap_or_default();

        let form = self.catalog.resolve(type_id, addresses.len())?;
        let (args, issues) = build_arguments(addresses);
        report.address_issues = issues;

        let device = form
            .construct(Arc::clone(connector), &args)
            .map_err(|source| LoaderError::Construction {
                type_id: type_id.to_string(),
                source,
            })?;

        let (result, steps) = setup_device(device, connector_name, cfg, broker, &self.loaded);
        report.steps = steps;
        result
    }

    /// Unregister every device this loader registered. Safe to call after a
    /// partial load and more than once; connectors are left alone.
    pub fn remove_devices(&self, broker: &dyn ObjectBroker) -> usize {
        let removed = self.loaded.remove_all(broker);
        if let Some(m) = &self.metrics {
            m.loader.devices_removed.inc_by(removed as u64);
            m.loader.devices_loaded.set(self.loaded.len() as i64);
        }
        info!(removed, "devices removed");
        removed
    }
}
