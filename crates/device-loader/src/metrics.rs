use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct LoaderMetrics {
    pub connectors_connected: IntGauge,
    pub connector_failures: IntCounter,
    pub devices_loaded: IntGauge,
    pub device_failures: IntCounter,
    pub devices_removed: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub loader: LoaderMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let err = |e: prometheus::Error| format!("metrics init error: {e}");
        let connectors_connected =
            IntGauge::new("knx_connectors_connected", "Connectors connected by the loader")
                .map_err(err)?;
        let connector_failures = IntCounter::new(
            "knx_connector_failures",
            "Connectors that failed to come up",
        )
        .map_err(err)?;
        let devices_loaded =
            IntGauge::new("knx_devices_loaded", "Devices currently tracked by the loader")
                .map_err(err)?;
        let device_failures = IntCounter::new("knx_device_failures", "Devices skipped during load")
            .map_err(err)?;
        let devices_removed =
            IntCounter::new("knx_devices_removed", "Devices removed during teardown")
                .map_err(err)?;
        let loader = LoaderMetrics {
            connectors_connected,
            connector_failures,
            devices_loaded,
            device_failures,
            devices_removed,
        };
        let _ = registry.register(Box::new(loader.connectors_connected.clone()));
        let _ = registry.register(Box::new(loader.connector_failures.clone()));
        let _ = registry.register(Box::new(loader.devices_loaded.clone()));
        let _ = registry.register(Box::new(loader.device_failures.clone()));
        let _ = registry.register(Box::new(loader.devices_removed.clone()));
        Ok(Self { registry, loader })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
