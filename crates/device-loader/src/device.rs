use knx_transport::{Connector, GroupAddress};
use std::sync::{Arc, Mutex};

/// A constructed device once it has been handed to the broker.
pub type DeviceHandle = Arc<dyn Device>;

/// Naming and registration data common to every device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceMeta {
    pub href: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
}

/// One group-addressed value of a device.
#[derive(Debug)]
pub struct Datapoint {
    pub name: &'static str,
    pub address: Option<GroupAddress>,
    /// Whether initialize/refresh should request the current value.
    pub readable: bool,
    value: Mutex<Option<Vec<u8>>>,
}

impl Datapoint {
    pub fn new(name: &'static str, address: Option<GroupAddress>, readable: bool) -> Self {
        Self {
            name,
            address,
            readable,
            value: Mutex::new(None),
        }
    }

    /// Last raw value seen on the bus.
    pub fn value(&self) -> Option<Vec<u8>> {
        self.value.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn store(&self, data: &[u8]) {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(data.to_vec());
    }
}

/// State shared by all device kinds: metadata, owning connector and datapoints.
pub struct DeviceCore {
    pub meta: DeviceMeta,
    connector: Arc<dyn Connector>,
    datapoints: Vec<Datapoint>,
}

impl DeviceCore {
    pub fn new(connector: Arc<dyn Connector>, datapoints: Vec<Datapoint>) -> Self {
        Self {
            meta: DeviceMeta::default(),
            connector,
            datapoints,
        }
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    pub fn datapoints(&self) -> &[Datapoint] {
        &self.datapoints
    }

    pub fn datapoint(&self, name: &str) -> Option<&Datapoint> {
        self.datapoints.iter().find(|dp| dp.name == name)
    }

    /// Request the current value of every readable, addressed datapoint.
    pub fn read_all(&self) -> knx_transport::Result<()> {
        for dp in self.datapoints.iter().filter(|dp| dp.readable) {
            if let Some(addr) = dp.address {
                self.connector.read_group(addr)?;
            }
        }
        Ok(())
    }

    /// Store `data` on every datapoint bound to `dest`; returns their names.
    pub fn store(&self, dest: GroupAddress, data: &[u8]) -> Vec<&'static str> {
        self.datapoints
            .iter()
            .filter(|dp| dp.address == Some(dest))
            .map(|dp| {
                dp.store(data);
                dp.name
            })
            .collect()
    }
}

/// A loadable bus device.
///
/// Setters take `&mut self` because they run before the device is shared;
/// everything after registration works through `&self`.
pub trait Device: Send + Sync {
    /// Catalog type identifier this device was built from.
    fn kind(&self) -> &'static str;

    fn core(&self) -> &DeviceCore;

    fn core_mut(&mut self) -> &mut DeviceCore;

    fn set_href(&mut self, href: String) {
        self.core_mut().meta.href = href;
    }

    fn set_name(&mut self, name: String) {
        self.core_mut().meta.name = Some(name);
    }

    fn set_display_name(&mut self, display_name: String) {
        self.core_mut().meta.display_name = Some(display_name);
    }

    fn meta(&self) -> &DeviceMeta {
        &self.core().meta
    }

    /// Path the device is registered (and later removed) under.
    fn full_path(&self) -> String {
        self.core().meta.href.clone()
    }

    fn datapoints(&self) -> &[Datapoint] {
        self.core().datapoints()
    }

    /// Initial read of the device state after registration.
    fn initialize(&self) -> knx_transport::Result<()> {
        self.core().read_all()
    }

    fn refresh(&self) -> knx_transport::Result<()> {
        self.core().read_all()
    }

    /// Feed a group event into the device; returns the datapoints it updated.
    fn on_group_write(&self, dest: GroupAddress, data: &[u8]) -> Vec<&'static str> {
        self.core().store(dest, data)
    }
}
