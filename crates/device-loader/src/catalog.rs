use crate::device::Device;
use crate::{CatalogError, ConstructionError, LoaderError};
use knx_transport::{Connector, GroupAddress};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Constructor for one form of a device type: owning connector plus addresses.
pub type DeviceCtor =
    fn(Arc<dyn Connector>, &[Option<GroupAddress>]) -> Result<Box<dyn Device>, ConstructionError>;

/// A constructible form of a device type, tagged with its address count.
#[derive(Clone, Copy)]
pub struct DeviceForm {
    pub type_id: &'static str,
    pub address_count: usize,
    ctor: DeviceCtor,
}

impl DeviceForm {
    /// Number of constructor arguments, the owning connector included.
    pub fn arity(&self) -> usize {
        self.address_count + 1
    }

    /// Run the constructor. Panics inside it are reported, not propagated.
    pub fn construct(
        &self,
        connector: Arc<dyn Connector>,
        addresses: &[Option<GroupAddress>],
    ) -> Result<Box<dyn Device>, ConstructionError> {
        if addresses.len() != self.address_count {
            return Err(ConstructionError::ArgumentCount {
                expected: self.arity(),
                got: addresses.len() + 1,
            });
        }
        let ctor = self.ctor;
        panic::catch_unwind(AssertUnwindSafe(|| ctor(connector, addresses))).unwrap_or_else(
            |payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(ConstructionError::Panicked { reason })
            },
        )
    }
}

impl std::fmt::Debug for DeviceForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceForm")
            .field("type_id", &self.type_id)
            .field("address_count", &self.address_count)
            .finish()
    }
}

/// Registry of every device type the loader can build, keyed by type identifier.
#[derive(Debug, Default, Clone)]
pub struct DeviceCatalog {
    forms: BTreeMap<&'static str, Vec<DeviceForm>>,
}

impl DeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the built-in device kinds.
    pub fn with_builtin_devices() -> Self {
        let mut catalog = Self::new();
        crate::drivers::register_builtin(&mut catalog);
        catalog
    }

    /// Add a form. Only one form per (type, address count) is allowed.
    pub fn register(
        &mut self,
        type_id: &'static str,
        address_count: usize,
        ctor: DeviceCtor,
    ) -> Result<(), CatalogError> {
        let forms = self.forms.entry(type_id).or_default();
        if forms.iter().any(|f| f.address_count == address_count) {
            return Err(CatalogError::DuplicateForm {
                type_id: type_id.to_string(),
                address_count,
            });
        }
        forms.push(DeviceForm {
            type_id,
            address_count,
            ctor,
        });
        forms.sort_by_key(|f| f.address_count);
        Ok(())
    }

    /// Find the form of `type_id` whose arity is `address_count + 1`.
    pub fn resolve(&self, type_id: &str, address_count: usize) -> Result<&DeviceForm, LoaderError> {
        let forms = self
            .forms
            .get(type_id)
            .or_else(|| self.forms.get(normalize_type_id(type_id)))
            .ok_or_else(|| LoaderError::UnknownType {
                type_id: type_id.to_string(),
            })?;
        forms
            .iter()
            .find(|f| f.arity() == address_count + 1)
            .ok_or_else(|| LoaderError::NoMatchingForm {
                type_id: type_id.to_string(),
                address_count,
                available: forms.iter().map(|f| f.address_count).collect(),
            })
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.forms.contains_key(type_id)
    }

    /// Every registered form, ordered by type identifier then address count.
    pub fn forms(&self) -> impl Iterator<Item = &DeviceForm> {
        self.forms.values().flatten()
    }
}

/// Reduce a qualified identifier such as `gateway.knx.devices.SwitchActuatorImpl`
/// to its bare type name (`SwitchActuator`).
pub fn normalize_type_id(type_id: &str) -> &str {
    let last = type_id.rsplit('.').next().unwrap_or(type_id);
    last.strip_suffix("Impl").unwrap_or(last)
}
