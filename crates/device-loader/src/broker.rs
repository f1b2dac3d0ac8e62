use crate::device::{Device, DeviceHandle};
use crate::BrokerError;
use knx_transport::GroupAddress;
use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;
use tracing::{debug, warn};

/// History depth used when a device asks for history without a count.
pub const DEFAULT_HISTORY_DEPTH: usize = 100;

/// Host registry devices are published into, plus the feature switches the
/// loader may turn on per device.
pub trait ObjectBroker: Send + Sync {
    fn add_obj(&self, device: DeviceHandle) -> Result<(), BrokerError>;

    /// Register with a secondary IPv6 identifier as addressing hint.
    fn add_obj_with_ipv6(&self, device: DeviceHandle, ipv6: &str) -> Result<(), BrokerError>;

    fn remove_obj(&self, path: &str) -> Result<(), BrokerError>;

    /// Attach history tracking with the broker's default depth.
    fn add_history(&self, device: &DeviceHandle) -> Result<(), BrokerError>;

    fn add_history_with_depth(&self, device: &DeviceHandle, depth: usize)
        -> Result<(), BrokerError>;

    fn enable_group_comm(&self, device: &DeviceHandle) -> Result<(), BrokerError>;

    fn enable_object_refresh(&self, device: &DeviceHandle) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySample {
    pub datapoint: String,
    pub value: Vec<u8>,
    pub at: OffsetDateTime,
}

struct Registration {
    device: DeviceHandle,
    ipv6: Option<Ipv6Addr>,
    registered_at: OffsetDateTime,
    history_depth: Option<usize>,
    history: VecDeque<HistorySample>,
    group_comm: bool,
    refresh: bool,
}

/// Inspectable snapshot of one registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    pub path: String,
    pub kind: &'static str,
    pub ipv6: Option<Ipv6Addr>,
    pub registered_at: OffsetDateTime,
    pub history_depth: Option<usize>,
    pub group_comm: bool,
    pub refresh: bool,
}

/// Process-local broker keyed by each device's full path.
#[derive(Default)]
pub struct InMemoryBroker {
    objects: Mutex<BTreeMap<String, Registration>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Registration>> {
        // Every mutation is a single map operation, so a poisoned map is still consistent
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert(&self, device: DeviceHandle, ipv6: Option<Ipv6Addr>) -> Result<(), BrokerError> {
        let path = device.full_path();
        let mut objects = self.objects();
        if objects.contains_key(&path) {
            return Err(BrokerError::AlreadyRegistered(path));
        }
        debug!(path = %path, kind = device.kind(), "object registered");
        objects.insert(
            path,
            Registration {
                device,
                ipv6,
                registered_at: OffsetDateTime::now_utc(),
                history_depth: None,
                history: VecDeque::new(),
                group_comm: false,
                refresh: false,
            },
        );
        Ok(())
    }

    fn update(
        &self,
        device: &DeviceHandle,
        f: impl FnOnce(&mut Registration),
    ) -> Result<(), BrokerError> {
        let path = device.full_path();
        let mut objects = self.objects();
        let reg = objects.get_mut(&path).ok_or(BrokerError::NotFound(path))?;
        f(reg);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects().contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    pub fn get(&self, path: &str) -> Option<DeviceHandle> {
        self.objects().get(path).map(|r| Arc::clone(&r.device))
    }

    pub fn info(&self, path: &str) -> Option<RegistrationInfo> {
        self.objects().get(path).map(|r| RegistrationInfo {
            path: path.to_string(),
            kind: r.device.kind(),
            ipv6: r.ipv6,
            registered_at: r.registered_at,
            history_depth: r.history_depth,
            group_comm: r.group_comm,
            refresh: r.refresh,
        })
    }

    pub fn history(&self, path: &str) -> Vec<HistorySample> {
        self.objects()
            .get(path)
            .map(|r| r.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Re-read every refresh-enabled device; returns how many were refreshed.
    pub fn refresh_all(&self) -> usize {
        let due: Vec<(String, DeviceHandle)> = self
            .objects()
            .iter()
            .filter(|(_, r)| r.refresh)
            .map(|(p, r)| (p.clone(), Arc::clone(&r.device)))
            .collect();
        let mut refreshed = 0;
        for (path, device) in due {
            match device.refresh() {
                Ok(()) => refreshed += 1,
                Err(e) => warn!(path = %path, error = %e, "refresh failed"),
            }
        }
        refreshed
    }

    /// Deliver a group write seen on the bus to every subscribed device and
    /// record history for those that track it. Returns the number of devices
    /// that had a matching datapoint.
    pub fn dispatch_group_write(&self, dest: GroupAddress, data: &[u8]) -> usize {
        let subscribed: Vec<(String, DeviceHandle)> = self
            .objects()
            .iter()
            .filter(|(_, r)| r.group_comm)
            .map(|(p, r)| (p.clone(), Arc::clone(&r.device)))
            .collect();

        let mut matched = 0;
        for (path, device) in subscribed {
            let updated = device.on_group_write(dest, data);
            if updated.is_empty() {
                continue;
            }
            matched += 1;
            let mut objects = self.objects();
            let Some(reg) = objects.get_mut(&path) else {
                continue;
            };
            let Some(depth) = reg.history_depth else {
                continue;
            };
            let now = OffsetDateTime::now_utc();
            for datapoint in updated {
                reg.history.push_back(HistorySample {
                    datapoint: datapoint.to_string(),
                    value: data.to_vec(),
                    at: now,
                });
            }
            while reg.history.len() > depth {
                reg.history.pop_front();
            }
        }
        matched
    }
}

impl ObjectBroker for InMemoryBroker {
    fn add_obj(&self, device: DeviceHandle) -> Result<(), BrokerError> {
        self.insert(device, None)
    }

    fn add_obj_with_ipv6(&self, device: DeviceHandle, ipv6: &str) -> Result<(), BrokerError> {
        let addr: Ipv6Addr = ipv6
            .trim()
            .parse()
            .map_err(|_| BrokerError::InvalidIpv6(ipv6.to_string()))?;
        self.insert(device, Some(addr))
    }

    fn remove_obj(&self, path: &str) -> Result<(), BrokerError> {
        match self.objects().remove(path) {
            Some(_) => {
                debug!(path, "object removed");
                Ok(())
            }
            None => Err(BrokerError::NotFound(path.to_string())),
        }
    }

    fn add_history(&self, device: &DeviceHandle) -> Result<(), BrokerError> {
        self.add_history_with_depth(device, DEFAULT_HISTORY_DEPTH)
    }

    fn add_history_with_depth(
        &self,
        device: &DeviceHandle,
        depth: usize,
    ) -> Result<(), BrokerError> {
        self.update(device, |r| r.history_depth = Some(depth))
    }

    fn enable_group_comm(&self, device: &DeviceHandle) -> Result<(), BrokerError> {
        self.update(device, |r| r.group_comm = true)
    }

    fn enable_object_refresh(&self, device: &DeviceHandle) -> Result<(), BrokerError> {
        self.update(device, |r| r.refresh = true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::TemperatureSensor;
    use knx_transport::{Connector, MockConnector, RouterEndpoint};

    fn sensor(href: &str, address: &str) -> DeviceHandle {
        let mut mock = MockConnector::new(RouterEndpoint::new("10.0.0.1", 3671), "10.0.0.2");
        mock.connect().unwrap();
        let conn: Arc<dyn Connector> = Arc::new(mock);
        let mut device = TemperatureSensor::build(conn, &[Some(address.parse().unwrap())]).unwrap();
        device.set_href(href.to_string());
        Arc::from(device)
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let broker = InMemoryBroker::new();
        broker.add_obj(sensor("line/t1", "3/0/1")).unwrap();
        assert_eq!(
            broker.add_obj(sensor("line/t1", "3/0/2")),
            Err(BrokerError::AlreadyRegistered("line/t1".to_string()))
        );
        assert_eq!(broker.len(), 1);
    }

    #[test]
    fn ipv6_hint_is_validated() {
        let broker = InMemoryBroker::new();
        broker
            .add_obj_with_ipv6(sensor("line/t1", "3/0/1"), "2001:db8::1")
            .unwrap();
        assert_eq!(
            broker.info("line/t1").and_then(|i| i.ipv6),
            Some("2001:db8::1".parse().unwrap())
        );
        assert!(matches!(
            broker.add_obj_with_ipv6(sensor("line/t2", "3/0/2"), "not-v6"),
            Err(BrokerError::InvalidIpv6(_))
        ));
        assert!(!broker.contains("line/t2"));
    }

    #[test]
    fn features_require_registration() {
        let broker = InMemoryBroker::new();
        let device = sensor("line/t1", "3/0/1");
        assert!(matches!(
            broker.enable_group_comm(&device),
            Err(BrokerError::NotFound(_))
        ));
        broker.add_obj(Arc::clone(&device)).unwrap();
        broker.add_history(&device).unwrap();
        broker.enable_object_refresh(&device).unwrap();
        let info = broker.info("line/t1").unwrap();
        assert_eq!(info.history_depth, Some(DEFAULT_HISTORY_DEPTH));
        assert!(info.refresh);
        assert!(!info.group_comm);
        assert_eq!(broker.refresh_all(), 1);
    }

    #[test]
    fn group_writes_feed_bounded_history() {
        let broker = InMemoryBroker::new();
        let device = sensor("line/t1", "3/0/1");
        broker.add_obj(Arc::clone(&device)).unwrap();
        broker.add_history_with_depth(&device, 2).unwrap();
        broker.enable_group_comm(&device).unwrap();

        let dest: GroupAddress = "3/0/1".parse().unwrap();
        for v in 1..=3u8 {
            assert_eq!(broker.dispatch_group_write(dest, &[0x0C, v]), 1);
        }
        assert_eq!(broker.dispatch_group_write("3/0/9".parse().unwrap(), &[0]), 0);

        let history = broker.history("line/t1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, vec![0x0C, 2]);
        assert_eq!(history[1].value, vec![0x0C, 3]);
    }

    #[test]
    fn removal_of_unknown_path_is_an_error() {
        let broker = InMemoryBroker::new();
        broker.add_obj(sensor("line/t1", "3/0/1")).unwrap();
        assert_eq!(
            broker.remove_obj("line/t9"),
            Err(BrokerError::NotFound("line/t9".to_string()))
        );
        broker.remove_obj("line/t1").unwrap();
        assert!(broker.is_empty());
    }
}
