use crate::broker::ObjectBroker;
use crate::device::{Device, DeviceHandle};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// Devices created by one loader, kept for teardown only.
///
/// Appends during load and the drain during teardown both hold the same lock,
/// so a teardown never observes a half-finished append and vice versa.
#[derive(Default)]
pub struct LoadedDevices {
    devices: Mutex<Vec<DeviceHandle>>,
}

impl LoadedDevices {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeviceHandle>> {
        // push and drain leave the vector valid even if a holder panicked
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, device: DeviceHandle) {
        self.lock().push(device);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.lock().iter().map(|d| d.full_path()).collect()
    }

    /// Unregister every tracked device from `broker` by its own full path and
    /// forget it. Returns the number of successful removals.
    pub fn remove_all(&self, broker: &dyn ObjectBroker) -> usize {
        let mut devices = self.lock();
        let mut removed = 0;
        for device in devices.drain(..) {
            let path = device.full_path();
            match broker.remove_obj(&path) {
                Ok(()) => {
                    debug!(path = %path, "device removed");
                    removed += 1;
                }
                Err(e) => warn!(path = %path, error = %e, "removing device failed"),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::drivers::BrightnessSensor;
    use knx_transport::{Connector, MockConnector, RouterEndpoint};
    use std::sync::Arc;

    fn device(href: &str) -> DeviceHandle {
        let conn: Arc<dyn Connector> = Arc::new(MockConnector::new(
            RouterEndpoint::new("10.0.0.1", 3671),
            "10.0.0.2",
        ));
        let mut d = BrightnessSensor::build(conn, &[None]).unwrap();
        d.set_href(href.to_string());
        Arc::from(d)
    }

    #[test]
    fn remove_all_only_touches_tracked_devices() {
        let broker = InMemoryBroker::new();
        let loaded = LoadedDevices::new();
        for href in ["c/a", "c/b"] {
            let d = device(href);
            broker.add_obj(Arc::clone(&d)).unwrap();
            loaded.push(d);
        }
        broker.add_obj(device("other/x")).unwrap();

        assert_eq!(loaded.paths(), vec!["c/a", "c/b"]);
        assert_eq!(loaded.remove_all(&broker), 2);
        assert_eq!(broker.paths(), vec!["other/x"]);
        assert!(loaded.is_empty());
    }

    #[test]
    fn second_teardown_is_a_no_op() {
        let broker = InMemoryBroker::new();
        let loaded = LoadedDevices::new();
        let d = device("c/a");
        broker.add_obj(Arc::clone(&d)).unwrap();
        loaded.push(d);

        assert_eq!(loaded.remove_all(&broker), 1);
        assert_eq!(loaded.remove_all(&broker), 0);
    }

    #[test]
    fn concurrent_push_and_teardown_do_not_interleave() {
        let broker = Arc::new(InMemoryBroker::new());
        let loaded = Arc::new(LoadedDevices::new());

        let pusher = {
            let broker = Arc::clone(&broker);
            let loaded = Arc::clone(&loaded);
            std::thread::spawn(move || {
                for i in 0..200 {
                    let d = device(&format!("c/{i}"));
                    broker.add_obj(Arc::clone(&d)).unwrap();
                    loaded.push(d);
                }
            })
        };
        let mut removed = 0;
        while !pusher.is_finished() {
            removed += loaded.remove_all(broker.as_ref());
        }
        pusher.join().unwrap();
        removed += loaded.remove_all(broker.as_ref());

        assert_eq!(removed, 200);
        assert!(broker.is_empty());
    }
}
