//! Built-in device kinds and their catalog registration.

use crate::catalog::DeviceCatalog;
use crate::device::{Datapoint, Device, DeviceCore};
use crate::ConstructionError;
use knx_transport::{Connector, GroupAddress};
use std::sync::Arc;
use tracing::warn;

type Built = Result<Box<dyn Device>, ConstructionError>;

/// `args` holds addresses only; position 0 is the connector.
fn required(
    args: &[Option<GroupAddress>],
    index: usize,
    role: &'static str,
) -> Result<GroupAddress, ConstructionError> {
    args.get(index)
        .copied()
        .flatten()
        .ok_or(ConstructionError::MissingAddress {
            position: index + 1,
            role,
        })
}

fn optional(args: &[Option<GroupAddress>], index: usize) -> Option<GroupAddress> {
    args.get(index).copied().flatten()
}

/// On/off switching actuator, optionally with a separate status feedback address.
pub struct SwitchActuator {
    core: DeviceCore,
}

impl SwitchActuator {
    pub const KIND: &'static str = "SwitchActuator";

    pub fn new(connector: Arc<dyn Connector>, switch: GroupAddress) -> Self {
        Self {
            core: DeviceCore::new(connector, vec![Datapoint::new("value", Some(switch), true)]),
        }
    }

    pub fn with_switch(connector: Arc<dyn Connector>, args: &[Option<GroupAddress>]) -> Built {
        let switch = required(args, 0, "switch")?;
        Ok(Box::new(Self::new(connector, switch)))
    }

    pub fn with_status(connector: Arc<dyn Connector>, args: &[Option<GroupAddress>]) -> Built {
        let switch = required(args, 0, "switch")?;
        let status = optional(args, 1);
        // Without a status address the switch address is read back instead
        Ok(Box::new(Self {
            core: DeviceCore::new(
                connector,
                vec![
                    Datapoint::new("value", Some(switch), status.is_none()),
                    Datapoint::new("status", status, true),
                ],
            ),
        }))
    }

    pub fn switch(&self, on: bool) -> knx_transport::Result<()> {
        match self.core.datapoint("value").and_then(|dp| dp.address) {
            Some(addr) => self.core.connector().write_group(addr, &[u8::from(on)]),
            None => Ok(()),
        }
    }
}

impl Device for SwitchActuator {
    fn kind(&self) -> &'static str {
        Self::KIND
    }
    fn core(&self) -> &DeviceCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }
}

/// Dimming actuator: switch plus a brightness value, optionally a status.
pub struct DimmerActuator {
    core: DeviceCore,
}

impl DimmerActuator {
    pub const KIND: &'static str = "DimmerActuator";

    pub fn new(
        connector: Arc<dyn Connector>,
        switch: GroupAddress,
        value: Option<GroupAddress>,
    ) -> Self {
        Self {
            core: DeviceCore::new(
                connector,
                vec![
                    Datapoint::new("switch", Some(switch), false),
                    Datapoint::new("value", value, true),
                ],
            ),
        }
    }

    pub fn with_value(connector: Arc<dyn Connector>, args: &[Option<GroupAddress>]) -> Built {
        let switch = required(args, 0, "switch")?;
        Ok(Box::new(Self::new(connector, switch, optional(args, 1))))
    }

    pub fn with_status(connector: Arc<dyn Connector>, args: &[Option<GroupAddress>]) -> Built {
        let switch = required(args, 0, "switch")?;
        let value = optional(args, 1);
        let status = optional(args, 2);
        Ok(Box::new(Self {
            core: DeviceCore::new(
                connector,
                vec![
                    Datapoint::new("switch", Some(switch), false),
                    Datapoint::new("value", value, status.is_none()),
                    Datapoint::new("status", status, true),
                ],
            ),
        }))
    }

    /// Set brightness in percent (0..=100), scaled to a DPT 5.001 byte.
    pub fn dim(&self, percent: u8) -> knx_transport::Result<()> {
        let scaled = (u16::from(percent.min(100)) * 255 / 100) as u8;
        match self.core.datapoint("value").and_then(|dp| dp.address) {
            Some(addr) => self.core.connector().write_group(addr, &[scaled]),
            None => Ok(()),
        }
    }
}

impl Device for DimmerActuator {
    fn kind(&self) -> &'static str {
        Self::KIND
    }
    fn core(&self) -> &DeviceCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }
}

/// Read-only sensor with a single value datapoint.
///
/// The address may be absent; such a sensor is registered but never polled.
pub struct TemperatureSensor {
    core: DeviceCore,
}

impl TemperatureSensor {
    pub const KIND: &'static str = "TemperatureSensor";

    pub fn new(connector: Arc<dyn Connector>, value: Option<GroupAddress>) -> Self {
        if value.is_none() {
            warn!("temperature sensor built without a value address");
        }
        Self {
            core: DeviceCore::new(connector, vec![Datapoint::new("value", value, true)]),
        }
    }

    pub fn build(connector: Arc<dyn Connector>, args: &[Option<GroupAddress>]) -> Built {
        Ok(Box::new(Self::new(connector, optional(args, 0))))
    }

    /// Last reading decoded as a DPT 9.001 two-octet float, in degrees Celsius.
    pub fn celsius(&self) -> Option<f32> {
        let raw = self.core.datapoint("value")?.value()?;
        decode_dpt9(&raw)
    }
}

impl Device for TemperatureSensor {
    fn kind(&self) -> &'static str {
        Self::KIND
    }
    fn core(&self) -> &DeviceCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }
}

pub struct BrightnessSensor {
    core: DeviceCore,
}

impl BrightnessSensor {
    pub const KIND: &'static str = "BrightnessSensor";

    pub fn new(connector: Arc<dyn Connector>, value: Option<GroupAddress>) -> Self {
        Self {
            core: DeviceCore::new(connector, vec![Datapoint::new("value", value, true)]),
        }
    }

    pub fn build(connector: Arc<dyn Connector>, args: &[Option<GroupAddress>]) -> Built {
        Ok(Box::new(Self::new(connector, optional(args, 0))))
    }

    /// Last reading as DPT 9.004 lux.
    pub fn lux(&self) -> Option<f32> {
        let raw = self.core.datapoint("value")?.value()?;
        decode_dpt9(&raw)
    }
}

impl Device for BrightnessSensor {
    fn kind(&self) -> &'static str {
        Self::KIND
    }
    fn core(&self) -> &DeviceCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut DeviceCore {
        &mut self.core
    }
}

/// KNX 2-octet float: MEEEEMMM MMMMMMMM, value = 0.01 * M * 2^E.
fn decode_dpt9(raw: &[u8]) -> Option<f32> {
    let [hi, lo] = raw else {
        return None;
    };
    let word = u16::from_be_bytes([*hi, *lo]);
    if word == 0x7FFF {
        return None;
    }
    let exponent = i32::from((word >> 11) & 0x0F);
    let mut mantissa = i32::from(word & 0x07FF);
    if word & 0x8000 != 0 {
        mantissa -= 0x0800;
    }
    Some(0.01 * mantissa as f32 * 2f32.powi(exponent))
}

pub(crate) fn register_builtin(catalog: &mut DeviceCatalog) {
    let forms: [(&'static str, usize, crate::catalog::DeviceCtor); 6] = [
        (SwitchActuator::KIND, 1, SwitchActuator::with_switch),
        (SwitchActuator::KIND, 2, SwitchActuator::with_status),
        (DimmerActuator::KIND, 2, DimmerActuator::with_value),
        (DimmerActuator::KIND, 3, DimmerActuator::with_status),
        (TemperatureSensor::KIND, 1, TemperatureSensor::build),
        (BrightnessSensor::KIND, 1, BrightnessSensor::build),
    ];
    for (type_id, count, ctor) in forms {
        if let Err(e) = catalog.register(type_id, count, ctor) {
            warn!(error = %e, "skipping built-in device form");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knx_transport::{MockConnector, RouterEndpoint, TelegramKind, TelegramLog};

    fn ga(s: &str) -> Option<GroupAddress> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn switch_requires_its_switch_address() {
        let conn: Arc<dyn Connector> = Arc::new(MockConnector::new(
            RouterEndpoint::new("10.0.0.1", 3671),
            "10.0.0.2",
        ));
        let err = SwitchActuator::with_switch(conn.clone(), &[None]).err();
        assert_eq!(
            err,
            Some(ConstructionError::MissingAddress {
                position: 1,
                role: "switch"
            })
        );
        assert!(SwitchActuator::with_status(conn, &[ga("1/1/1"), None]).is_ok());
    }

    #[test]
    fn initialize_reads_status_points_only() {
        let mut mock = MockConnector::new(RouterEndpoint::new("10.0.0.1", 3671), "10.0.0.2");
        let log = mock.telegram_log();
        mock.connect().unwrap();
        let conn: Arc<dyn Connector> = Arc::new(mock);

        let dimmer =
            DimmerActuator::with_status(conn, &[ga("1/0/1"), ga("1/0/2"), ga("1/0/3")]).unwrap();
        dimmer.initialize().unwrap();

        let sent = log.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, TelegramKind::Read);
        assert_eq!(sent[0].destination.to_string(), "1/0/3");
    }

    #[test]
    fn group_writes_update_matching_datapoints() {
        let conn: Arc<dyn Connector> = Arc::new(MockConnector::new(
            RouterEndpoint::new("10.0.0.1", 3671),
            "10.0.0.2",
        ));
        let sensor = TemperatureSensor::build(conn, &[ga("3/0/1")]).unwrap();
        let updated = sensor.on_group_write("3/0/1".parse().unwrap(), &[0x0C, 0x1A]);
        assert_eq!(updated, vec!["value"]);
        assert!(sensor.on_group_write("3/0/2".parse().unwrap(), &[0x00]).is_empty());
        assert_eq!(sensor.datapoints()[0].value(), Some(vec![0x0C, 0x1A]));
    }

    fn connected() -> (Arc<dyn Connector>, TelegramLog) {
        let mut mock = MockConnector::new(RouterEndpoint::new("10.0.0.1", 3671), "10.0.0.2");
        let log = mock.telegram_log();
        mock.connect().unwrap();
        let conn: Arc<dyn Connector> = Arc::new(mock);
        (conn, log)
    }

    #[test]
    fn actuators_write_through_their_connector() {
        let (conn, log) = connected();
        let switch = SwitchActuator::new(Arc::clone(&conn), "1/1/1".parse().unwrap());
        switch.switch(true).unwrap();
        switch.switch(false).unwrap();

        let dimmer = DimmerActuator::new(conn, "1/2/1".parse().unwrap(), ga("1/2/2"));
        dimmer.dim(100).unwrap();
        dimmer.dim(250).unwrap();
        dimmer.dim(0).unwrap();

        let sent = log.lock().unwrap();
        let writes: Vec<_> = sent
            .iter()
            .map(|t| (t.kind, t.destination.to_string(), t.data.clone()))
            .collect();
        assert_eq!(
            writes,
            vec![
                (TelegramKind::Write, "1/1/1".to_string(), vec![0x01]),
                (TelegramKind::Write, "1/1/1".to_string(), vec![0x00]),
                (TelegramKind::Write, "1/2/2".to_string(), vec![0xFF]),
                (TelegramKind::Write, "1/2/2".to_string(), vec![0xFF]),
                (TelegramKind::Write, "1/2/2".to_string(), vec![0x00]),
            ]
        );
    }

    #[test]
    fn dimmer_without_value_address_writes_nothing() {
        let (conn, log) = connected();
        let dimmer = DimmerActuator::new(conn, "1/2/1".parse().unwrap(), None);
        dimmer.dim(50).unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn sensors_decode_their_last_reading() {
        let (conn, _) = connected();
        let temperature = TemperatureSensor::new(Arc::clone(&conn), ga("3/0/1"));
        assert_eq!(temperature.celsius(), None);
        temperature.on_group_write("3/0/1".parse().unwrap(), &[0x0C, 0x1A]);
        let celsius = temperature.celsius().unwrap();
        assert!((celsius - 21.0).abs() < 1e-3);

        let brightness = BrightnessSensor::new(conn, ga("3/1/1"));
        // 0x2A00 = 0.01 * 512 * 2^5 = 163.84 lux
        brightness.on_group_write("3/1/1".parse().unwrap(), &[0x2A, 0x00]);
        let lux = brightness.lux().unwrap();
        assert!((lux - 163.84).abs() < 1e-2);
    }

    #[test]
    fn dpt9_decoding() {
        // 0x0C1A = 21.0 C, 0x8A24 = -30.0 C
        let warm = decode_dpt9(&[0x0C, 0x1A]).unwrap();
        assert!((warm - 21.0).abs() < 1e-3);
        let cold = decode_dpt9(&[0x8A, 0x24]).unwrap();
        assert!((cold + 30.0).abs() < 1e-3);
        assert_eq!(decode_dpt9(&[0x7F, 0xFF]), None);
        assert_eq!(decode_dpt9(&[0x00]), None);
    }
}
