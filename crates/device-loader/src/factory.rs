use crate::broker::ObjectBroker;
use crate::device::{Device, DeviceHandle};
use crate::error::{LoaderError, SetupStep};
use crate::loaded::LoadedDevices;
use crate::report::{StepReport, StepStatus};
use crate::types::DeviceConfig;
use knx_transport::GroupAddress;
use std::sync::Arc;
use tracing::{debug, warn};

/// Address entry meaning "this argument is deliberately absent".
pub const NO_ADDRESS: &str = "null";

fn is_absent(address: Option<&str>) -> bool {
    match address {
        None => true,
        Some(a) => a.trim().is_empty() || a.trim() == NO_ADDRESS,
    }
}

/// Turn configured address strings into constructor arguments.
///
/// Absent entries become `None` without a parse attempt. Malformed entries
/// also become `None` and are returned as issues; they never stop construction.
pub fn build_arguments(addresses: &[Option<String>]) -> (Vec<Option<GroupAddress>>, Vec<LoaderError>) {
    let mut args = Vec::with_capacity(addresses.len());
    let mut issues = Vec::new();
    for (i, address) in addresses.iter().enumerate() {
        let raw = address.as_deref();
        if is_absent(raw) {
            args.push(None);
            continue;
        }
        let raw = raw.unwrap_or_default();
        match raw.parse::<GroupAddress>() {
            Ok(ga) => args.push(Some(ga)),
            Err(e) => {
                let issue = LoaderError::AddressFormat {
                    // connector is argument 0
                    position: i + 1,
                    address: raw.to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %issue, "using an absent argument instead");
                issues.push(issue);
                args.push(None);
            }
        }
    }
    (args, issues)
}

/// `<form-urlencoded connector name>/<href>`
pub fn registration_path(connector_name: &str, href: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(connector_name.as_bytes()).collect();
    format!("{encoded}/{href}")
}

struct Steps(Vec<StepReport>);

impl Steps {
    fn done(&mut self, step: SetupStep) {
        self.0.push(StepReport {
            step,
            status: StepStatus::Done,
        });
    }

    fn skipped(&mut self, step: SetupStep) {
        self.0.push(StepReport {
            step,
            status: StepStatus::Skipped,
        });
    }

    fn record(&mut self, step: SetupStep, result: Result<(), String>, path: &str) {
        match result {
            Ok(()) => self.done(step),
            Err(reason) => {
                warn!(path, %step, error = %reason, "device setup step failed");
                self.0.push(StepReport {
                    step,
                    status: StepStatus::Failed(reason),
                });
            }
        }
    }
}

/// Apply post-construction setup to a freshly built device.
///
/// Registration comes before initialize and feature enablement because those
/// assume the device is discoverable in the broker. If registration fails the
/// device is dropped and the broker-dependent steps are reported as skipped.
pub fn setup_device(
    mut device: Box<dyn Device>,
    connector_name: &str,
    cfg: &DeviceConfig,
    broker: &dyn ObjectBroker,
    loaded: &LoadedDevices,
) -> (Result<String, LoaderError>, Vec<StepReport>) {
    let mut steps = Steps(Vec::with_capacity(9));

    let path = registration_path(connector_name, &cfg.href);
    device.set_href(path.clone());
    steps.done(SetupStep::Path);

    match cfg.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => {
            device.set_name(name.to_string());
            steps.done(SetupStep::Name);
        }
        None => steps.skipped(SetupStep::Name),
    }

    match cfg.display_name.as_deref().filter(|n| !n.is_empty()) {
        Some(display_name) => {
            device.set_display_name(display_name.to_string());
            steps.done(SetupStep::DisplayName);
        }
        None => steps.skipped(SetupStep::DisplayName),
    }

    let device: DeviceHandle = Arc::from(device);
    let registered = match cfg.ipv6.as_deref() {
        Some(ipv6) => broker.add_obj_with_ipv6(Arc::clone(&device), ipv6),
        None => broker.add_obj(Arc::clone(&device)),
    };
    if let Err(e) = registered {
        let reason = e.to_string();
        steps.record(SetupStep::Register, Err(reason.clone()), &path);
        for step in [
            SetupStep::Track,
            SetupStep::Initialize,
            SetupStep::History,
            SetupStep::GroupComm,
            SetupStep::Refresh,
        ] {
            steps.skipped(step);
        }
        let err = LoaderError::PostSetup {
            step: SetupStep::Register,
            reason,
        };
        return (Err(err), steps.0);
    }
    steps.done(SetupStep::Register);

    loaded.push(Arc::clone(&device));
    steps.done(SetupStep::Track);

    steps.record(
        SetupStep::Initialize,
        device.initialize().map_err(|e| e.to_string()),
        &path,
    );

    if cfg.history_enabled {
        let result = if cfg.history_count != 0 {
            broker.add_history_with_depth(&device, cfg.history_count as usize)
        } else {
            broker.add_history(&device)
        };
        steps.record(SetupStep::History, result.map_err(|e| e.to_string()), &path);
    } else {
        steps.skipped(SetupStep::History);
    }

    if cfg.group_comm_enabled {
        let result = broker.enable_group_comm(&device);
        steps.record(SetupStep::GroupComm, result.map_err(|e| e.to_string()), &path);
    } else {
        steps.skipped(SetupStep::GroupComm);
    }

    if cfg.refresh_enabled {
        let result = broker.enable_object_refresh(&device);
        steps.record(SetupStep::Refresh, result.map_err(|e| e.to_string()), &path);
    } else {
        steps.skipped(SetupStep::Refresh);
    }

    debug!(path = %path, kind = device.kind(), "device set up");
    (Ok(path), steps.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<Option<String>> {
        items.iter().map(|s| Some(s.to_string())).collect()
    }

    #[test]
    fn sentinel_and_empty_become_absent() {
        let mut input = strings(&["null", "", "1/1/1"]);
        input.push(None);
        let (args, issues) = build_arguments(&input);
        assert_eq!(args.len(), 4);
        assert_eq!(args[0], None);
        assert_eq!(args[1], None);
        assert_eq!(args[2], Some(GroupAddress::three_level(1, 1, 1).unwrap()));
        assert_eq!(args[3], None);
        assert!(issues.is_empty());
    }

    #[test]
    fn malformed_address_is_reported_and_absent() {
        let (args, issues) = build_arguments(&strings(&["1/1/1", "not-an-address"]));
        assert_eq!(args[1], None);
        assert_eq!(issues.len(), 1);
        assert!(matches!(
            &issues[0],
            LoaderError::AddressFormat { position: 2, address, .. } if address == "not-an-address"
        ));
    }

    #[test]
    fn registration_path_is_form_encoded() {
        assert_eq!(registration_path("line1", "actuator1"), "line1/actuator1");
        assert_eq!(
            registration_path("KNX Router/Line 1", "lamp"),
            "KNX+Router%2FLine+1/lamp"
        );
    }
}
