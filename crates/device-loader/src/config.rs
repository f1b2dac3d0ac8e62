use crate::types::{ConnectorConfig, DeviceConfig, RouterConfig};
use crate::ConfigError;
use knx_transport::DEFAULT_ROUTER_PORT;
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use tracing::{error, warn};

/// Where the loader looks for its configuration when none is supplied.
pub const DEFAULT_CONFIGURATION_LOCATION: &str = "config/devices.yaml";

/// Read-only hierarchical view over a parsed YAML document.
///
/// Paths are dot separated keys with an optional list index per segment,
/// e.g. `connector(0).device(2).address`. A mapping found where a list is
/// indexed behaves as a single-element list, so a lone connector does not
/// have to be written as a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigView {
    root: Value,
}

impl ConfigView {
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let root = serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let root = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let mut cur = &self.root;
        if path.is_empty() {
            return Some(cur);
        }
        for segment in path.split('.') {
            let (key, index) = parse_segment(segment)?;
            cur = cur.get(key)?;
            if let Some(i) = index {
                cur = match cur {
                    Value::Sequence(items) => items.get(i)?,
                    Value::Null => return None,
                    single if i == 0 => single,
                    _ => return None,
                };
            }
        }
        Some(cur)
    }

    pub fn contains(&self, path: &str) -> bool {
        !matches!(self.lookup(path), None | Some(Value::Null))
    }

    pub fn get_str(&self, path: &str) -> Option<String> {
        self.lookup(path).and_then(scalar_to_string)
    }

    pub fn get_bool(&self, path: &str, default: bool) -> bool {
        match self.lookup(path) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => true,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => false,
            None | Some(Value::Null) => default,
            Some(other) => {
                warn!(path, value = ?other, "expected a boolean, using default");
                default
            }
        }
    }

    pub fn get_int(&self, path: &str, default: i64) -> i64 {
        match self.lookup(path) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                warn!(path, value = %s, "expected an integer, using default");
                default
            }),
            _ => default,
        }
    }

    /// A list of scalars. A bare scalar reads as a one-element list and YAML
    /// nulls are kept as `None` entries.
    pub fn get_list(&self, path: &str) -> Option<Vec<Option<String>>> {
        match self.lookup(path)? {
            Value::Null => None,
            Value::Sequence(items) => Some(items.iter().map(scalar_to_string).collect()),
            single => Some(vec![scalar_to_string(single)]),
        }
    }

    /// Number of entries at `path`: list length, 1 for a single value, 0 if absent.
    pub fn count(&self, path: &str) -> usize {
        match self.lookup(path) {
            None | Some(Value::Null) => 0,
            Some(Value::Sequence(items)) => items.len(),
            Some(_) => 1,
        }
    }

    pub fn sub(&self, path: &str) -> Option<ConfigView> {
        self.lookup(path).cloned().map(ConfigView::from_value)
    }
}

fn parse_segment(segment: &str) -> Option<(&str, Option<usize>)> {
    match segment.split_once('(') {
        Some((key, rest)) => {
            let index = rest.strip_suffix(')')?.trim().parse().ok()?;
            Some((key, Some(index)))
        }
        None => Some((segment, None)),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Pick the configuration to load from: the explicit one if given, else the
/// file at `default_location`. A missing or broken default leaves the caller
/// without configuration.
pub fn bind_configuration(
    explicit: Option<ConfigView>,
    default_location: impl AsRef<Path>,
) -> Option<ConfigView> {
    if explicit.is_some() {
        return explicit;
    }
    let location = default_location.as_ref();
    match ConfigView::from_file(location) {
        Ok(view) => Some(view),
        Err(e) => {
            let err = crate::LoaderError::Configuration {
                location: location.display().to_string(),
                reason: e.to_string(),
            };
            error!(error = %err, "device configuration could not be loaded");
            None
        }
    }
}

/// Bind every `connector` entry (optionally nested under `knx`) with defaults applied.
pub fn parse_connectors(view: &ConfigView) -> Vec<ConnectorConfig> {
    let scoped;
    let view = if view.count("connector") == 0 && view.contains("knx") {
        match view.sub("knx") {
            Some(knx) => {
                scoped = knx;
                &scoped
            }
            None => view,
        }
    } else {
        view
    };

    (0..view.count("connector"))
        .filter_map(|i| view.sub(&format!("connector({i})")))
        .map(|c| parse_connector(&c))
        .collect()
}

fn parse_connector(c: &ConfigView) -> ConnectorConfig {
    let name = c.get_str("name").unwrap_or_default();
    let port = c.get_int("router.port", i64::from(DEFAULT_ROUTER_PORT));
    let port = u16::try_from(port).unwrap_or_else(|_| {
        warn!(connector = %name, port, "router port out of range, using default");
        DEFAULT_ROUTER_PORT
    });
    let devices = (0..c.count("device"))
        .map(|i| parse_device(c, i, &name))
        .collect();
    ConnectorConfig {
        router: RouterConfig {
            ip: c.get_str("router.ip"),
            port,
        },
        local_ip: c.get_str("localIP").unwrap_or_default(),
        enabled: c.get_bool("enabled", false),
        name,
        devices,
    }
}

fn parse_device(c: &ConfigView, i: usize, connector: &str) -> DeviceConfig {
    let key = |k: &str| format!("device({i}).{k}");
    let history_count = c.get_int(&key("historyCount"), 0);
    let history_count = u32::try_from(history_count).unwrap_or_else(|_| {
        warn!(connector, device = i, history_count, "invalid historyCount, using default depth");
        0
    });
    DeviceConfig {
        type_id: c.get_str(&key("type")),
        address: c.get_list(&key("address")),
        ipv6: c.get_str(&key("ipv6")).filter(|v| !v.trim().is_empty()),
        href: c.get_str(&key("href")).unwrap_or_default(),
        name: c.get_str(&key("name")),
        display_name: c.get_str(&key("displayName")),
        history_enabled: c.get_bool(&key("historyEnabled"), false),
        history_count,
        group_comm_enabled: c.get_bool(&key("groupCommEnabled"), false),
        refresh_enabled: c.get_bool(&key("refreshEnabled"), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const TWO_CONNECTORS: &str = r#"
connector:
  - name: "KNX Router Line 1"
    enabled: true
    router:
      ip: 10.0.0.1
    localIP: 10.0.0.2
    device:
      - type: SwitchActuator
        address: ["1/1/1", "null"]
        href: actuator1
        historyEnabled: true
        historyCount: 50
      - type: TemperatureSensor
        address: "2/0/1"
        href: temp1
        ipv6: "2001:db8::1"
  - name: spare
    router:
      ip: 10.0.0.9
      port: "3700"
"#;

    #[test]
    fn path_lookup_with_indices() {
        let view = ConfigView::from_yaml_str(TWO_CONNECTORS).unwrap();
        assert_eq!(view.count("connector"), 2);
        assert_eq!(view.count("connector(0).device"), 2);
        assert_eq!(view.get_str("connector(0).router.ip").as_deref(), Some("10.0.0.1"));
        assert_eq!(view.get_int("connector(1).router.port", 3671), 3700);
        assert!(view.get_bool("connector(0).enabled", false));
        assert!(!view.get_bool("connector(1).enabled", false));
        assert_eq!(view.get_str("connector(5).name"), None);
    }

    #[test]
    fn scalar_address_reads_as_single_entry_list() {
        let view = ConfigView::from_yaml_str(TWO_CONNECTORS).unwrap();
        assert_eq!(
            view.get_list("connector(0).device(1).address"),
            Some(vec![Some("2/0/1".to_string())])
        );
    }

    #[test]
    fn single_mapping_counts_as_one_entry() {
        let view = ConfigView::from_yaml_str(
            "connector:\n  name: solo\n  enabled: true\n  device:\n    type: SwitchActuator\n    address: [\"1/1/1\"]\n",
        )
        .unwrap();
        let connectors = parse_connectors(&view);
        assert_eq!(connectors.len(), 1);
        assert_eq!(connectors[0].name, "solo");
        assert_eq!(connectors[0].devices.len(), 1);
    }

    #[test]
    fn parse_applies_defaults() {
        let view = ConfigView::from_yaml_str(TWO_CONNECTORS).unwrap();
        let connectors = parse_connectors(&view);
        assert_eq!(connectors.len(), 2);

        let first = &connectors[0];
        assert!(first.enabled);
        assert_eq!(first.router.port, DEFAULT_ROUTER_PORT);
        assert_eq!(first.local_ip, "10.0.0.2");
        let switch = &first.devices[0];
        assert_eq!(switch.type_id.as_deref(), Some("SwitchActuator"));
        assert_eq!(
            switch.address,
            Some(vec![Some("1/1/1".to_string()), Some("null".to_string())])
        );
        assert!(switch.history_enabled);
        assert_eq!(switch.history_count, 50);
        assert!(!switch.group_comm_enabled);
        assert!(!switch.refresh_enabled);
        assert_eq!(first.devices[1].ipv6.as_deref(), Some("2001:db8::1"));

        let spare = &connectors[1];
        assert!(!spare.enabled);
        assert_eq!(spare.router.port, 3700);
        assert!(spare.devices.is_empty());
    }

    #[test]
    fn knx_wrapper_is_accepted() {
        let view = ConfigView::from_yaml_str(
            "knx:\n  connector:\n    - name: a\n    - name: b\n",
        )
        .unwrap();
        let names: Vec<_> = parse_connectors(&view).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn negative_history_count_falls_back_to_default() {
        let view = ConfigView::from_yaml_str(
            "connector:\n  - name: a\n    device:\n      - type: X\n        historyCount: -4\n",
        )
        .unwrap();
        let connectors = parse_connectors(&view);
        assert_eq!(connectors[0].devices[0].history_count, 0);
    }

    #[test]
    fn empty_ipv6_binds_as_absent() {
        let view = ConfigView::from_yaml_str(
            "connector:\n  - name: a\n    device:\n      - { type: X, ipv6: \"\" }\n      - { type: X, ipv6: \" \" }\n",
        )
        .unwrap();
        let connectors = parse_connectors(&view);
        assert_eq!(connectors[0].devices[0].ipv6, None);
        assert_eq!(connectors[0].devices[1].ipv6, None);
    }

    #[test]
    fn explicit_configuration_wins() {
        let explicit = ConfigView::from_yaml_str("connector: []").unwrap();
        let bound = bind_configuration(Some(explicit.clone()), "/nonexistent/devices.yaml");
        assert_eq!(bound, Some(explicit));
    }

    #[test]
    fn missing_default_location_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let bound = bind_configuration(None, dir.path().join("devices.yaml"));
        assert!(bound.is_none());
    }

    #[test]
    fn default_location_is_read_when_present() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TWO_CONNECTORS.as_bytes()).unwrap();
        let bound = bind_configuration(None, file.path()).unwrap();
        assert_eq!(bound.count("connector"), 2);
    }
}
