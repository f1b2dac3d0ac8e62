use knx_transport::DEFAULT_ROUTER_PORT;
use serde::Serialize;

/// One `connector` entry of the device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfig {
    pub name: String,
    pub enabled: bool,
    pub router: RouterConfig,
    #[serde(rename = "localIP")]
    pub local_ip: String,
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterConfig {
    pub ip: Option<String>,
    pub port: u16,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ip: None,
            port: DEFAULT_ROUTER_PORT,
        }
    }
}

/// One `device` entry below a connector.
///
/// `type_id` stays optional so an entry without one can be reported and
/// skipped instead of failing the whole configuration. A missing `address`
/// loads like an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(rename = "type")]
    pub type_id: Option<String>,
    /// `None` entries come from YAML nulls and are treated like the sentinel.
    pub address: Option<Vec<Option<String>>>,
    pub ipv6: Option<String>,
    pub href: String,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub history_enabled: bool,
    /// Zero means "use the broker's default depth".
    pub history_count: u32,
    pub group_comm_enabled: bool,
    pub refresh_enabled: bool,
}
