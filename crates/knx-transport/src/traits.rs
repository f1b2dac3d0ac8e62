use crate::{ConnectorInfo, GroupAddress, Result};

/// A minimal blocking KNX bus connector.
///
/// A connector is configured and connected while still exclusively owned, then
/// shared (`Arc<dyn Connector>`) by every device built on top of it.
pub trait Connector: Send + Sync {
    /// Establish the link to the router. May fail; no retries are implied.
    fn connect(&mut self) -> Result<()>;

    /// Describe the endpoint this connector talks to.
    fn info(&self) -> ConnectorInfo;

    fn is_connected(&self) -> bool;

    /// Send a GroupValueWrite to `dest`.
    fn write_group(&self, dest: GroupAddress, data: &[u8]) -> Result<()>;

    /// Send a GroupValueRead to `dest`. The response arrives as a bus event.
    fn read_group(&self, dest: GroupAddress) -> Result<()>;
}
