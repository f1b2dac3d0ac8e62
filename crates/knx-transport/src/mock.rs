use crate::{
    Connector, ConnectorInfo, GroupAddress, Result, RouterEndpoint, Telegram, TelegramKind,
    Timestamp, TransportError,
};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;

/// Shared record of every telegram a mock connector sent.
pub type TelegramLog = Arc<Mutex<Vec<Telegram>>>;

/// A simple in-process mock connector. Each instance is independent.
pub struct MockConnector {
    router: RouterEndpoint,
    local_address: String,
    connected: bool,
    fail_connect: bool,
    log: TelegramLog,
}

impl MockConnector {
    pub fn new(router: RouterEndpoint, local_address: impl Into<String>) -> Self {
        Self {
            router,
            local_address: local_address.into(),
            connected: false,
            fail_connect: false,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A connector whose `connect()` always fails, for exercising bring-up errors.
    pub fn unreachable(router: RouterEndpoint, local_address: impl Into<String>) -> Self {
        Self {
            fail_connect: true,
            ..Self::new(router, local_address)
        }
    }

    /// Handle to the telegram log; stays valid after the connector is shared.
    pub fn telegram_log(&self) -> TelegramLog {
        Arc::clone(&self.log)
    }

    fn record(&self, kind: TelegramKind, destination: GroupAddress, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let telegram = Telegram {
            kind,
            destination,
            data: data.to_vec(),
            timestamp: Some(Timestamp(OffsetDateTime::now_utc())),
        };
        // A poisoned log still holds every fully pushed telegram
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        log.push(telegram);
        Ok(())
    }
}

impl Connector for MockConnector {
    fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(TransportError::Io(format!(
                "mock router {} unreachable",
                self.router
            )));
        }
        self.connected = true;
        Ok(())
    }

    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            router: self.router.clone(),
            local_address: self.local_address.clone(),
            driver: "mock".to_string(),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn write_group(&self, dest: GroupAddress, data: &[u8]) -> Result<()> {
        self.record(TelegramKind::Write, dest, data)
    }

    fn read_group(&self, dest: GroupAddress) -> Result<()> {
        self.record(TelegramKind::Read, dest, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> RouterEndpoint {
        RouterEndpoint::new("10.0.0.1", crate::DEFAULT_ROUTER_PORT)
    }

    #[test]
    fn records_telegrams_after_connect() {
        let mut conn = MockConnector::new(endpoint(), "10.0.0.2");
        let log = conn.telegram_log();
        let ga = GroupAddress::three_level(1, 1, 1).unwrap();
        assert_eq!(conn.read_group(ga), Err(TransportError::NotConnected));

        conn.connect().unwrap();
        conn.read_group(ga).unwrap();
        conn.write_group(ga, &[0x01]).unwrap();

        let sent = log.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, TelegramKind::Read);
        assert_eq!(sent[1].data, vec![0x01]);
    }

    #[test]
    fn unreachable_connector_fails() {
        let mut conn = MockConnector::unreachable(endpoint(), "10.0.0.2");
        assert!(conn.connect().is_err());
        assert!(!conn.is_connected());
    }
}
