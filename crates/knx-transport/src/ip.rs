use crate::{
    Connector, ConnectorInfo, GroupAddress, Result, RouterEndpoint, Telegram, TelegramKind,
    Timestamp, TransportError,
};
use std::net::UdpSocket;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

const HEADER_LEN: u8 = 0x06;
const PROTOCOL_VERSION: u8 = 0x10;
const ROUTING_INDICATION: u16 = 0x0530;
const CEMI_L_DATA_IND: u8 = 0x29;
// standard frame, no repeat, broadcast, low priority
const CTRL1: u8 = 0xBC;
// group destination, hop count 6
const CTRL2: u8 = 0xE0;
const APCI_READ: u8 = 0x00;
const APCI_RESPONSE: u8 = 0x40;
const APCI_WRITE: u8 = 0x80;

/// KNXnet/IP routing connector over UDP.
pub struct IpConnector {
    router: RouterEndpoint,
    local_address: String,
    source: u16,
    socket: Option<UdpSocket>,
}

impl IpConnector {
    pub fn new(router: RouterEndpoint, local_address: impl Into<String>) -> Self {
        Self {
            router,
            local_address: local_address.into(),
            // 1.1.255
            source: 0x11FF,
            socket: None,
        }
    }

    /// Individual address written as the telegram source.
    pub fn with_source(mut self, source: u16) -> Self {
        self.source = source;
        self
    }

    /// Block for the next routing indication from the router.
    pub fn recv_telegram(&self, timeout_ms: Option<u64>) -> Result<Telegram> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        socket
            .set_read_timeout(timeout_ms.map(Duration::from_millis))
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let mut buf = [0u8; 512];
        let n = socket
            .recv(&mut buf)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let mut telegram = Self::parse_telegram(&buf[..n])?;
        telegram.timestamp = Some(Timestamp(OffsetDateTime::now_utc()));
        Ok(telegram)
    }

    fn encode_telegram(source: u16, kind: TelegramKind, dest: GroupAddress, data: &[u8]) -> Vec<u8> {
        let mut apdu = Vec::with_capacity(2 + data.len());
        apdu.push(0x00);
        match kind {
            TelegramKind::Read => apdu.push(APCI_READ),
            TelegramKind::Write => match data {
                // values up to 6 bits travel inside the APCI octet
                [small] if *small <= 0x3F => apdu.push(APCI_WRITE | small),
                _ => {
                    apdu.push(APCI_WRITE);
                    apdu.extend_from_slice(data);
                }
            },
        }

        let mut cemi = Vec::with_capacity(9 + apdu.len());
        cemi.push(CEMI_L_DATA_IND);
        cemi.push(0x00);
        cemi.push(CTRL1);
        cemi.push(CTRL2);
        cemi.extend_from_slice(&source.to_be_bytes());
        cemi.extend_from_slice(&dest.raw().to_be_bytes());
        cemi.push((apdu.len() - 1) as u8);
        cemi.extend_from_slice(&apdu);

        let total = (6 + cemi.len()) as u16;
        let mut out = Vec::with_capacity(total as usize);
        out.push(HEADER_LEN);
        out.push(PROTOCOL_VERSION);
        out.extend_from_slice(&ROUTING_INDICATION.to_be_bytes());
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(&cemi);
        out
    }

    fn parse_telegram(frame: &[u8]) -> Result<Telegram> {
        if frame.len() < 6 || frame[0] != HEADER_LEN || frame[1] != PROTOCOL_VERSION {
            return Err(TransportError::InvalidTelegram("header"));
        }
        let service = u16::from_be_bytes([frame[2], frame[3]]);
        if service != ROUTING_INDICATION {
            return Err(TransportError::Unsupported("only routing indications are handled"));
        }
        let cemi = &frame[6..];
        if cemi.len() < 2 || cemi[0] != CEMI_L_DATA_IND {
            return Err(TransportError::InvalidTelegram("cemi message code"));
        }
        let body = cemi
            .get(2 + cemi[1] as usize..)
            .ok_or(TransportError::InvalidTelegram("additional info length"))?;
        if body.len() < 9 {
            return Err(TransportError::InvalidTelegram("short cemi"));
        }
        if body[1] & 0x80 == 0 {
            return Err(TransportError::InvalidTelegram("individual destination"));
        }
        let destination = GroupAddress::from_raw(u16::from_be_bytes([body[4], body[5]]));
        let npdu_len = body[6] as usize;
        let apdu = &body[7..];
        if apdu.len() < npdu_len + 1 {
            return Err(TransportError::InvalidTelegram("short apdu"));
        }
        let apci = apdu[1] & 0xC0;
        let (kind, data) = match apci {
            APCI_READ => (TelegramKind::Read, Vec::new()),
            APCI_WRITE | APCI_RESPONSE if npdu_len == 1 => {
                (TelegramKind::Write, vec![apdu[1] & 0x3F])
            }
            APCI_WRITE | APCI_RESPONSE => {
                let data = apdu
                    .get(2..=npdu_len)
                    .ok_or(TransportError::InvalidTelegram("apdu length"))?;
                (TelegramKind::Write, data.to_vec())
            }
            _ => return Err(TransportError::InvalidTelegram("apci")),
        };
        Ok(Telegram {
            kind,
            destination,
            data,
            timestamp: None,
        })
    }

    fn send(&self, kind: TelegramKind, dest: GroupAddress, data: &[u8]) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotConnected)?;
        let frame = Self::encode_telegram(self.source, kind, dest, data);
        socket
            .send(&frame)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        debug!(router = %self.router, destination = %dest, ?kind, "sent routing indication");
        Ok(())
    }
}

impl Connector for IpConnector {
    fn connect(&mut self) -> Result<()> {
        let socket = UdpSocket::bind((self.local_address.as_str(), 0))
            .map_err(|e| TransportError::Io(format!("bind {}: {e}", self.local_address)))?;
        socket
            .connect((self.router.host.as_str(), self.router.port))
            .map_err(|e| TransportError::Io(format!("connect {}: {e}", self.router)))?;
        self.socket = Some(socket);
        Ok(())
    }

    fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            router: self.router.clone(),
            local_address: self.local_address.clone(),
            driver: "knxnet-ip-routing".to_string(),
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn write_group(&self, dest: GroupAddress, data: &[u8]) -> Result<()> {
        self.send(TelegramKind::Write, dest, data)
    }

    fn read_group(&self, dest: GroupAddress) -> Result<()> {
        self.send(TelegramKind::Read, dest, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_short_group_write() {
        let dest = GroupAddress::three_level(1, 1, 1).unwrap();
        let frame = IpConnector::encode_telegram(0x11FF, TelegramKind::Write, dest, &[0x01]);
        assert_eq!(
            frame,
            vec![
                0x06, 0x10, 0x05, 0x30, 0x00, 0x11, 0x29, 0x00, 0xBC, 0xE0, 0x11, 0xFF, 0x09,
                0x01, 0x01, 0x00, 0x81
            ]
        );
    }

    #[test]
    fn parses_long_group_write() {
        let dest = GroupAddress::three_level(2, 0, 10).unwrap();
        let frame =
            IpConnector::encode_telegram(0x11FF, TelegramKind::Write, dest, &[0x0C, 0x1A]);
        let telegram = IpConnector::parse_telegram(&frame).unwrap();
        assert_eq!(telegram.kind, TelegramKind::Write);
        assert_eq!(telegram.destination, dest);
        assert_eq!(telegram.data, vec![0x0C, 0x1A]);
    }

    #[test]
    fn rejects_non_routing_frames() {
        assert!(IpConnector::parse_telegram(&[0x06, 0x10, 0x02, 0x01, 0x00, 0x06]).is_err());
        assert!(IpConnector::parse_telegram(&[0x01]).is_err());
    }

    #[test]
    fn write_without_payload_is_rejected() {
        // npdu length 0 with GroupValueWrite APCI bits
        let frame = [
            0x06, 0x10, 0x05, 0x30, 0x00, 0x11, 0x29, 0x00, 0xBC, 0xE0, 0x11, 0xFF, 0x09, 0x01,
            0x00, 0x00, 0x80,
        ];
        assert_eq!(
            IpConnector::parse_telegram(&frame),
            Err(TransportError::InvalidTelegram("apdu length"))
        );
    }

    #[test]
    fn round_trip_through_a_local_router() {
        let router = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = router.local_addr().unwrap().port();
        let mut conn = IpConnector::new(RouterEndpoint::new("127.0.0.1", port), "127.0.0.1")
            .with_source(0x1101);
        conn.connect().unwrap();

        let dest = GroupAddress::three_level(1, 1, 1).unwrap();
        conn.write_group(dest, &[0x01]).unwrap();
        let mut buf = [0u8; 64];
        router
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let (n, peer) = router.recv_from(&mut buf).unwrap();
        assert_eq!(n, 17);
        // source individual address follows the two control octets
        assert_eq!(&buf[10..12], &[0x11, 0x01]);

        let reply = IpConnector::encode_telegram(0x1102, TelegramKind::Write, dest, &[0x0C, 0x1A]);
        router.send_to(&reply, peer).unwrap();
        let telegram = conn.recv_telegram(Some(2000)).unwrap();
        assert_eq!(telegram.destination, dest);
        assert_eq!(telegram.data, vec![0x0C, 0x1A]);
        assert!(telegram.timestamp.is_some());
    }

    #[test]
    fn send_before_connect_fails() {
        let conn = IpConnector::new(RouterEndpoint::new("127.0.0.1", 3671), "127.0.0.1");
        let dest = GroupAddress::from_raw(1);
        assert_eq!(conn.read_group(dest), Err(TransportError::NotConnected));
    }
}
