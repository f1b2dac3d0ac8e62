use core::fmt;
use core::str::FromStr;
use time::OffsetDateTime;

use crate::TransportError;

/// Well-known KNXnet/IP port used by routers and interfaces.
pub const DEFAULT_ROUTER_PORT: u16 = 3671;

/// 16-bit KNX group address
///
/// Accepts the three-level `main/middle/sub` notation, the two-level
/// `main/sub` notation and a bare raw value. Always displayed in three-level
/// notation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GroupAddress {
    raw: u16,
}

impl GroupAddress {
    pub fn from_raw(raw: u16) -> Self {
        Self { raw }
    }

    pub fn three_level(main: u8, middle: u8, sub: u8) -> Option<Self> {
        if main > 0x1F || middle > 0x07 {
            return None;
        }
        let raw = (u16::from(main) << 11) | (u16::from(middle) << 8) | u16::from(sub);
        Some(Self { raw })
    }

    pub fn two_level(main: u8, sub: u16) -> Option<Self> {
        if main > 0x1F || sub > 0x07FF {
            return None;
        }
        Some(Self {
            raw: (u16::from(main) << 11) | sub,
        })
    }

    pub fn raw(&self) -> u16 {
        self.raw
    }

    pub fn main(&self) -> u8 {
        (self.raw >> 11) as u8
    }

    pub fn middle(&self) -> u8 {
        ((self.raw >> 8) & 0x07) as u8
    }

    pub fn sub(&self) -> u8 {
        (self.raw & 0xFF) as u8
    }
}

impl fmt::Display for GroupAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.main(), self.middle(), self.sub())
    }
}

impl FromStr for GroupAddress {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TransportError::InvalidAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [main, middle, sub] => {
                let main: u8 = main.parse().map_err(|_| invalid())?;
                let middle: u8 = middle.parse().map_err(|_| invalid())?;
                let sub: u8 = sub.parse().map_err(|_| invalid())?;
                GroupAddress::three_level(main, middle, sub).ok_or_else(invalid)
            }
            [main, sub] => {
                let main: u8 = main.parse().map_err(|_| invalid())?;
                let sub: u16 = sub.parse().map_err(|_| invalid())?;
                GroupAddress::two_level(main, sub).ok_or_else(invalid)
            }
            [raw] => {
                let raw: u16 = raw.parse().map_err(|_| invalid())?;
                Ok(GroupAddress::from_raw(raw))
            }
            _ => Err(invalid()),
        }
    }
}

/// Router (or interface) a connector talks to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouterEndpoint {
    pub host: String,
    pub port: u16,
}

impl RouterEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RouterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug)]
pub struct ConnectorInfo {
    pub router: RouterEndpoint,
    pub local_address: String,
    pub driver: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TelegramKind {
    Read,
    Write,
}

/// A group telegram as seen by a connector backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Telegram {
    pub kind: TelegramKind,
    pub destination: GroupAddress,
    pub data: Vec<u8>,
    pub timestamp: Option<Timestamp>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_level_address() {
        let ga: GroupAddress = "1/1/1".parse().unwrap();
        assert_eq!(ga.main(), 1);
        assert_eq!(ga.middle(), 1);
        assert_eq!(ga.sub(), 1);
        assert_eq!(ga.raw(), 0x0901);
        assert_eq!(ga.to_string(), "1/1/1");
    }

    #[test]
    fn parses_two_level_and_raw_address() {
        let two: GroupAddress = "1/257".parse().unwrap();
        assert_eq!(two.to_string(), "1/1/1");
        let raw: GroupAddress = "2305".parse().unwrap();
        assert_eq!(raw, two);
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        assert!("32/0/0".parse::<GroupAddress>().is_err());
        assert!("0/8/0".parse::<GroupAddress>().is_err());
        assert!("0/0/256".parse::<GroupAddress>().is_err());
        assert!("not-an-address".parse::<GroupAddress>().is_err());
        assert!("1/2/3/4".parse::<GroupAddress>().is_err());
        assert!("".parse::<GroupAddress>().is_err());
    }

    #[test]
    fn endpoint_display() {
        let ep = RouterEndpoint::new("10.0.0.1", DEFAULT_ROUTER_PORT);
        assert_eq!(ep.to_string(), "10.0.0.1:3671");
    }
}
