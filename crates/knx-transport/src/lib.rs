//! knx-transport: KNX bus connector abstractions
//!
//! This crate provides the [`Connector`] trait that device implementations talk
//! through, the [`GroupAddress`] type used to address datapoints on the bus, and
//! feature-gated backends. The default build enables both the KNXnet/IP routing
//! connector and an in-process `mock` connector so tests run on any host.

mod types;
pub use types::{ConnectorInfo, GroupAddress, RouterEndpoint, Telegram, TelegramKind, Timestamp};
pub use types::DEFAULT_ROUTER_PORT;

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::Connector;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockConnector, TelegramLog};

#[cfg(feature = "ip")]
mod ip;

#[cfg(feature = "ip")]
pub use ip::IpConnector;
