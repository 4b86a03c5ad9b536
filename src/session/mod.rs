//! Stream session management
//!
//! Transport negotiation, per-session lifecycle, video parameter policy,
//! and the keep-alive watchdog.

pub mod keepalive;
pub mod manager;
pub mod params;
pub mod state;
pub mod transport;

pub use keepalive::{KeepAliveMonitor, KeepAliveNotice};
pub use manager::StreamSessionManager;
pub use params::VideoParameters;
pub use state::{SessionPhase, StreamSession};
pub use transport::{
    AddressVersion, PrepareRequest, PrepareResponse, SrtpCryptoSuite, SrtpParameters,
    TransportContext,
};
