//! Transport negotiation types
//!
//! The prepare contract: the hosting layer hands over the viewer's target
//! address and key material, the engine answers with the allocated return
//! port and a fresh SSRC. Transport parameters are fixed once negotiated.

use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Address family for the allocated return socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressVersion {
    Ipv4,
    Ipv6,
}

impl AddressVersion {
    /// Wildcard bind address with an ephemeral port
    pub fn bind_addr(&self) -> &'static str {
        match self {
            AddressVersion::Ipv4 => "0.0.0.0:0",
            AddressVersion::Ipv6 => "[::]:0",
        }
    }
}

/// Negotiated SRTP crypto suite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SrtpCryptoSuite {
    #[default]
    AesCm128HmacSha1_80,
}

impl SrtpCryptoSuite {
    /// Suite name in the media tool's argument format
    pub fn as_arg(&self) -> &'static str {
        match self {
            SrtpCryptoSuite::AesCm128HmacSha1_80 => "AES_CM_128_HMAC_SHA1_80",
        }
    }
}

/// SRTP key material supplied by the peer and echoed back at prepare
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtpParameters {
    /// 16-byte master key
    pub key: Vec<u8>,
    /// 14-byte master salt
    pub salt: Vec<u8>,
}

impl SrtpParameters {
    pub fn new(key: Vec<u8>, salt: Vec<u8>) -> Self {
        Self { key, salt }
    }

    /// Key and salt concatenated and base64-encoded for the output target
    pub fn key_material(&self) -> String {
        let mut buf = Vec::with_capacity(self.key.len() + self.salt.len());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.salt);
        STANDARD.encode(buf)
    }
}

/// Prepare request from the hosting layer
#[derive(Debug, Clone)]
pub struct PrepareRequest {
    /// Caller-provided session id, unique for the session's lifetime
    pub session_id: String,
    /// Viewer address the stream is sent to
    pub target_address: IpAddr,
    pub address_version: AddressVersion,
    /// Viewer port receiving the video stream
    pub target_port: u16,
    pub crypto: SrtpCryptoSuite,
    pub srtp: SrtpParameters,
}

/// Prepare response: allocated resources plus echoed key material
#[derive(Debug, Clone)]
pub struct PrepareResponse {
    pub local_port: u16,
    pub ssrc: u32,
    pub srtp: SrtpParameters,
}

/// Fixed transport parameters of one negotiated session
#[derive(Debug, Clone)]
pub struct TransportContext {
    pub target_address: IpAddr,
    pub target_port: u16,
    pub local_port: u16,
    pub ssrc: u32,
    pub crypto: SrtpCryptoSuite,
    pub srtp: SrtpParameters,
}

impl TransportContext {
    /// Output target URL for the media tool
    pub fn srtp_url(&self, packet_size: u32) -> String {
        let host = match self.target_address {
            IpAddr::V4(addr) => addr.to_string(),
            IpAddr::V6(addr) => format!("[{}]", addr),
        };
        format!(
            "srtp://{}:{}?rtcpport={}&pkt_size={}",
            host, self.target_port, self.target_port, packet_size
        )
    }
}
