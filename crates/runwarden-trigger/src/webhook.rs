//! Webhook request verification.

use crate::error::{Result, TriggerError};
use hmac::{Hmac, Mac};
use ipnet::IpNet;
use sha2::Sha256;
use std::net::IpAddr;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes `sha256=<hex>` for `payload`, as senders are expected to.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Checks an HMAC-SHA256 signature over the raw body. Accepts both
/// `sha256=<hex>` and bare hex; the digest comparison is constant time.
pub fn validate_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let hex_digest = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Parses a CIDR block. A bare address is treated as a single-host range.
pub fn parse_allowed_range(range: &str) -> Result<IpNet> {
    let range = range.trim();
    if let Ok(net) = range.parse::<IpNet>() {
        return Ok(net);
    }
    range
        .parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| TriggerError::InvalidAllowedRange(range.to_string()))
}

/// IPv4-mapped IPv6 callers are compared as IPv4.
pub fn source_allowed(range: &IpNet, caller: IpAddr) -> bool {
    range.contains(&caller.to_canonical())
}
