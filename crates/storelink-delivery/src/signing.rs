//! HMAC-SHA256 payload signing.
//!
//! Every outgoing message is signed with the webhook's secret key so the
//! receiver can verify provenance. The signature travels as a header (HTTP),
//! message attribute (SQS), or publish attribute (Pub/Sub).

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the lowercase-hex HMAC-SHA256 signature of `payload`.
///
/// Returns an empty string when no secret is configured; transports omit
/// empty signatures where their wire format allows it.
pub fn signature_for_payload(payload: &[u8], secret: Option<&str>) -> String {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return String::new();
    };

    // HMAC accepts keys of any length; the error arm is unreachable.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
