//! # gateway::signer
//!
//! OKX request signature: `base64(HMAC-SHA256(secret, timestamp + method + path + body))`.
//!
//! The same tag authenticates REST calls (`OK-ACCESS-SIGN`) and the private
//! WebSocket login frame (method `GET`, path [`WS_VERIFY_PATH`], empty body).

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Path signed by the WebSocket login frame.
pub const WS_VERIFY_PATH: &str = "/users/self/verify";

/// Stateless signer. The keyed MAC is built once; each call works on a clone.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::Missing(vec!["OKX_SECRET"]));
        }
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        Ok(Self { mac })
    }

    pub fn sign(&self, timestamp: &str, method: &str, path: &str, body: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(timestamp.as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        BASE64_STANDARD.encode(mac.finalize().into_bytes())
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

/// Current UTC time as `2020-12-08T09:08:57.715Z`. Never cache it: OKX
/// rejects requests whose timestamp drifts more than 30s.
pub fn timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_secret_is_rejected_at_construction() {
        assert!(matches!(Signer::new(""), Err(AuthError::Missing(_))));
    }

    #[test]
    fn known_login_signature() {
        let signer = Signer::new("secret").unwrap();
        let sig = signer.sign("2020-12-08T09:08:57.715Z", "GET", WS_VERIFY_PATH, "");
        assert_eq!(sig, "LSLbxnPWM7dl4oMFFC9S1qW7yJS7ab8VgnW7y7FoEiQ=");
    }

    #[test]
    fn known_order_signature() {
        let signer = Signer::new("22582BD0CFF14C41EDBF1AB98506286D").unwrap();
        let sig = signer.sign(
            "2020-12-08T09:08:57.715Z",
            "POST",
            "/api/v5/trade/order",
            r#"{"instId":"BTC-USDT","side":"buy"}"#,
        );
        assert_eq!(sig, "zmyb6X+C82MRtc7BTVirfIGW6UYRjcmBxRhn68EyGI4=");
    }

    #[test]
    fn query_string_is_part_of_the_signature() {
        let signer = Signer::new("secret").unwrap();
        let ts = "2024-01-01T00:00:00.000Z";
        let with_query = signer.sign(ts, "GET", "/api/v5/account/balance?ccy=USDT", "");
        let without = signer.sign(ts, "GET", "/api/v5/account/balance", "");
        assert_eq!(with_query, "gLs6l9GXeLDJZxxFYmlsn8GeYlqGeSOJKAI+LyQRTqo=");
        assert_ne!(with_query, without);
    }

    #[test]
    fn signing_is_deterministic() {
        let signer = Signer::new("abc").unwrap();
        let cases = [
            ("2021-01-01T00:00:00.000Z", "GET", "/a", ""),
            ("2022-06-30T12:34:56.789Z", "POST", "/api/v5/trade/order", "{\"sz\":\"1\"}"),
            ("1999-12-31T23:59:59.999Z", "DELETE", "/x?y=z", "body"),
        ];
        for (ts, method, path, body) in cases {
            let first = signer.sign(ts, method, path, body);
            let again = signer.clone().sign(ts, method, path, body);
            assert_eq!(first, again);
        }
    }

    #[test]
    fn timestamp_has_millisecond_precision_and_z_suffix() {
        let at = Utc.with_ymd_and_hms(2020, 12, 8, 9, 8, 57).unwrap()
            + chrono::Duration::milliseconds(715);
        assert_eq!(format_timestamp(at), "2020-12-08T09:08:57.715Z");

        let now = timestamp();
        assert_eq!(now.len(), 24);
        assert!(now.ends_with('Z'));
    }
}
