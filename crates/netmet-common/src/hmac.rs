//! HMAC request authentication (spec §6 "HMAC auth").
//!
//! Ported from `netmet/utils/secure.py`: the digest is a *double*
//! HMAC-SHA-384 — `HMAC(hex(HMAC(key, body+ts)), body+ts)` — not a plain
//! single HMAC. Built on `aws-lc-rs`.

use aws_lc_rs::hmac as lc_hmac;

use crate::clock::ClockSource;
use crate::error::Error;

/// Requests older than this are rejected, per spec §6.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 30;

pub const TIMESTAMP_HEADER: &str = "X-AUTH-HMAC-TIMESTAMP";
pub const DIGEST_HEADER: &str = "X-AUTH-HMAC-DIGEST";

/// `HMAC(hex(HMAC(key, data)), data)`, hex-encoded.
pub fn generate_digest(data: &[u8], key: &[u8]) -> String {
    let inner_key = lc_hmac::Key::new(lc_hmac::HMAC_SHA384, key);
    let inner = lc_hmac::sign(&inner_key, data);
    let inner_hex = data_encoding::HEXLOWER.encode(inner.as_ref());

    let outer_key = lc_hmac::Key::new(lc_hmac::HMAC_SHA384, inner_hex.as_bytes());
    let outer = lc_hmac::sign(&outer_key, data);
    data_encoding::HEXLOWER.encode(outer.as_ref())
}

/// True iff `digest` is a valid digest of `data` under any of `valid_keys`.
pub fn is_valid_digest(digest: &str, data: &[u8], valid_keys: &[String]) -> bool {
    valid_keys
        .iter()
        .any(|key| constant_time_eq(digest, &generate_digest(data, key.as_bytes())))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Builds the two headers a caller attaches to an authenticated request.
/// Returns an empty map when `key` is `None` and no default key is supplied.
pub fn generate_headers(data: &[u8], key: &[u8], clock: &ClockSource) -> Vec<(String, String)> {
    let ts = clock.now_secs().to_string();
    let mut signed = data.to_vec();
    signed.extend_from_slice(ts.as_bytes());

    vec![
        (TIMESTAMP_HEADER.to_string(), ts),
        (DIGEST_HEADER.to_string(), generate_digest(&signed, key)),
    ]
}

/// Verifies an inbound request's HMAC headers against the configured keys.
///
/// Mirrors `secure.py::check_hmac_auth`: missing headers, a timestamp older
/// than [`MAX_TIMESTAMP_SKEW_SECS`], or a digest that matches none of
/// `valid_keys` all fail closed with [`Error::AuthFailure`].
pub fn verify_request(
    body: &[u8],
    timestamp_header: Option<&str>,
    digest_header: Option<&str>,
    valid_keys: &[String],
    clock: &ClockSource,
) -> Result<(), Error> {
    let (timestamp, digest) = match (timestamp_header, digest_header) {
        (Some(t), Some(d)) => (t, d),
        _ => {
            return Err(Error::AuthFailure(format!(
                "missing {TIMESTAMP_HEADER} or {DIGEST_HEADER}"
            )));
        }
    };

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| Error::AuthFailure("malformed HMAC timestamp".to_string()))?;
    let now = clock.now_secs() as i64;
    if now - ts > MAX_TIMESTAMP_SKEW_SECS {
        return Err(Error::AuthFailure("HMAC digest expired".to_string()));
    }

    let mut signed = body.to_vec();
    signed.extend_from_slice(timestamp.as_bytes());

    if !is_valid_digest(digest, &signed, valid_keys) {
        return Err(Error::AuthFailure("wrong or missing digest".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_digest_verifies() {
        let clock = ClockSource::new_mock(1_700_000_000_000);
        let key = b"super-secret";
        let body = b"[{\"east-west\":{}}]";

        let headers = generate_headers(body, key, &clock);
        let ts = &headers[0].1;
        let digest = &headers[1].1;

        let mut signed = body.to_vec();
        signed.extend_from_slice(ts.as_bytes());
        assert!(is_valid_digest(digest, &signed, &[String::from_utf8(key.to_vec()).unwrap()]));
    }

    #[test]
    fn verify_request_accepts_fresh_valid_signature() {
        let clock = ClockSource::new_mock(1_700_000_000_000);
        let keys = vec!["key-a".to_string(), "key-b".to_string()];
        let body = b"payload";

        let headers = generate_headers(body, b"key-b", &clock);

        assert!(
            verify_request(
                body,
                Some(&headers[0].1),
                Some(&headers[1].1),
                &keys,
                &clock
            )
            .is_ok()
        );
    }

    #[test]
    fn verify_request_rejects_expired_timestamp() {
        let mut clock = ClockSource::new_mock(1_700_000_000_000);
        let keys = vec!["key-a".to_string()];
        let body = b"payload";
        let headers = generate_headers(body, b"key-a", &clock);

        clock.advance_ms(31_000);

        let err = verify_request(
            body,
            Some(&headers[0].1),
            Some(&headers[1].1),
            &keys,
            &clock,
        )
        .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn verify_request_rejects_missing_headers() {
        let clock = ClockSource::new_mock(0);
        let err = verify_request(b"x", None, None, &["k".to_string()], &clock).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn verify_request_rejects_wrong_key() {
        let clock = ClockSource::new_mock(1_700_000_000_000);
        let body = b"payload";
        let headers = generate_headers(body, b"wrong-key", &clock);

        let err = verify_request(
            body,
            Some(&headers[0].1),
            Some(&headers[1].1),
            &["right-key".to_string()],
            &clock,
        )
        .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }
}
