//! HTTP Basic auth gate (spec §6), ported from
//! `netmet/utils/secure.py::check_basic_auth`: a no-op unless `users` is
//! non-empty, in which case the `Authorization` header must carry
//! `Basic base64(user:pass)` for a `user` present in `users` with the
//! matching password.

use std::collections::HashMap;

pub const WWW_AUTHENTICATE: &str = "Basic realm=\"Login Required\"";

/// `false` means the caller should answer 401 with [`WWW_AUTHENTICATE`].
/// Always `true` when `users` is empty, matching the Python decorator's
/// "only enforced if any users are configured" behavior.
pub fn check(authorization_header: Option<&str>, users: &HashMap<String, String>) -> bool {
    if users.is_empty() {
        return true;
    }

    let Some((user, pass)) = authorization_header.and_then(decode_basic) else {
        return false;
    };
    users.get(&user).is_some_and(|expected| expected == &pass)
}

fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = data_encoding::BASE64.decode(encoded.trim().as_bytes()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Parses the `NETMET_USERS` environment format (comma-delimited
/// `user:pass` pairs) into the `users` map `check` expects.
pub fn parse_users(entries: &[String]) -> HashMap<String, String> {
    entries
        .iter()
        .filter_map(|entry| entry.split_once(':'))
        .map(|(user, pass)| (user.to_string(), pass.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_header(user: &str, pass: &str) -> String {
        format!("Basic {}", data_encoding::BASE64.encode(format!("{user}:{pass}").as_bytes()))
    }

    #[test]
    fn check_is_a_no_op_with_no_configured_users() {
        assert!(check(None, &HashMap::new()));
    }

    #[test]
    fn check_accepts_matching_credentials() {
        let users = parse_users(&["alice:hunter2".to_string()]);
        let header = basic_header("alice", "hunter2");
        assert!(check(Some(&header), &users));
    }

    #[test]
    fn check_rejects_wrong_password() {
        let users = parse_users(&["alice:hunter2".to_string()]);
        let header = basic_header("alice", "wrong");
        assert!(!check(Some(&header), &users));
    }

    #[test]
    fn check_rejects_missing_header_when_users_configured() {
        let users = parse_users(&["alice:hunter2".to_string()]);
        assert!(!check(None, &users));
    }
}
