use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// An opaque bearer token presented by, or on behalf of, a caller
///
/// The token is never printed in full by accident: both `Debug` and
/// `Display` print a placeholder unless the alternate flag (`{:#}`) is
/// used. Only the header segment is ever read by this crate, and only for
/// routing.
#[braid(serde, debug = "owned", display = "owned")]
pub struct BearerToken;

limited_reveal!(BearerTokenRef: "BEARER TOKEN", 12);

/// The unverified key read from a token header, used to select the
/// authority that will be asked to verify the token
#[braid(serde)]
pub struct RoutingKey;

/// An identity as reported by a verifying authority
#[braid(serde)]
pub struct Identity;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_redacted_by_default() {
        let token = BearerToken::from_static("eyJraWQiOiJjbHVzdGVyLWEifQ.payload.signature");

        assert_eq!(format!("{token}"), "***BEARER TOKEN***");
        assert_eq!(format!("{token:?}"), "***BEARER TOKEN***");
    }

    #[test]
    fn bearer_token_alternate_debug_is_truncated() {
        let token = BearerToken::from_static("eyJraWQiOiJjbHVzdGVyLWEifQ.payload.signature");

        assert_eq!(format!("{token:#?}"), "\"eyJraWQiOiJ…\"");
        assert_eq!(format!("{token:#5?}"), "\"eyJr…\"");
    }

    #[test]
    fn bearer_token_alternate_display_is_complete() {
        let raw = "eyJraWQiOiJjbHVzdGVyLWEifQ.payload.signature";
        let token = BearerToken::from_static(raw);

        assert_eq!(format!("{token:#}"), raw);
    }

    #[test]
    fn routing_key_displays_plainly() {
        let key = RoutingKey::from_static("cluster-a");

        assert_eq!(key.to_string(), "cluster-a");
    }
}
