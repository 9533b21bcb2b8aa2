//! `otpauth://{totp|hotp}/{label}?secret=...` parsing and synthesis.

use super::{
    normalize_secret, OtpAlgorithm, OtpEncoder, OtpKind, OtpToken, DEFAULT_DIGITS,
    DEFAULT_PERIOD, STEAM_DIGITS,
};

const SCHEME: &str = "otpauth://";

/// True when `input` starts with the `otpauth://` scheme (any case).
pub fn has_otpauth_scheme(input: &str) -> bool {
    input
        .get(..SCHEME.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(SCHEME))
}

/// Byte offset of the first `otpauth://` occurrence in `text`.
pub fn find_otpauth(text: &str) -> Option<usize> {
    text.to_ascii_lowercase().find(SCHEME)
}

/// Parse a fully qualified OTP URI. Hints are applied by the caller.
pub fn parse(uri: &str) -> Option<OtpToken> {
    let trimmed = uri.trim();
    if !has_otpauth_scheme(trimmed) {
        return None;
    }
    let rest = &trimmed[SCHEME.len()..];

    let (kind_raw, remainder) = rest.split_once('/')?;
    let is_hotp = if kind_raw.eq_ignore_ascii_case("totp") {
        false
    } else if kind_raw.eq_ignore_ascii_case("hotp") {
        true
    } else {
        return None;
    };

    let (label_raw, query_raw) = remainder.split_once('?').unwrap_or((remainder, ""));

    // The issuer prefix is separated by a literal colon; an encoded colon
    // belongs to the account name.
    let (issuer_from_label, name) = match label_raw.split_once(':') {
        Some((issuer, account)) => (
            percent_decode(issuer)?.trim().to_string(),
            percent_decode(account)?.trim().to_string(),
        ),
        None => (String::new(), percent_decode(label_raw)?.trim().to_string()),
    };

    let mut secret = None;
    let mut issuer_from_query = None;
    let mut algorithm = OtpAlgorithm::Sha1;
    let mut digits = DEFAULT_DIGITS;
    let mut period = DEFAULT_PERIOD;
    let mut counter: u64 = 0;
    let mut encoder = OtpEncoder::Standard;

    for pair in query_raw.split('&').filter(|part| !part.is_empty()) {
        let (key_raw, value_raw) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(key_raw)?.to_ascii_lowercase();
        let value = percent_decode(value_raw)?;
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.as_str() {
            "secret" => secret = Some(normalize_secret(value)?),
            "issuer" => issuer_from_query = Some(value.to_string()),
            "algorithm" => algorithm = value.parse().ok()?,
            "digits" => digits = value.parse().ok()?,
            "period" => period = value.parse().ok()?,
            "counter" => counter = value.parse().ok()?,
            "encoder" if value.eq_ignore_ascii_case("steam") => encoder = OtpEncoder::Steam,
            _ => {}
        }
    }

    let kind = if is_hotp {
        OtpKind::Hotp { counter }
    } else {
        OtpKind::Totp { period }
    };

    let token = OtpToken {
        kind,
        algorithm,
        digits,
        secret: secret?,
        issuer: issuer_from_query.unwrap_or(issuer_from_label),
        name,
        encoder,
    };

    let token = match token.encoder {
        OtpEncoder::Steam => token.into_steam(),
        OtpEncoder::Standard => token,
    };
    token.is_valid().then_some(token)
}

/// Render `token` as a canonical URI carrying every field.
pub fn synthesize(token: &OtpToken) -> String {
    let label = if token.issuer.is_empty() {
        percent_encode(&token.name)
    } else {
        format!(
            "{}:{}",
            percent_encode(&token.issuer),
            percent_encode(&token.name)
        )
    };

    let mut uri = format!(
        "{}{}/{}?secret={}",
        SCHEME,
        token.kind.as_uri_value(),
        label,
        token.secret
    );
    if !token.issuer.is_empty() {
        uri.push_str("&issuer=");
        uri.push_str(&percent_encode(&token.issuer));
    }
    uri.push_str("&algorithm=");
    uri.push_str(token.algorithm.as_uri_value());
    uri.push_str(&format!("&digits={}", token.digits));
    match token.kind {
        OtpKind::Totp { period } => uri.push_str(&format!("&period={}", period)),
        OtpKind::Hotp { counter } => uri.push_str(&format!("&counter={}", counter)),
    }
    if token.encoder == OtpEncoder::Steam {
        debug_assert_eq!(token.digits, STEAM_DIGITS);
        uri.push_str("&encoder=steam");
    }
    uri
}

fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn percent_decode(input: &str) -> Option<String> {
    fn from_hex(byte: u8) -> Option<u8> {
        match byte {
            b'0'..=b'9' => Some(byte - b'0'),
            b'a'..=b'f' => Some(byte - b'a' + 10),
            b'A'..=b'F' => Some(byte - b'A' + 10),
            _ => None,
        }
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                if i + 2 >= bytes.len() {
                    return None;
                }
                let hi = from_hex(bytes[i + 1])?;
                let lo = from_hex(bytes[i + 2])?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }

    String::from_utf8(out).ok()
}
