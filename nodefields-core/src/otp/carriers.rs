//! Where OTP configurations live inside an entry.
//!
//! Several generations of password database formats stored OTP data in
//! different places with no version marker. Each place is an [`OtpSource`];
//! derivation walks an ordered list of sources and takes the first hit.

use super::{
    normalize_secret, parse_otp, uri, OtpAlgorithm, OtpEncoder, OtpKind, OtpToken,
    DEFAULT_DIGITS, DEFAULT_PERIOD,
};
use crate::custom_fields::CustomFieldStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Dedicated OTP field (KeePassXC 2.6+ URI, or KeeOTP plugin query format).
pub const OTP_FIELD_KEY: &str = "otp";
/// KeePassXC legacy: bare base32 seed.
pub const LEGACY_TOTP_SEED_KEY: &str = "TOTP Seed";
/// KeePassXC legacy: `<period>;<digits|S>`.
pub const LEGACY_TOTP_SETTINGS_KEY: &str = "TOTP Settings";
/// Keepass2Android alternative URL key; numbered variants use `KP2A_URL_<n>`.
pub const ALTERNATIVE_URL_KEY: &str = "KP2A_URL";

const LEGACY_STEAM_DIGITS: &str = "S";

/// Default precedence: dedicated custom field, then password, then notes.
pub const DEFAULT_OTP_PRECEDENCE: [OtpSource; 3] =
    [OtpSource::CustomField, OtpSource::Password, OtpSource::Notes];

/// True for custom field keys that carry OTP data.
pub fn is_totp_custom_field_key(key: &str) -> bool {
    key == OTP_FIELD_KEY || key == LEGACY_TOTP_SEED_KEY || key == LEGACY_TOTP_SETTINGS_KEY
}

/// True for `KP2A_URL` and `KP2A_URL_<suffix>`.
pub fn is_alternative_url_key(key: &str) -> bool {
    key == ALTERNATIVE_URL_KEY
        || key
            .strip_prefix(ALTERNATIVE_URL_KEY)
            .and_then(|rest| rest.strip_prefix('_'))
            .is_some_and(|suffix| !suffix.is_empty())
}

/// Keys that should not be shown as ordinary user fields.
pub fn is_reserved_custom_field_key(key: &str) -> bool {
    is_totp_custom_field_key(key) || is_alternative_url_key(key)
}

/// One place an OTP configuration may be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpSource {
    CustomField,
    Password,
    Notes,
}

impl OtpSource {
    pub fn extract(
        self,
        password: &str,
        fields: &CustomFieldStore,
        notes: &str,
    ) -> Option<OtpToken> {
        match self {
            OtpSource::CustomField => from_custom_fields(fields),
            OtpSource::Password => from_password(password),
            OtpSource::Notes => from_notes(notes),
        }
    }
}

/// Derive the authoritative token using the default precedence.
pub fn derive_from_record(
    password: &str,
    fields: &CustomFieldStore,
    notes: &str,
) -> Option<OtpToken> {
    derive_with_precedence(&DEFAULT_OTP_PRECEDENCE, password, fields, notes)
}

/// Derive the first token found walking `precedence` in order.
pub fn derive_with_precedence(
    precedence: &[OtpSource],
    password: &str,
    fields: &CustomFieldStore,
    notes: &str,
) -> Option<OtpToken> {
    precedence.iter().find_map(|source| {
        let token = source.extract(password, fields, notes);
        if token.is_some() {
            debug!("OTP configuration resolved from {:?}", source);
        }
        token
    })
}

/// The password itself: a URI or a bare secret.
pub fn from_password(password: &str) -> Option<OtpToken> {
    parse_otp(password, false, "", "")
}

/// First `otpauth://` URI embedded anywhere in the notes.
pub fn from_notes(notes: &str) -> Option<OtpToken> {
    let mut rest = notes;
    while let Some(start) = uri::find_otpauth(rest) {
        let candidate = &rest[start..];
        let end = candidate
            .find(char::is_whitespace)
            .unwrap_or(candidate.len());
        if let Some(token) = uri::parse(&candidate[..end]) {
            return Some(token);
        }
        rest = &candidate[end..];
    }
    None
}

/// The dedicated field, then the KeePassXC legacy seed/settings pair.
pub fn from_custom_fields(fields: &CustomFieldStore) -> Option<OtpToken> {
    if let Some(value) = fields.get(OTP_FIELD_KEY) {
        let text = value.value.trim();
        let token = if uri::has_otpauth_scheme(text) {
            uri::parse(text)
        } else if text.contains("key=") {
            parse_keeotp(text)
        } else {
            parse_otp(text, false, "", "")
        };
        if token.is_some() {
            return token;
        }
        debug!("Ignoring unparseable '{}' custom field", OTP_FIELD_KEY);
    }

    let seed = fields.get(LEGACY_TOTP_SEED_KEY)?;
    let settings = fields
        .get(LEGACY_TOTP_SETTINGS_KEY)
        .map(|s| s.value.as_str())
        .unwrap_or_default();
    parse_legacy_seed(&seed.value, settings)
}

/// KeeOTP: `key=<base32>&size=6&step=30&type=Totp&otpHashMode=Sha1&counter=0`.
pub fn parse_keeotp(value: &str) -> Option<OtpToken> {
    let mut secret = None;
    let mut digits = DEFAULT_DIGITS;
    let mut period = DEFAULT_PERIOD;
    let mut counter: u64 = 0;
    let mut hotp = false;
    let mut algorithm = OtpAlgorithm::Sha1;

    for pair in value.split('&').filter(|part| !part.is_empty()) {
        let (key, raw) = pair.split_once('=')?;
        let raw = raw.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "key" => secret = Some(normalize_secret(raw)?),
            "size" => digits = raw.parse().ok()?,
            "step" => period = raw.parse().ok()?,
            "counter" => counter = raw.parse().ok()?,
            "type" => hotp = raw.eq_ignore_ascii_case("hotp"),
            "otphashmode" => algorithm = raw.parse().ok()?,
            "encoding" if !raw.eq_ignore_ascii_case("base32") => return None,
            _ => {}
        }
    }

    let token = OtpToken {
        kind: if hotp {
            OtpKind::Hotp { counter }
        } else {
            OtpKind::Totp { period }
        },
        algorithm,
        digits,
        secret: secret?,
        issuer: String::new(),
        name: String::new(),
        encoder: OtpEncoder::Standard,
    };
    token.is_valid().then_some(token)
}

/// KeePassXC legacy pair. An empty settings string means `30;6`.
pub fn parse_legacy_seed(seed: &str, settings: &str) -> Option<OtpToken> {
    let mut token = OtpToken::totp(seed, "", "")?;

    let mut parts = settings.split(';').map(str::trim);
    if let Some(period) = parts.next().filter(|p| !p.is_empty()) {
        token.kind = OtpKind::Totp {
            period: period.parse().ok()?,
        };
    }
    match parts.next().filter(|d| !d.is_empty()) {
        Some(d) if d.eq_ignore_ascii_case(LEGACY_STEAM_DIGITS) => token = token.into_steam(),
        Some(d) => token.digits = d.parse().ok()?,
        None => {}
    }

    token.is_valid().then_some(token)
}

/// The `TOTP Settings` value for `token`, if the legacy pair can express it.
pub fn legacy_settings_value(token: &OtpToken) -> Option<String> {
    let period = token.period()?;
    if token.algorithm != OtpAlgorithm::Sha1 {
        return None;
    }
    let digits = match token.encoder {
        OtpEncoder::Steam => LEGACY_STEAM_DIGITS.to_string(),
        OtpEncoder::Standard if token.digits == 6 || token.digits == 8 => token.digits.to_string(),
        OtpEncoder::Standard => return None,
    };
    Some(format!("{};{}", period, digits))
}

/// Remove every embedded `otpauth://` URI from `notes`.
///
/// Only the URI and one adjoining separator are cut; the rest of each line
/// keeps its original spacing. Lines left empty by the removal are dropped.
pub fn strip_from_notes(notes: &str) -> String {
    let mut kept = Vec::new();
    for line in notes.split('\n') {
        if uri::find_otpauth(line).is_none() {
            kept.push(line.to_string());
            continue;
        }
        let stripped = strip_uris_from_line(line);
        if !stripped.trim().is_empty() {
            kept.push(stripped);
        }
    }
    kept.join("\n").trim_end().to_string()
}

fn strip_uris_from_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(pos) = uri::find_otpauth(rest) {
        let start = rest[..pos]
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map_or(0, |(i, c)| i + c.len_utf8());
        let end = rest[pos..]
            .find(char::is_whitespace)
            .map_or(rest.len(), |i| pos + i);

        out.push_str(&rest[..start]);
        rest = &rest[end..];

        if rest.trim().is_empty() {
            out.truncate(out.trim_end().len());
            rest = "";
        } else if out.ends_with(char::is_whitespace) {
            out.pop();
        } else if let Some(sep) = rest.chars().next().filter(|c| c.is_whitespace()) {
            rest = &rest[sep.len_utf8()..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::custom_fields::StringValue;

    const URI_A: &str = "otpauth://totp/A:alice?secret=JBSWY3DPEHPK3PXP&issuer=A";
    const URI_B: &str = "otpauth://totp/B:bob?secret=GEZDGNBVGY3TQOJQ&issuer=B";

    fn fields(pairs: &[(&str, &str)]) -> CustomFieldStore {
        pairs
            .iter()
            .map(|(k, v)| (*k, StringValue::new(*v)))
            .collect()
    }

    #[test]
    fn test_reserved_keys() {
        assert!(is_totp_custom_field_key("otp"));
        assert!(is_totp_custom_field_key("TOTP Seed"));
        assert!(is_totp_custom_field_key("TOTP Settings"));
        assert!(!is_totp_custom_field_key("OTP"));
        assert!(is_alternative_url_key("KP2A_URL"));
        assert!(is_alternative_url_key("KP2A_URL_1"));
        assert!(is_alternative_url_key("KP2A_URL_backup"));
        assert!(!is_alternative_url_key("KP2A_URL_"));
        assert!(!is_alternative_url_key("KP2A_URLS"));
        assert!(is_reserved_custom_field_key("KP2A_URL_2"));
        assert!(!is_reserved_custom_field_key("PIN"));
    }

    #[test]
    fn test_custom_field_beats_password_and_notes() {
        let token = derive_from_record(
            "JBSWY3DPEHPK3PXPJBSWY3DP",
            &fields(&[("otp", URI_B)]),
            &format!("backup codes\n{}", URI_A),
        )
        .unwrap();
        assert_eq!(token.issuer, "B");
    }

    #[test]
    fn test_password_beats_notes() {
        let token = derive_from_record(URI_B, &CustomFieldStore::new(), URI_A).unwrap();
        assert_eq!(token.issuer, "B");
    }

    #[test]
    fn test_notes_embedded_uri() {
        let notes = format!("Recovery: see below\nscan this {} please", URI_A);
        let token = derive_from_record("hunter2", &CustomFieldStore::new(), &notes).unwrap();
        assert_eq!(token.name, "alice");
    }

    #[test]
    fn test_notes_skip_broken_uri() {
        let notes = format!("otpauth://totp/x?secret=!!\n{}", URI_B);
        assert_eq!(from_notes(&notes).unwrap().issuer, "B");
    }

    #[test]
    fn test_custom_precedence_order() {
        let token = derive_with_precedence(
            &[OtpSource::Notes, OtpSource::CustomField],
            "",
            &fields(&[("otp", URI_B)]),
            URI_A,
        )
        .unwrap();
        assert_eq!(token.issuer, "A");
        assert!(derive_with_precedence(&[], URI_A, &CustomFieldStore::new(), URI_A).is_none());
    }

    #[test]
    fn test_absent_everywhere() {
        assert!(derive_from_record("pw", &fields(&[("PIN", "1234")]), "hello").is_none());
    }

    #[test]
    fn test_keeotp_format() {
        let token = from_custom_fields(&fields(&[(
            "otp",
            "key=JBSWY3DPEHPK3PXP&size=8&step=60&otpHashMode=Sha256",
        )]))
        .unwrap();
        assert_eq!(token.digits, 8);
        assert_eq!(token.kind, OtpKind::Totp { period: 60 });
        assert_eq!(token.algorithm, OtpAlgorithm::Sha256);

        let hotp = parse_keeotp("key=JBSWY3DPEHPK3PXP&type=Hotp&counter=5").unwrap();
        assert_eq!(hotp.kind, OtpKind::Hotp { counter: 5 });
        assert!(parse_keeotp("key=JBSWY3DPEHPK3PXP&encoding=hex").is_none());
    }

    #[test]
    fn test_legacy_seed_and_settings() {
        let token = from_custom_fields(&fields(&[
            ("TOTP Seed", "JBSWY3DPEHPK3PXP"),
            ("TOTP Settings", "45;8"),
        ]))
        .unwrap();
        assert_eq!(token.kind, OtpKind::Totp { period: 45 });
        assert_eq!(token.digits, 8);

        let steam = parse_legacy_seed("JBSWY3DPEHPK3PXP", "30;S").unwrap();
        assert_eq!(steam.encoder, OtpEncoder::Steam);

        let defaults = parse_legacy_seed("JBSWY3DPEHPK3PXP", "").unwrap();
        assert_eq!(defaults.kind, OtpKind::Totp { period: 30 });
        assert_eq!(defaults.digits, 6);
    }

    #[test]
    fn test_legacy_settings_value() {
        let token = OtpToken::totp("JBSWY3DPEHPK3PXP", "", "").unwrap();
        assert_eq!(legacy_settings_value(&token).as_deref(), Some("30;6"));
        assert_eq!(
            legacy_settings_value(&token.clone().into_steam()).as_deref(),
            Some("30;S")
        );

        let mut sha256 = token;
        sha256.algorithm = OtpAlgorithm::Sha256;
        assert!(legacy_settings_value(&sha256).is_none());
    }

    #[test]
    fn test_strip_from_notes() {
        let notes = format!("line one\n{}\nkeep {} this\n", URI_A, URI_B);
        assert_eq!(strip_from_notes(&notes), "line one\nkeep this");
        assert_eq!(strip_from_notes("plain"), "plain");
        assert_eq!(strip_from_notes(URI_A), "");
    }

    #[test]
    fn test_strip_from_notes_keeps_spacing() {
        let notes = format!("user:\talice  {}\n\tindented  twice", URI_A);
        assert_eq!(strip_from_notes(&notes), "user:\talice\n\tindented  twice");

        let notes = format!("a\t{}\tb  c", URI_A);
        assert_eq!(strip_from_notes(&notes), "a\tb  c");

        let notes = format!("{}   lead", URI_B);
        assert_eq!(strip_from_notes(&notes), "  lead");
    }
}
