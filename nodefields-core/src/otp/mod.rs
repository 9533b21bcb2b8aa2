//! One-time password configuration (RFC 4226 HOTP / RFC 6238 TOTP).
//!
//! An [`OtpToken`] is recovered from loosely structured input by
//! [`parse_otp`] and written back as an `otpauth://` URI by
//! [`synthesize_otp`]. See [`carriers`] for where tokens live inside an entry.

pub mod carriers;
pub mod uri;

use crate::{NodeFieldsError, Result};
use data_encoding::{BASE32, BASE32_NOPAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::str::FromStr;
use zeroize::Zeroizing;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

pub const DEFAULT_DIGITS: u8 = 6;
pub const DEFAULT_PERIOD: u32 = 30;
pub const MIN_DIGITS: u8 = 6;
pub const MAX_DIGITS: u8 = 8;

/// Steam Guard codes are five characters over this alphabet.
pub const STEAM_DIGITS: u8 = 5;
const STEAM_ALPHABET: &[u8] = b"23456789BCDFGHJKMNPQRTVWXY";

/// A bare string shorter than this is never taken for a secret (80 bits).
const MIN_BARE_SECRET_LEN: usize = 16;

/// Supported HMAC algorithms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OtpAlgorithm {
    #[default]
    #[serde(rename = "sha1")]
    Sha1,
    #[serde(rename = "sha256")]
    Sha256,
    #[serde(rename = "sha512")]
    Sha512,
}

impl OtpAlgorithm {
    /// Spelling used in `otpauth://` query strings.
    pub fn as_uri_value(self) -> &'static str {
        match self {
            OtpAlgorithm::Sha1 => "SHA1",
            OtpAlgorithm::Sha256 => "SHA256",
            OtpAlgorithm::Sha512 => "SHA512",
        }
    }
}

impl std::fmt::Display for OtpAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OtpAlgorithm::Sha1 => write!(f, "sha1"),
            OtpAlgorithm::Sha256 => write!(f, "sha256"),
            OtpAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for OtpAlgorithm {
    type Err = NodeFieldsError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(OtpAlgorithm::Sha1),
            "sha256" => Ok(OtpAlgorithm::Sha256),
            "sha512" => Ok(OtpAlgorithm::Sha512),
            other => Err(NodeFieldsError::InvalidInput(format!(
                "Unsupported OTP algorithm '{}'",
                other
            ))),
        }
    }
}

/// Counter-based or time-based generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OtpKind {
    Totp { period: u32 },
    Hotp { counter: u64 },
}

impl OtpKind {
    pub fn as_uri_value(self) -> &'static str {
        match self {
            OtpKind::Totp { .. } => "totp",
            OtpKind::Hotp { .. } => "hotp",
        }
    }
}

/// How the truncated HMAC value is rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OtpEncoder {
    #[default]
    Standard,
    Steam,
}

/// A complete OTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OtpToken {
    pub kind: OtpKind,
    pub algorithm: OtpAlgorithm,
    pub digits: u8,
    /// Normalized base32: uppercase, no padding, no separators.
    pub secret: String,
    pub issuer: String,
    pub name: String,
    pub encoder: OtpEncoder,
}

/// A generated code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpCode {
    pub code: String,
    /// Seconds until rotation; `None` for counter-based tokens.
    pub seconds_remaining: Option<u32>,
}

impl OtpToken {
    /// Default time-based token (SHA1, 6 digits, 30 s). `None` if the
    /// secret is not valid base32.
    pub fn totp(secret: &str, issuer: impl Into<String>, name: impl Into<String>) -> Option<Self> {
        Some(Self {
            kind: OtpKind::Totp {
                period: DEFAULT_PERIOD,
            },
            algorithm: OtpAlgorithm::Sha1,
            digits: DEFAULT_DIGITS,
            secret: normalize_secret(secret)?,
            issuer: issuer.into(),
            name: name.into(),
            encoder: OtpEncoder::Standard,
        })
    }

    /// Switch to Steam Guard rendering, which fixes SHA1 and five characters.
    pub fn into_steam(mut self) -> Self {
        self.encoder = OtpEncoder::Steam;
        self.algorithm = OtpAlgorithm::Sha1;
        self.digits = STEAM_DIGITS;
        self
    }

    pub fn period(&self) -> Option<u32> {
        match self.kind {
            OtpKind::Totp { period } => Some(period),
            OtpKind::Hotp { .. } => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        let digits_ok = match self.encoder {
            OtpEncoder::Steam => self.digits == STEAM_DIGITS,
            OtpEncoder::Standard => (MIN_DIGITS..=MAX_DIGITS).contains(&self.digits),
        };
        let period_ok = self.period().map_or(true, |p| p > 0);
        digits_ok && period_ok && decode_secret(&self.secret).is_some()
    }

    /// Canonical `otpauth://` URI for this token.
    pub fn to_uri(&self) -> String {
        uri::synthesize(self)
    }

    /// Code at `timestamp` (unix seconds). Counter tokens ignore the time.
    pub fn code_at(&self, timestamp: i64) -> Result<String> {
        let counter = match self.kind {
            OtpKind::Totp { period } => {
                if period == 0 {
                    return Err(NodeFieldsError::InvalidInput(
                        "OTP period must be greater than 0".to_string(),
                    ));
                }
                (timestamp.max(0) as u64) / period as u64
            }
            OtpKind::Hotp { counter } => counter,
        };

        let binary = self.truncated_hmac(counter)?;
        match self.encoder {
            OtpEncoder::Standard => {
                if !(MIN_DIGITS..=MAX_DIGITS).contains(&self.digits) {
                    return Err(NodeFieldsError::InvalidInput(format!(
                        "OTP digits must be between {} and {}",
                        MIN_DIGITS, MAX_DIGITS
                    )));
                }
                let modulo = 10u32.pow(self.digits as u32);
                Ok(format!(
                    "{:0width$}",
                    binary % modulo,
                    width = self.digits as usize
                ))
            }
            OtpEncoder::Steam => {
                let mut value = binary as usize;
                let mut code = String::with_capacity(STEAM_DIGITS as usize);
                for _ in 0..STEAM_DIGITS {
                    code.push(STEAM_ALPHABET[value % STEAM_ALPHABET.len()] as char);
                    value /= STEAM_ALPHABET.len();
                }
                Ok(code)
            }
        }
    }

    /// Code for the current wall-clock time.
    pub fn current_code(&self) -> Result<OtpCode> {
        let now = chrono::Utc::now().timestamp();
        Ok(OtpCode {
            code: self.code_at(now)?,
            seconds_remaining: self.period().map(|p| seconds_remaining(p, now)),
        })
    }

    fn truncated_hmac(&self, counter: u64) -> Result<u32> {
        let secret = decode_secret(&self.secret).ok_or_else(|| {
            NodeFieldsError::InvalidInput("OTP secret must be valid base32".to_string())
        })?;
        let counter_bytes = counter.to_be_bytes();
        let invalid = |_| NodeFieldsError::InvalidInput("Invalid OTP secret".to_string());

        let digest = match self.algorithm {
            OtpAlgorithm::Sha1 => {
                let mut mac = HmacSha1::new_from_slice(&secret).map_err(invalid)?;
                mac.update(&counter_bytes);
                mac.finalize().into_bytes().to_vec()
            }
            OtpAlgorithm::Sha256 => {
                let mut mac = HmacSha256::new_from_slice(&secret).map_err(invalid)?;
                mac.update(&counter_bytes);
                mac.finalize().into_bytes().to_vec()
            }
            OtpAlgorithm::Sha512 => {
                let mut mac = HmacSha512::new_from_slice(&secret).map_err(invalid)?;
                mac.update(&counter_bytes);
                mac.finalize().into_bytes().to_vec()
            }
        };

        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        Ok(((digest[offset] as u32 & 0x7f) << 24)
            | ((digest[offset + 1] as u32) << 16)
            | ((digest[offset + 2] as u32) << 8)
            | (digest[offset + 3] as u32))
    }
}

/// Recover a token from an `otpauth://` URI or a bare base32 secret.
///
/// A bare secret is wrapped into a default TOTP labelled with the hints.
/// `force_steam` switches the result to Steam Guard rendering. Anything
/// unparseable yields `None`: the input is simply not an OTP field.
pub fn parse_otp(
    input: &str,
    force_steam: bool,
    issuer_hint: &str,
    username_hint: &str,
) -> Option<OtpToken> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let token = if uri::has_otpauth_scheme(trimmed) {
        let mut token = uri::parse(trimmed)?;
        if token.issuer.is_empty() {
            token.issuer = issuer_hint.to_string();
        }
        if token.name.is_empty() {
            token.name = username_hint.to_string();
        }
        token
    } else {
        if trimmed.chars().count() < MIN_BARE_SECRET_LEN {
            return None;
        }
        OtpToken::totp(trimmed, issuer_hint, username_hint)?
    };

    let token = if force_steam { token.into_steam() } else { token };
    token.is_valid().then_some(token)
}

/// Canonical inverse of [`parse_otp`].
pub fn synthesize_otp(token: &OtpToken) -> String {
    uri::synthesize(token)
}

/// Get remaining seconds until the next rotation.
pub fn seconds_remaining(period: u32, timestamp: i64) -> u32 {
    if period == 0 {
        return 0;
    }

    let elapsed = timestamp.rem_euclid(period as i64) as u32;
    if elapsed == 0 {
        period
    } else {
        period - elapsed
    }
}

/// Uppercase, strip separators and padding, and check it decodes.
pub(crate) fn normalize_secret(secret: &str) -> Option<String> {
    let normalized: String = secret
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != '-' && *ch != '=')
        .map(|ch| ch.to_ascii_uppercase())
        .collect();

    if normalized.is_empty() {
        return None;
    }

    decode_secret(&normalized)?;
    Some(normalized)
}

fn decode_secret(secret_base32: &str) -> Option<Zeroizing<Vec<u8>>> {
    let decoded = BASE32_NOPAD
        .decode(secret_base32.as_bytes())
        .or_else(|_| BASE32.decode(secret_base32.as_bytes()))
        .ok()?;

    if decoded.is_empty() {
        return None;
    }

    Some(Zeroizing::new(decoded))
}
