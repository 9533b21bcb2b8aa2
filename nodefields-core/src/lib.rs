//! Entry Field Model Core Library
//!
//! This library holds the mutable fields of a password-manager record
//! together with its metadata, history, attachments and the one-time
//! password logic that recovers an OTP configuration from loosely
//! structured carriers (custom fields, the password, free-text notes).

pub mod attachments;
pub mod config;
pub mod custom_fields;
pub mod fields;
pub mod history;
pub mod otp;

pub use attachments::{AttachmentList, NodeFileAttachment};
pub use config::FieldsConfig;
pub use custom_fields::{CustomFieldStore, StringValue};
pub use fields::{FieldDictionary, NodeFields, OtpCarrier, SerializationContext};
pub use history::{KeePassHistoryEntry, PasswordHistory, PasswordHistoryEntry};
pub use otp::{
    carriers::{
        derive_from_record, is_alternative_url_key, is_reserved_custom_field_key,
        is_totp_custom_field_key, OtpSource,
    },
    parse_otp, seconds_remaining, synthesize_otp, OtpAlgorithm, OtpEncoder, OtpKind, OtpToken,
};

use thiserror::Error;

/// Result type for entry field operations
pub type Result<T> = std::result::Result<T, NodeFieldsError>;

/// General error type for entry field operations
#[derive(Error, Debug)]
pub enum NodeFieldsError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid field dictionary: {0}")]
    InvalidDictionary(String),

    #[error("Custom field '{0}' is reserved for OTP data; use set_totp/clear_totp")]
    ReservedCustomFieldKey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
