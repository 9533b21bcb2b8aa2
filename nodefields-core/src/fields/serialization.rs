//! Conversion between `NodeFields` and the string-keyed dictionary handed to
//! and from the container codec.
//!
//! Top-level values of the wrong shape are hard errors. Malformed members
//! inside a collection (one custom field, one history entry) are dropped
//! with a warning so the rest of the entry survives.

use super::{append_line, NodeFields};
use crate::attachments::NodeFileAttachment;
use crate::config::FieldsConfig;
use crate::custom_fields::StringValue;
use crate::history::{KeePassHistoryEntry, PasswordHistoryEntry};
use crate::otp::carriers::{
    self, legacy_settings_value, LEGACY_TOTP_SEED_KEY, LEGACY_TOTP_SETTINGS_KEY, OTP_FIELD_KEY,
};
use crate::otp::OtpToken;
use crate::{NodeFieldsError, Result};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use tracing::{debug, warn};
use uuid::Uuid;

/// The persisted representation exchanged with the container codec.
pub type FieldDictionary = Map<String, Value>;

const KEY_USERNAME: &str = "username";
const KEY_URL: &str = "url";
const KEY_PASSWORD: &str = "password";
const KEY_NOTES: &str = "notes";
const KEY_EMAIL: &str = "email";
const KEY_CREATED: &str = "created";
const KEY_MODIFIED: &str = "modified";
const KEY_ACCESSED: &str = "accessed";
const KEY_PASSWORD_MODIFIED: &str = "password_modified";
const KEY_EXPIRES: &str = "expires";
const KEY_LOCATION_CHANGED: &str = "location_changed";
const KEY_USAGE_COUNT: &str = "usage_count";
const KEY_CUSTOM_FIELDS: &str = "custom_fields";
const KEY_ATTACHMENTS: &str = "attachments";
const KEY_PASSWORD_HISTORY: &str = "password_history";
const KEY_KEEPASS_HISTORY: &str = "keepass_history";

/// Which carrier receives an active OTP configuration on serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpCarrier {
    /// `otp` custom field holding the URI (KeePass 2 family).
    #[default]
    CustomField,
    /// KeePassXC `TOTP Seed` / `TOTP Settings` pair.
    LegacyCustomFields,
    /// The password field itself.
    Password,
    /// A URI line appended to the notes (formats without custom fields).
    Notes,
}

/// Target-format choices for [`NodeFields::serialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SerializationContext {
    pub otp_carrier: OtpCarrier,
}

impl SerializationContext {
    pub fn new(otp_carrier: OtpCarrier) -> Self {
        Self { otp_carrier }
    }
}

impl NodeFields {
    /// Serialize for the container codec, placing any OTP configuration in
    /// the carrier selected by `context`.
    pub fn serialize(&self, context: &SerializationContext) -> FieldDictionary {
        self.with_otp_in_carrier(context.otp_carrier)
            .write_dictionary()
    }

    pub fn deserialize(dict: &FieldDictionary) -> Result<Self> {
        Self::deserialize_with_config(dict, &FieldsConfig::default())
    }

    pub fn deserialize_with_config(dict: &FieldDictionary, config: &FieldsConfig) -> Result<Self> {
        let mut fields = NodeFields::blank(config.clone());

        fields.username = read_string(dict, KEY_USERNAME)?;
        fields.url = read_string(dict, KEY_URL)?;
        fields.password = read_string(dict, KEY_PASSWORD)?;
        fields.notes = read_string(dict, KEY_NOTES)?;
        fields.email = read_string(dict, KEY_EMAIL)?;

        fields.created = read_timestamp(dict, KEY_CREATED);
        fields.modified = read_timestamp(dict, KEY_MODIFIED);
        fields.accessed = read_timestamp(dict, KEY_ACCESSED);
        fields.password_modified = read_timestamp(dict, KEY_PASSWORD_MODIFIED);
        fields.expires = read_timestamp(dict, KEY_EXPIRES);
        fields.location_changed = read_timestamp(dict, KEY_LOCATION_CHANGED);
        fields.usage_count = match present(dict, KEY_USAGE_COUNT) {
            None => None,
            Some(value) => {
                let count = value.as_u64();
                if count.is_none() {
                    warn!("Dropping invalid usage count {}", value);
                }
                count
            }
        };

        if let Some(value) = present(dict, KEY_CUSTOM_FIELDS) {
            let map = value
                .as_object()
                .ok_or_else(|| shape_error(KEY_CUSTOM_FIELDS, "a mapping"))?;
            for (key, raw) in map {
                let Some(value) = read_string_value(raw) else {
                    warn!("Dropping malformed custom field '{}'", key);
                    continue;
                };
                if let Err(e) = fields.custom_fields.set(key.as_str(), value) {
                    warn!("Dropping custom field: {}", e);
                }
            }
        }

        if let Some(value) = present(dict, KEY_ATTACHMENTS) {
            let items = value
                .as_array()
                .ok_or_else(|| shape_error(KEY_ATTACHMENTS, "a list"))?;
            for item in items {
                match serde_json::from_value::<NodeFileAttachment>(item.clone()) {
                    Ok(attachment) => fields.attachments.push(attachment),
                    Err(e) => warn!("Dropping malformed attachment: {}", e),
                }
            }
        }

        if let Some(value) = present(dict, KEY_PASSWORD_HISTORY) {
            let history = value
                .as_object()
                .ok_or_else(|| shape_error(KEY_PASSWORD_HISTORY, "a mapping"))?;
            read_password_history(&mut fields, history);
        }

        if let Some(value) = present(dict, KEY_KEEPASS_HISTORY) {
            let items = value
                .as_array()
                .ok_or_else(|| shape_error(KEY_KEEPASS_HISTORY, "a list"))?;
            for item in items {
                match read_keepass_history_entry(item, config) {
                    Ok(entry) => fields.keepass_history.push(entry),
                    Err(e) => warn!("Dropping malformed history entry: {}", e),
                }
            }
        }

        Ok(fields)
    }

    /// A view of `self` whose OTP data sits in `carrier`. Borrows when the
    /// carrier already holds the derived token or there is none.
    fn with_otp_in_carrier(&self, carrier: OtpCarrier) -> Cow<'_, NodeFields> {
        let Some(token) = self.otp_token() else {
            return Cow::Borrowed(self);
        };
        if self.carrier_holds(carrier, &token) {
            return Cow::Borrowed(self);
        }

        let mut copy = self.clone();
        copy.clear_totp();
        let uri = token.to_uri();

        match carrier {
            OtpCarrier::CustomField => copy.put_otp_field(&uri),
            OtpCarrier::LegacyCustomFields => match legacy_settings_value(&token) {
                Some(settings) => {
                    copy.put_reserved(LEGACY_TOTP_SEED_KEY, StringValue::protected(token.secret.as_str()));
                    copy.put_reserved(LEGACY_TOTP_SETTINGS_KEY, StringValue::new(settings));
                }
                None => {
                    debug!("OTP configuration not expressible as legacy seed/settings; using the otp field");
                    copy.put_otp_field(&uri);
                }
            },
            OtpCarrier::Password if copy.password.is_empty() => copy.password = uri,
            OtpCarrier::Password => {
                debug!("Password is in use; appending the OTP URI to notes instead");
                append_line(&mut copy.notes, &uri);
            }
            OtpCarrier::Notes => append_line(&mut copy.notes, &uri),
        }

        copy.invalidate_otp();
        Cow::Owned(copy)
    }

    fn carrier_holds(&self, carrier: OtpCarrier, token: &OtpToken) -> bool {
        let held = match carrier {
            OtpCarrier::CustomField if self.custom_fields.contains_key(OTP_FIELD_KEY) => {
                carriers::from_custom_fields(&self.custom_fields)
            }
            OtpCarrier::LegacyCustomFields
                if self.custom_fields.contains_key(LEGACY_TOTP_SEED_KEY) =>
            {
                carriers::from_custom_fields(&self.custom_fields)
            }
            OtpCarrier::CustomField | OtpCarrier::LegacyCustomFields => None,
            OtpCarrier::Password => carriers::from_password(&self.password),
            OtpCarrier::Notes => carriers::from_notes(&self.notes),
        };
        held.as_ref() == Some(token)
    }

    fn put_otp_field(&mut self, uri: &str) {
        self.put_reserved(OTP_FIELD_KEY, StringValue::protected(uri));
    }

    fn put_reserved(&mut self, key: &'static str, value: StringValue) {
        if let Err(e) = self.custom_fields.set(key, value) {
            warn!("Could not write '{}': {}", key, e);
        }
    }

    /// Write the stored state as-is, without moving OTP data.
    fn write_dictionary(&self) -> FieldDictionary {
        let mut dict = Map::new();
        dict.insert(KEY_USERNAME.into(), Value::String(self.username.clone()));
        dict.insert(KEY_URL.into(), Value::String(self.url.clone()));
        dict.insert(KEY_PASSWORD.into(), Value::String(self.password.clone()));
        dict.insert(KEY_NOTES.into(), Value::String(self.notes.clone()));
        dict.insert(KEY_EMAIL.into(), Value::String(self.email.clone()));

        for (key, timestamp) in [
            (KEY_CREATED, self.created),
            (KEY_MODIFIED, self.modified),
            (KEY_ACCESSED, self.accessed),
            (KEY_PASSWORD_MODIFIED, self.password_modified),
            (KEY_EXPIRES, self.expires),
            (KEY_LOCATION_CHANGED, self.location_changed),
        ] {
            if let Some(timestamp) = timestamp {
                dict.insert(key.into(), Value::String(format_timestamp(&timestamp)));
            }
        }
        if let Some(count) = self.usage_count {
            dict.insert(KEY_USAGE_COUNT.into(), json!(count));
        }

        let custom_fields: Map<String, Value> = self
            .custom_fields
            .iter()
            .map(|(key, value)| {
                (
                    key.to_string(),
                    json!({ "value": value.value, "protected": value.protected }),
                )
            })
            .collect();
        dict.insert(KEY_CUSTOM_FIELDS.into(), Value::Object(custom_fields));

        let attachments: Vec<Value> = self
            .attachments
            .iter()
            .map(|a| json!({ "filename": a.filename, "index": a.index }))
            .collect();
        dict.insert(KEY_ATTACHMENTS.into(), Value::Array(attachments));

        let history_entries: Vec<Value> = self
            .password_history
            .entries()
            .iter()
            .map(|e| {
                json!({
                    "timestamp": format_timestamp(&e.timestamp),
                    "password": e.password,
                })
            })
            .collect();
        dict.insert(
            KEY_PASSWORD_HISTORY.into(),
            json!({
                "enabled": self.password_history.enabled,
                "maximum_size": self.password_history.maximum_size(),
                "entries": history_entries,
            }),
        );

        let snapshots: Vec<Value> = self
            .keepass_history
            .iter()
            .map(|entry| {
                json!({
                    "uuid": entry.uuid.to_string(),
                    "title": entry.title,
                    "fields": Value::Object(entry.fields.write_dictionary()),
                })
            })
            .collect();
        dict.insert(KEY_KEEPASS_HISTORY.into(), Value::Array(snapshots));

        dict
    }
}

fn present<'a>(dict: &'a FieldDictionary, key: &str) -> Option<&'a Value> {
    dict.get(key).filter(|value| !value.is_null())
}

fn shape_error(key: &str, expected: &str) -> NodeFieldsError {
    NodeFieldsError::InvalidDictionary(format!("'{}' must be {}", key, expected))
}

fn read_string(dict: &FieldDictionary, key: &str) -> Result<String> {
    match present(dict, key) {
        None => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(shape_error(key, "a string")),
    }
}

fn read_timestamp(dict: &FieldDictionary, key: &str) -> Option<DateTime<Utc>> {
    let value = present(dict, key)?;
    let parsed = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    };
    if parsed.is_none() {
        warn!("Dropping invalid '{}' timestamp {}", key, value);
    }
    parsed
}

/// `{"value": .., "protected": ..}`, or a bare string for an unprotected value.
fn read_string_value(raw: &Value) -> Option<StringValue> {
    match raw {
        Value::String(s) => Some(StringValue::new(s.as_str())),
        Value::Object(_) => serde_json::from_value(raw.clone()).ok(),
        _ => None,
    }
}

fn read_password_history(fields: &mut NodeFields, history: &Map<String, Value>) {
    if let Some(enabled) = history.get("enabled").and_then(Value::as_bool) {
        fields.password_history.enabled = enabled;
    }
    if let Some(maximum) = history.get("maximum_size").and_then(Value::as_u64) {
        fields.password_history.set_maximum_size(maximum as usize);
    }

    let Some(raw_entries) = history.get("entries") else {
        return;
    };
    let Some(raw_entries) = raw_entries.as_array() else {
        warn!("Dropping password history entries: not a list");
        return;
    };

    let entries = raw_entries
        .iter()
        .filter_map(
            |raw| match serde_json::from_value::<PasswordHistoryEntry>(raw.clone()) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Dropping malformed password history entry: {}", e);
                    None
                }
            },
        )
        .collect();
    fields.password_history.restore(entries);
}

fn read_keepass_history_entry(raw: &Value, config: &FieldsConfig) -> Result<KeePassHistoryEntry> {
    let object = raw
        .as_object()
        .ok_or_else(|| shape_error(KEY_KEEPASS_HISTORY, "a list of mappings"))?;

    let uuid = object
        .get("uuid")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| NodeFieldsError::InvalidDictionary("history entry uuid".to_string()))?;
    let title = object
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let fields = object
        .get("fields")
        .and_then(Value::as_object)
        .ok_or_else(|| shape_error("fields", "a mapping"))?;

    Ok(KeePassHistoryEntry {
        uuid,
        title,
        fields: NodeFields::deserialize_with_config(fields, config)?,
    })
}

fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
