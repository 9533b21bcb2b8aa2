//! The entry field set: scalar fields, metadata timestamps, history,
//! attachments, custom fields and the OTP configuration derived from them.
//!
//! `NodeFields` is single-owner mutable state. Cloning always produces a
//! fully independent copy; nothing is shared between an entry and its clone.

mod serialization;

pub use serialization::{FieldDictionary, OtpCarrier, SerializationContext};

use crate::attachments::AttachmentList;
use crate::config::FieldsConfig;
use crate::custom_fields::{CustomFieldStore, StringValue};
use crate::history::{KeePassHistoryEntry, PasswordHistory};
use crate::otp::carriers::{self, LEGACY_TOTP_SEED_KEY, LEGACY_TOTP_SETTINGS_KEY, OTP_FIELD_KEY};
use crate::otp::{self, uri, OtpToken};
use crate::{NodeFieldsError, Result};
use chrono::{DateTime, Duration, Utc};
use std::cell::RefCell;

/// Cached result of OTP derivation.
///
/// Reset to `Unresolved` by any write to the password, notes or custom
/// fields; resolved again on the next read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OtpResolution {
    Unresolved,
    Resolved(OtpToken),
    ResolvedNone,
}

/// Not `Sync`: the OTP cache uses interior mutability. Hand other threads a
/// `clone_or_duplicate` snapshot rather than a shared reference.
#[derive(Debug, Clone)]
pub struct NodeFields {
    username: String,
    url: String,
    password: String,
    notes: String,
    email: String,

    created: Option<DateTime<Utc>>,
    modified: Option<DateTime<Utc>>,
    accessed: Option<DateTime<Utc>>,
    password_modified: Option<DateTime<Utc>>,
    expires: Option<DateTime<Utc>>,
    location_changed: Option<DateTime<Utc>>,
    usage_count: Option<u64>,

    attachments: AttachmentList,
    password_history: PasswordHistory,
    keepass_history: Vec<KeePassHistoryEntry>,
    custom_fields: CustomFieldStore,

    config: FieldsConfig,
    otp: RefCell<OtpResolution>,
}

impl Default for NodeFields {
    fn default() -> Self {
        Self::new("", "", "", "", "")
    }
}

impl PartialEq for NodeFields {
    /// Compares stored data only; policy and the OTP cache are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
            && self.url == other.url
            && self.password == other.password
            && self.notes == other.notes
            && self.email == other.email
            && self.created == other.created
            && self.modified == other.modified
            && self.accessed == other.accessed
            && self.password_modified == other.password_modified
            && self.expires == other.expires
            && self.location_changed == other.location_changed
            && self.usage_count == other.usage_count
            && self.attachments == other.attachments
            && self.password_history == other.password_history
            && self.keepass_history == other.keepass_history
            && self.custom_fields == other.custom_fields
    }
}

impl NodeFields {
    /// Create a new entry, stamping creation, modification and access with now.
    pub fn new(
        username: impl Into<String>,
        url: impl Into<String>,
        password: impl Into<String>,
        notes: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let mut fields = Self::blank(FieldsConfig::default());
        fields.username = username.into();
        fields.url = url.into();
        fields.password = password.into();
        fields.notes = notes.into();
        fields.email = email.into();
        fields.created = Some(now);
        fields.modified = Some(now);
        fields.accessed = Some(now);
        fields.password_modified = Some(now);
        fields
    }

    /// Empty field set with no metadata, as a starting point for deserialization.
    pub(crate) fn blank(config: FieldsConfig) -> Self {
        Self {
            username: String::new(),
            url: String::new(),
            password: String::new(),
            notes: String::new(),
            email: String::new(),
            created: None,
            modified: None,
            accessed: None,
            password_modified: None,
            expires: None,
            location_changed: None,
            usage_count: None,
            attachments: AttachmentList::new(),
            password_history: PasswordHistory::new(
                config.password_history_enabled,
                config.password_history_max,
            ),
            keepass_history: Vec::new(),
            custom_fields: CustomFieldStore::new(),
            config,
            otp: RefCell::new(OtpResolution::Unresolved),
        }
    }

    /// Replace the policy. The password history cap follows the new config.
    pub fn with_config(mut self, config: FieldsConfig) -> Self {
        self.password_history.enabled = config.password_history_enabled;
        self.password_history
            .set_maximum_size(config.password_history_max);
        self.config = config;
        self.invalidate_otp();
        self
    }

    pub fn config(&self) -> &FieldsConfig {
        &self.config
    }

    // Scalar fields

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.username = username.into();
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn set_email(&mut self, email: impl Into<String>) {
        self.email = email.into();
    }

    /// Set the password; an actual change stamps `password_modified`.
    pub fn set_password(&mut self, password: impl Into<String>) {
        let password = password.into();
        if password != self.password {
            self.password = password;
            self.password_modified = Some(Utc::now());
        }
        self.invalidate_otp();
    }

    pub fn set_notes(&mut self, notes: impl Into<String>) {
        self.notes = notes.into();
        self.invalidate_otp();
    }

    // Metadata

    pub fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }

    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified
    }

    pub fn accessed(&self) -> Option<DateTime<Utc>> {
        self.accessed
    }

    pub fn password_modified(&self) -> Option<DateTime<Utc>> {
        self.password_modified
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires
    }

    pub fn location_changed(&self) -> Option<DateTime<Utc>> {
        self.location_changed
    }

    /// Only touch operations change this.
    pub fn usage_count(&self) -> Option<u64> {
        self.usage_count
    }

    pub fn set_created(&mut self, created: Option<DateTime<Utc>>) {
        self.created = created;
    }

    pub fn set_modified(&mut self, modified: Option<DateTime<Utc>>) {
        self.modified = modified;
    }

    pub fn set_accessed(&mut self, accessed: Option<DateTime<Utc>>) {
        self.accessed = accessed;
    }

    pub fn set_password_modified(&mut self, password_modified: Option<DateTime<Utc>>) {
        self.password_modified = password_modified;
    }

    pub fn set_expires(&mut self, expires: Option<DateTime<Utc>>) {
        self.expires = expires;
    }

    pub fn set_location_changed(&mut self, location_changed: Option<DateTime<Utc>>) {
        self.location_changed = location_changed;
    }

    pub fn expired(&self) -> bool {
        self.expires.is_some_and(|expires| expires <= Utc::now())
    }

    /// Expired, or expiring within the configured lookahead window.
    pub fn nearly_expired(&self) -> bool {
        self.nearly_expired_within(self.config.nearly_expired_window())
    }

    pub fn nearly_expired_within(&self, window: Duration) -> bool {
        self.expires.is_some_and(|expires| {
            Utc::now()
                .checked_add_signed(window)
                .map_or(true, |limit| expires <= limit)
        })
    }

    // Touch

    /// Record an access; `modified` also records a modification, pushes the
    /// current password into history and bumps the usage count.
    pub fn touch(&mut self, modified: bool) {
        self.touch_at(modified, Utc::now());
    }

    /// `touch(true)` with a caller supplied date, for undo/redo.
    pub fn touch_with_explicit_modified_date(&mut self, date: DateTime<Utc>) {
        self.touch_at(true, date);
    }

    /// Restore all touch bookkeeping at once.
    pub fn set_touch_properties(
        &mut self,
        accessed: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
        usage_count: Option<u64>,
    ) {
        self.accessed = accessed;
        self.modified = modified;
        self.usage_count = usage_count;
    }

    fn touch_at(&mut self, modified: bool, date: DateTime<Utc>) {
        self.accessed = Some(date);
        if modified {
            self.modified = Some(date);
            self.password_history.add(&self.password, date);
            self.usage_count = Some(self.usage_count.unwrap_or(0) + 1);
        }
    }

    // Owned collections

    pub fn attachments(&self) -> &AttachmentList {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut AttachmentList {
        &mut self.attachments
    }

    pub fn clone_attachments(&self) -> AttachmentList {
        self.attachments.clone()
    }

    pub fn password_history(&self) -> &PasswordHistory {
        &self.password_history
    }

    pub fn password_history_mut(&mut self) -> &mut PasswordHistory {
        &mut self.password_history
    }

    pub fn keepass_history(&self) -> &[KeePassHistoryEntry] {
        &self.keepass_history
    }

    pub fn keepass_history_mut(&mut self) -> &mut Vec<KeePassHistoryEntry> {
        &mut self.keepass_history
    }

    // Custom fields

    pub fn custom_fields(&self) -> &CustomFieldStore {
        &self.custom_fields
    }

    pub fn clone_custom_fields(&self) -> CustomFieldStore {
        self.custom_fields.clone()
    }

    /// Insert or overwrite a custom field. OTP carrier keys are refused.
    pub fn set_custom_field(&mut self, key: impl Into<String>, value: StringValue) -> Result<()> {
        let key = key.into();
        if carriers::is_totp_custom_field_key(&key) {
            return Err(NodeFieldsError::ReservedCustomFieldKey(key));
        }
        self.custom_fields.set(key, value)?;
        self.invalidate_otp();
        Ok(())
    }

    /// Remove a custom field. OTP carrier keys are refused.
    pub fn remove_custom_field(&mut self, key: &str) -> Result<Option<StringValue>> {
        if carriers::is_totp_custom_field_key(key) {
            return Err(NodeFieldsError::ReservedCustomFieldKey(key.to_string()));
        }
        let removed = self.custom_fields.remove(key);
        self.invalidate_otp();
        Ok(removed)
    }

    /// Remove every user custom field. OTP carrier keys, attachments and
    /// history are left alone; use `clear_totp` for the OTP keys.
    pub fn remove_all_custom_fields(&mut self) {
        self.custom_fields
            .retain(|key, _| carriers::is_totp_custom_field_key(key));
        self.invalidate_otp();
    }

    /// Values of `KP2A_URL` and `KP2A_URL_<n>` custom fields, in insertion order.
    pub fn alternative_urls(&self) -> Vec<&str> {
        self.custom_fields
            .iter()
            .filter(|(key, _)| carriers::is_alternative_url_key(key))
            .map(|(_, value)| value.value.as_str())
            .collect()
    }

    pub fn is_totp_custom_field_key(key: &str) -> bool {
        carriers::is_totp_custom_field_key(key)
    }

    // OTP

    /// The authoritative OTP configuration, derived on demand.
    pub fn otp_token(&self) -> Option<OtpToken> {
        let mut state = self.otp.borrow_mut();
        if *state == OtpResolution::Unresolved {
            *state = match carriers::derive_with_precedence(
                &self.config.otp_precedence,
                &self.password,
                &self.custom_fields,
                &self.notes,
            ) {
                Some(token) => OtpResolution::Resolved(token),
                None => OtpResolution::ResolvedNone,
            };
        }

        match &*state {
            OtpResolution::Resolved(token) => Some(token.clone()),
            _ => None,
        }
    }

    pub fn get_otp_token_from_record(
        password: &str,
        fields: &CustomFieldStore,
        notes: &str,
    ) -> Option<OtpToken> {
        carriers::derive_from_record(password, fields, notes)
    }

    pub fn get_otp_token_from_string(
        string: &str,
        force_steam: bool,
        issuer: &str,
        username: &str,
    ) -> Option<OtpToken> {
        otp::parse_otp(string, force_steam, issuer, username)
    }

    /// Replace any OTP data with `token`, stored in the dedicated field and
    /// optionally also appended to the notes as a visible URI line.
    pub fn set_totp(&mut self, token: &OtpToken, append_url_to_notes: bool) -> Result<()> {
        self.clear_totp();

        let uri = token.to_uri();
        self.custom_fields
            .set(OTP_FIELD_KEY, StringValue::protected(uri.as_str()))?;
        if append_url_to_notes {
            append_line(&mut self.notes, &uri);
        }
        self.invalidate_otp();
        Ok(())
    }

    /// Remove OTP data from every carrier. A no-op when there is none.
    ///
    /// The password is only cleared when it holds an `otpauth://` URI.
    pub fn clear_totp(&mut self) {
        for key in [OTP_FIELD_KEY, LEGACY_TOTP_SEED_KEY, LEGACY_TOTP_SETTINGS_KEY] {
            self.custom_fields.remove(key);
        }
        // A password that merely looks like base32 is still a password.
        if uri::has_otpauth_scheme(self.password.trim()) {
            self.password.clear();
        }
        if uri::find_otpauth(&self.notes).is_some() {
            self.notes = carriers::strip_from_notes(&self.notes);
        }
        self.invalidate_otp();
    }

    // Cloning

    /// Deep copy. `clear_history` empties both history forms in the copy;
    /// without `clone_metadata_dates` the copy is a new item stamped with now.
    pub fn clone_or_duplicate(&self, clear_history: bool, clone_metadata_dates: bool) -> Self {
        let mut copy = self.clone();
        copy.otp = RefCell::new(OtpResolution::Unresolved);

        if clear_history {
            copy.password_history.clear();
            copy.keepass_history.clear();
        }

        if !clone_metadata_dates {
            let now = Utc::now();
            copy.created = Some(now);
            copy.modified = Some(now);
            copy.accessed = Some(now);
            copy.password_modified = Some(now);
        }

        copy
    }

    fn invalidate_otp(&mut self) {
        *self.otp.get_mut() = OtpResolution::Unresolved;
    }

    #[cfg(test)]
    pub(crate) fn otp_resolution(&self) -> OtpResolution {
        self.otp.borrow().clone()
    }
}

/// Append `line` to `text` unless an identical line is already present.
pub(crate) fn append_line(text: &mut String, line: &str) {
    if text.lines().any(|existing| existing.trim() == line) {
        return;
    }
    let trimmed_len = text.trim_end().len();
    text.truncate(trimmed_len);
    if !text.is_empty() {
        text.push('\n');
    }
    text.push_str(line);
}
