//! Resolved sharing state of a collection, and sharee identity helpers.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Sharing state of one collection path.
///
/// Never updated in place; a refresh replaces the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SharingInfo {
    pub shared: bool,
    /// Principals that want change notifications for this collection.
    pub enabled_recipients: BTreeSet<String>,
}

impl SharingInfo {
    pub fn unshared() -> Self {
        Self::default()
    }

    pub fn shared_with<I, S>(recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shared: true,
            enabled_recipients: recipients.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether anyone should be notified about changes in this collection.
    pub fn has_recipients(&self) -> bool {
        self.shared && !self.enabled_recipients.is_empty()
    }
}

/// Prefix of user principal hrefs.
pub const USER_PRINCIPAL_PREFIX: &str = "/principals/users/";

/// Turn a raw sharee reference into a canonical account name.
///
/// Accepts `mailto:` URIs, user principal hrefs and bare account names.
/// Returns `None` for references that name no account.
pub fn canonical_account(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let account = if let Some(addr) = raw
        .strip_prefix("mailto:")
        .or_else(|| raw.strip_prefix("MAILTO:"))
    {
        addr.split('@').next().unwrap_or_default()
    } else if let Some(rest) = raw.strip_prefix(USER_PRINCIPAL_PREFIX) {
        rest.trim_end_matches('/')
    } else if raw.contains('/') || raw.contains(':') {
        return None;
    } else {
        raw
    };

    if account.is_empty() {
        None
    } else {
        Some(account.to_lowercase())
    }
}
