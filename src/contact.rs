//! Contacts from the user's list or the directory.

use std::fmt;

use serde_json::Value;

use crate::error::Result;
use crate::resource::Resource;

/// A person resource (`contact` embeds under `myContacts` and `search`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    resource: Resource,
}

impl Contact {
    /// Wraps a contact resource.
    pub fn new(resource: Resource) -> Self {
        Self { resource }
    }

    /// Display name.
    pub fn name(&self) -> Result<String> {
        self.resource.get_str("name")
    }

    /// SIP URI, the address conversations are started with.
    pub fn uri(&self) -> Result<String> {
        self.resource.get_str("uri")
    }

    /// Email addresses, in server order.
    pub fn email_addresses(&self) -> Result<Vec<String>> {
        Ok(self
            .resource
            .try_get("emailAddresses")?
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default()
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }

    /// Current availability (`Online`, `Away`, `Offline`, ...). Fetches the
    /// `contactPresence` resource.
    pub fn availability(&self) -> Result<String> {
        self.resource.follow("contactPresence")?.get_str("availability")
    }

    /// Whether the display name, SIP URI or an email address contains
    /// `fragment`, ignoring case.
    pub fn matches(&self, fragment: &str) -> Result<bool> {
        let fragment = fragment.to_lowercase();
        let mut haystacks = self.email_addresses()?;
        for field in ["name", "uri"] {
            if let Some(Value::String(value)) = self.resource.try_get(field)? {
                haystacks.push(value);
            }
        }
        Ok(haystacks
            .iter()
            .any(|value| value.to_lowercase().contains(&fragment)))
    }

    /// The underlying resource.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// `Name (email): availability`, one line per contact in the CLI.
    pub fn summary(&self) -> Result<String> {
        let email = self.email_addresses()?.into_iter().next().unwrap_or_default();
        Ok(format!("{} ({email}): {}", self.name()?, self.availability()?))
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Ok(name) => f.write_str(&name),
            Err(_) => f.write_str(self.resource.href().unwrap_or("<contact>")),
        }
    }
}
