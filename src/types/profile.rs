//! Profile Types
//!
//! The provider-agnostic user profile produced by every adapter.

use serde::{Deserialize, Serialize};

use crate::error::{AdapterResult, UnexpectedResponseError};

/// Normalized user profile.
///
/// Only constructible with a non-empty identifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Profile {
    identifier: String,
    pub display_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub photo_url: Option<String>,
    pub profile_url: Option<String>,
    pub website_url: Option<String>,
    pub description: Option<String>,
    pub locale: Option<String>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub zip: Option<String>,
}

impl Profile {
    /// Create a profile; fails when the identifier is empty.
    pub fn new(identifier: impl Into<String>) -> AdapterResult<Self> {
        let identifier = identifier.into();
        if identifier.trim().is_empty() {
            return Err(UnexpectedResponseError::MissingField {
                field: "identifier".to_string(),
            }
            .into());
        }
        Ok(Self {
            identifier,
            display_name: None,
            first_name: None,
            last_name: None,
            email: None,
            email_verified: false,
            photo_url: None,
            profile_url: None,
            website_url: None,
            description: None,
            locale: None,
            gender: None,
            phone: None,
            address: None,
            city: None,
            region: None,
            country: None,
            zip: None,
        })
    }

    /// Provider-unique subject identifier.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Whether a field currently holds a value.
    pub fn is_set(&self, field: ProfileField) -> bool {
        match field {
            ProfileField::Identifier => true,
            ProfileField::EmailVerified => self.email_verified,
            other => self.slot(other).map(|s| s.is_some()).unwrap_or(false),
        }
    }

    /// Assign a mapped value. Identifier cannot be reassigned.
    pub fn set(&mut self, field: ProfileField, value: String) {
        match field {
            ProfileField::Identifier => {}
            ProfileField::EmailVerified => self.email_verified = is_truthy(&value),
            other => {
                if let Some(slot) = self.slot_mut(other) {
                    *slot = Some(value);
                }
            }
        }
    }

    /// Read a textual field.
    pub fn get(&self, field: ProfileField) -> Option<&str> {
        match field {
            ProfileField::Identifier => Some(&self.identifier),
            ProfileField::EmailVerified => None,
            other => self.slot(other).and_then(|s| s.as_deref()),
        }
    }

    fn slot(&self, field: ProfileField) -> Option<&Option<String>> {
        Some(match field {
            ProfileField::DisplayName => &self.display_name,
            ProfileField::FirstName => &self.first_name,
            ProfileField::LastName => &self.last_name,
            ProfileField::Email => &self.email,
            ProfileField::PhotoUrl => &self.photo_url,
            ProfileField::ProfileUrl => &self.profile_url,
            ProfileField::WebsiteUrl => &self.website_url,
            ProfileField::Description => &self.description,
            ProfileField::Locale => &self.locale,
            ProfileField::Gender => &self.gender,
            ProfileField::Phone => &self.phone,
            ProfileField::Address => &self.address,
            ProfileField::City => &self.city,
            ProfileField::Region => &self.region,
            ProfileField::Country => &self.country,
            ProfileField::Zip => &self.zip,
            ProfileField::Identifier | ProfileField::EmailVerified => return None,
        })
    }

    fn slot_mut(&mut self, field: ProfileField) -> Option<&mut Option<String>> {
        Some(match field {
            ProfileField::DisplayName => &mut self.display_name,
            ProfileField::FirstName => &mut self.first_name,
            ProfileField::LastName => &mut self.last_name,
            ProfileField::Email => &mut self.email,
            ProfileField::PhotoUrl => &mut self.photo_url,
            ProfileField::ProfileUrl => &mut self.profile_url,
            ProfileField::WebsiteUrl => &mut self.website_url,
            ProfileField::Description => &mut self.description,
            ProfileField::Locale => &mut self.locale,
            ProfileField::Gender => &mut self.gender,
            ProfileField::Phone => &mut self.phone,
            ProfileField::Address => &mut self.address,
            ProfileField::City => &mut self.city,
            ProfileField::Region => &mut self.region,
            ProfileField::Country => &mut self.country,
            ProfileField::Zip => &mut self.zip,
            ProfileField::Identifier | ProfileField::EmailVerified => return None,
        })
    }
}

/// Interpret provider flag values ("true", "1", "yes", `true`).
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "verified"
    )
}

/// Profile attribute targeted by a mapping rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Identifier,
    DisplayName,
    FirstName,
    LastName,
    Email,
    EmailVerified,
    PhotoUrl,
    ProfileUrl,
    WebsiteUrl,
    Description,
    Locale,
    Gender,
    Phone,
    Address,
    City,
    Region,
    Country,
    Zip,
}

impl ProfileField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identifier => "identifier",
            Self::DisplayName => "display_name",
            Self::FirstName => "first_name",
            Self::LastName => "last_name",
            Self::Email => "email",
            Self::EmailVerified => "email_verified",
            Self::PhotoUrl => "photo_url",
            Self::ProfileUrl => "profile_url",
            Self::WebsiteUrl => "website_url",
            Self::Description => "description",
            Self::Locale => "locale",
            Self::Gender => "gender",
            Self::Phone => "phone",
            Self::Address => "address",
            Self::City => "city",
            Self::Region => "region",
            Self::Country => "country",
            Self::Zip => "zip",
        }
    }
}
