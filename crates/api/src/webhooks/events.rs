//! Identity-provider webhook payloads

use chrono::{DateTime, SecondsFormat, Utc};
use eventdesk_shared::{OrganizationProfile, UserProfile};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::analytics::Properties;

/// A verified webhook event, one variant per handled type
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    UserCreated(UserJson),
    UserUpdated(UserJson),
    UserDeleted(DeletedObjectJson),
    OrganizationCreated(OrganizationJson),
    OrganizationUpdated(OrganizationJson),
    MembershipCreated(OrganizationMembershipJson),
    MembershipDeleted(OrganizationMembershipJson),
    /// Any type without a handler; accepted and ignored
    Unknown {
        event_type: String,
        data_id: Option<String>,
    },
}

/// Envelope shared by every event type
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

impl WebhookEvent {
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let Envelope { event_type, data } = serde_json::from_slice(body)?;

        let event = match event_type.as_str() {
            "user.created" => Self::UserCreated(serde_json::from_value(data)?),
            "user.updated" => Self::UserUpdated(serde_json::from_value(data)?),
            "user.deleted" => Self::UserDeleted(serde_json::from_value(data)?),
            "organization.created" => Self::OrganizationCreated(serde_json::from_value(data)?),
            "organization.updated" => Self::OrganizationUpdated(serde_json::from_value(data)?),
            "organizationMembership.created" => {
                Self::MembershipCreated(serde_json::from_value(data)?)
            }
            "organizationMembership.deleted" => {
                Self::MembershipDeleted(serde_json::from_value(data)?)
            }
            _ => Self::Unknown {
                data_id: data.get("id").and_then(Value::as_str).map(str::to_string),
                event_type: event_type.clone(),
            },
        };
        Ok(event)
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::UserCreated(_) => "user.created",
            Self::UserUpdated(_) => "user.updated",
            Self::UserDeleted(_) => "user.deleted",
            Self::OrganizationCreated(_) => "organization.created",
            Self::OrganizationUpdated(_) => "organization.updated",
            Self::MembershipCreated(_) => "organizationMembership.created",
            Self::MembershipDeleted(_) => "organizationMembership.deleted",
            Self::Unknown { event_type, .. } => event_type,
        }
    }

    /// The `data.id` of the payload, if it has one
    pub fn data_id(&self) -> Option<&str> {
        match self {
            Self::UserCreated(user) | Self::UserUpdated(user) => Some(&user.id),
            Self::UserDeleted(deleted) => deleted.id.as_deref(),
            Self::OrganizationCreated(org) | Self::OrganizationUpdated(org) => Some(&org.id),
            Self::MembershipCreated(m) | Self::MembershipDeleted(m) => m.id.as_deref(),
            Self::Unknown { data_id, .. } => data_id.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailAddressJson {
    pub email_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhoneNumberJson {
    pub phone_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserJson {
    pub id: String,
    #[serde(default)]
    pub email_addresses: Vec<EmailAddressJson>,
    #[serde(default)]
    pub phone_numbers: Vec<PhoneNumberJson>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
    /// Milliseconds since the epoch
    pub created_at: Option<i64>,
}

impl UserJson {
    pub fn primary_email(&self) -> Option<&str> {
        self.email_addresses.first().map(|e| e.email_address.as_str())
    }

    pub fn primary_phone(&self) -> Option<&str> {
        self.phone_numbers.first().map(|p| p.phone_number.as_str())
    }

    /// Columns for the mirrored row. Blank strings are stored as NULL.
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            email: self.primary_email().unwrap_or_default().to_string(),
            first_name: non_empty(self.first_name.as_deref()),
            last_name: non_empty(self.last_name.as_deref()),
            image_url: non_empty(self.image_url.as_deref()),
            phone: non_empty(self.primary_phone()),
        }
    }

    /// Person properties sent with `identify`
    pub fn identify_properties(&self) -> Properties {
        let created_at = self
            .created_at
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true));

        let mut properties = Properties::new();
        properties.insert("email".to_string(), json!(self.primary_email()));
        properties.insert("firstName".to_string(), json!(self.first_name));
        properties.insert("lastName".to_string(), json!(self.last_name));
        properties.insert("createdAt".to_string(), json!(created_at));
        properties.insert("avatar".to_string(), json!(self.image_url));
        properties.insert("phoneNumber".to_string(), json!(self.primary_phone()));
        properties
    }
}

/// Payload of deletion events; the id may be absent
#[derive(Debug, Clone, Deserialize)]
pub struct DeletedObjectJson {
    pub id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationJson {
    pub id: String,
    pub name: String,
    pub image_url: Option<String>,
    pub created_by: Option<String>,
}

impl OrganizationJson {
    pub fn profile(&self) -> OrganizationProfile {
        OrganizationProfile {
            name: self.name.clone(),
            image_url: self.image_url.clone(),
        }
    }

    /// Group properties sent with `group_identify`
    pub fn group_properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert("name".to_string(), json!(self.name));
        properties.insert("avatar".to_string(), json!(self.image_url));
        properties
    }

    /// `created_by`, unless missing or blank
    pub fn creator(&self) -> Option<&str> {
        self.created_by.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicUserDataJson {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrganizationMembershipJson {
    pub id: Option<String>,
    pub organization: OrganizationJson,
    pub public_user_data: PublicUserDataJson,
    pub role: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_string)
}
