use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Pharmacist,
    PharmacyTechnician,
    Nurse,
    Administrative,
}

/// Secondary role flag. Coordinators see every area regardless of location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubRole {
    Coordinator,
}

/// Working area of a principal: the central pharmacy (CAF) or a hospital sector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    #[default]
    Caf,
    Hospital,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Admin,
    #[default]
    User,
}

/// Local user record plus its authorization claims. Never carries a password hash;
/// credentials live only in the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_role: Option<SubRole>,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub access_level: AccessLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthdate: Option<NaiveDate>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,
}

impl Principal {
    pub fn is_coordinator(&self) -> bool { self.sub_role == Some(SubRole::Coordinator) }
    pub fn is_admin(&self) -> bool { self.access_level == AccessLevel::Admin }

    /// Merge the fields present in `patch`; absent fields keep their current value.
    pub fn apply_patch(&mut self, patch: &ProfilePatch) {
        if let Some(name) = patch.name.as_ref() { self.name = name.clone(); }
        if let Some(date) = patch.birthdate { self.birthdate = Some(date); }
        if let Some(color) = patch.avatar_color.as_ref() { self.avatar_color = Some(color.clone()); }
    }
}

/// Profile fields a user may change on their own account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub birthdate: Option<NaiveDate>,
    #[serde(default)]
    pub avatar_color: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.birthdate.is_none() && self.avatar_color.is_none()
    }

    /// Drop blank strings so an empty form field does not wipe a stored value.
    pub fn normalized(mut self) -> Self {
        self.name = self.name.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        self.avatar_color = self.avatar_color.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        self
    }
}

/// Registration request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub sub_role: Option<SubRole>,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub avatar_color: Option<String>,
    #[serde(default)]
    pub birthdate: Option<NaiveDate>,
}

pub(crate) fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }
