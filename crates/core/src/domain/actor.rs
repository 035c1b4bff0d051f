use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DepartmentId(pub String);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for DepartmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    DirectManager,
    Accountant,
    FinalManager,
    Admin,
}

impl Role {
    pub const ALL: [Role; 5] =
        [Role::User, Role::DirectManager, Role::Accountant, Role::FinalManager, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::DirectManager => "DIRECT_MANAGER",
            Self::Accountant => "ACCOUNTANT",
            Self::FinalManager => "FINAL_MANAGER",
            Self::Admin => "ADMIN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "USER" => Some(Self::User),
            "DIRECT_MANAGER" => Some(Self::DirectManager),
            "ACCOUNTANT" => Some(Self::Accountant),
            "FINAL_MANAGER" => Some(Self::FinalManager),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The authenticated user invoking an operation. Always passed explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub roles: BTreeSet<Role>,
}

impl Actor {
    pub fn new(id: impl Into<String>, roles: impl IntoIterator<Item = Role>) -> Self {
        Self { id: UserId(id.into()), roles: roles.into_iter().collect() }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// Role check with the administrative override applied.
    pub fn acts_as(&self, role: Role) -> bool {
        self.has_role(role) || self.is_admin()
    }

    pub fn is_authenticated(&self) -> bool {
        !self.roles.is_empty() && !self.id.0.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Actor, Role};

    #[test]
    fn role_storage_encoding_round_trips() {
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("direct_manager"), Some(Role::DirectManager));
        assert_eq!(Role::parse("auditor"), None);
    }

    #[test]
    fn admin_override_applies_to_every_role() {
        let admin = Actor::new("u-admin", [Role::Admin]);
        assert!(admin.acts_as(Role::FinalManager));
        assert!(!admin.has_role(Role::FinalManager));

        let accountant = Actor::new("u-acct", [Role::Accountant]);
        assert!(accountant.acts_as(Role::Accountant));
        assert!(!accountant.acts_as(Role::FinalManager));
    }

    #[test]
    fn actor_without_roles_is_not_authenticated() {
        assert!(!Actor::new("u-1", []).is_authenticated());
        assert!(!Actor::new("  ", [Role::User]).is_authenticated());
        assert!(Actor::new("u-1", [Role::User]).is_authenticated());
    }
}
