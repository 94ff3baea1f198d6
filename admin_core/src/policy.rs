//! Authorization: the acting principal and per-handler policies.

use std::collections::HashSet;

use serde::Serialize;

use crate::sql::Record;

/// The acting user, as established by the bearer token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: Option<i64>,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: i64, roles: &[&str]) -> Self {
        Self {
            user_id: Some(user_id),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &HashSet<String>) -> bool {
        self.roles.iter().any(|r| roles.contains(r))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ability {
    ViewAny,
    View,
    Create,
    Update,
    Delete,
    Action(String),
}

impl Ability {
    pub fn name(&self) -> &str {
        match self {
            Self::ViewAny => "view_any",
            Self::View => "view",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Action(name) => name,
        }
    }
}

pub trait Policy: Send + Sync {
    /// `record` is the stored row for record-level abilities.
    fn authorize(&self, principal: &Principal, ability: &Ability, record: Option<&Record>) -> bool;
}

pub struct AllowAll;

impl Policy for AllowAll {
    fn authorize(&self, _principal: &Principal, _ability: &Ability, _record: Option<&Record>) -> bool {
        true
    }
}

/// Role lists per ability group. A principal holding the superuser role passes every check.
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    superuser: Option<String>,
    read: HashSet<String>,
    write: HashSet<String>,
    delete: HashSet<String>,
    actions: HashSet<String>,
}

fn role_set(roles: &[&str]) -> HashSet<String> {
    roles.iter().map(|r| r.to_string()).collect()
}

impl RolePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn superuser(mut self, role: &str) -> Self {
        self.superuser = Some(role.to_string());
        self
    }

    /// Roles allowed to list and view records.
    pub fn read(mut self, roles: &[&str]) -> Self {
        self.read = role_set(roles);
        self
    }

    /// Roles allowed to create and update records.
    pub fn write(mut self, roles: &[&str]) -> Self {
        self.write = role_set(roles);
        self
    }

    pub fn delete(mut self, roles: &[&str]) -> Self {
        self.delete = role_set(roles);
        self
    }

    /// Roles allowed to run custom actions.
    pub fn actions(mut self, roles: &[&str]) -> Self {
        self.actions = role_set(roles);
        self
    }
}

impl Policy for RolePolicy {
    fn authorize(&self, principal: &Principal, ability: &Ability, _record: Option<&Record>) -> bool {
        if let Some(superuser) = &self.superuser {
            if principal.has_role(superuser) {
                return true;
            }
        }
        let roles = match ability {
            Ability::ViewAny | Ability::View => &self.read,
            Ability::Create | Ability::Update => &self.write,
            Ability::Delete => &self.delete,
            Ability::Action(_) => &self.actions,
        };
        principal.has_any_role(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RolePolicy {
        RolePolicy::new()
            .superuser("admin")
            .read(&["viewer", "editor"])
            .write(&["editor"])
            .delete(&["manager"])
            .actions(&["editor"])
    }

    #[test]
    fn roles_map_to_ability_groups() {
        let policy = policy();
        let viewer = Principal::user(1, &["viewer"]);
        let editor = Principal::user(2, &["editor"]);

        assert!(policy.authorize(&viewer, &Ability::ViewAny, None));
        assert!(!policy.authorize(&viewer, &Ability::Create, None));
        assert!(policy.authorize(&editor, &Ability::Update, None));
        assert!(policy.authorize(&editor, &Ability::Action("publish".into()), None));
        assert!(!policy.authorize(&editor, &Ability::Delete, None));
    }

    #[test]
    fn superuser_passes_everything() {
        let admin = Principal::user(9, &["admin"]);
        assert!(policy().authorize(&admin, &Ability::Delete, None));
    }

    #[test]
    fn anonymous_has_no_roles() {
        let anonymous = Principal::anonymous();
        assert!(anonymous.is_anonymous());
        assert!(!policy().authorize(&anonymous, &Ability::ViewAny, None));
        assert!(AllowAll.authorize(&anonymous, &Ability::Delete, None));
    }
}
