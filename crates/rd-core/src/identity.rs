//! Requesting identity as supplied by the external authentication provider.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::UserId;

/// Role attached to an authenticated requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular user; may only see their own jobs.
    User,
    /// Elevated privilege; may see and act on every job.
    Admin,
}

/// The identity and privilege of whoever is making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: UserId,
    pub role: Role,
}

impl Requester {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this requester may act on a resource owned by `owner`.
    pub fn can_access(&self, owner: UserId) -> bool {
        self.is_admin() || self.user_id == owner
    }

    /// Like [`can_access`](Self::can_access) but returns
    /// [`Error::NotAuthorized`] on refusal.
    pub fn authorize(&self, owner: UserId) -> Result<()> {
        if self.can_access(owner) {
            Ok(())
        } else {
            Err(Error::not_authorized(format!(
                "user {} does not own this resource",
                self.user_id
            )))
        }
    }

    /// Require the elevated privilege.
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(Error::not_authorized("admin privilege required"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_and_admin_access() {
        let owner = UserId::new();
        assert!(Requester::user(owner).can_access(owner));
        assert!(!Requester::user(UserId::new()).can_access(owner));
        assert!(Requester::admin(UserId::new()).can_access(owner));
    }

    #[test]
    fn require_admin() {
        assert!(Requester::admin(UserId::new()).require_admin().is_ok());
        assert!(matches!(
            Requester::user(UserId::new()).require_admin(),
            Err(Error::NotAuthorized(_))
        ));
    }
}
