//! Who is acting.
//!
//! Authored records (pets, photos, posts, comments, follow edges, family
//! ownership) take their author from an [`IdentityProvider`] instead of a
//! hard-coded local user.

use crate::types::UserId;
use parking_lot::RwLock;

/// Supplies the current user for repository mutations.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> UserId;
}

/// Identity that can be switched at runtime (sign-in, account switch).
#[derive(Debug)]
pub struct StaticIdentity {
    user: RwLock<UserId>,
}

impl StaticIdentity {
    pub fn new(user: impl Into<UserId>) -> Self {
        Self {
            user: RwLock::new(user.into()),
        }
    }

    /// Replace the current user.
    pub fn switch_to(&self, user: impl Into<UserId>) {
        *self.user.write() = user.into();
    }
}

impl Default for StaticIdentity {
    fn default() -> Self {
        Self::new(UserId::default())
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> UserId {
        self.user.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_local_user() {
        assert_eq!(StaticIdentity::default().current_user(), UserId::from("me"));
    }

    #[test]
    fn test_switch_user() {
        let identity = StaticIdentity::new("alice");
        identity.switch_to("bob");
        assert_eq!(identity.current_user(), UserId::from("bob"));
    }
}
