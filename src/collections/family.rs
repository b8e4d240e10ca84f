//! Family sharing: members, roles and invites.
//!
//! A family is created on first access with the current user as owner.
//! Exactly one active member holds [`Role::Owner`]; ownership only moves
//! through [`FamilyStore::transfer_ownership`]. Invites move one way from
//! pending to accepted or revoked.

use super::{Document, NestContext};
use crate::error::{Result, StoreError};
use crate::events::Topic;
use crate::types::{RecordId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Viewer,
    Manager,
    Owner,
}

impl Role {
    pub fn can_manage(self) -> bool {
        matches!(self, Role::Owner | Role::Manager)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    #[default]
    Active,
    Removed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    #[default]
    Pending,
    Accepted,
    Revoked,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Member {
    pub id: RecordId,
    pub user_id: UserId,
    pub role: Role,
    pub status: MemberStatus,
    pub joined_at: Timestamp,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Invite {
    pub id: RecordId,
    /// Short code shared with the invitee.
    pub code: String,
    /// Email or username the invite was addressed to.
    pub invitee: String,
    pub role: Role,
    pub status: InviteStatus,
    pub accepted_by: Option<UserId>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Family {
    pub id: RecordId,
    pub owner_user_id: UserId,
    pub members: Vec<Member>,
    pub invites: Vec<Invite>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Family {
    pub fn active_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_active())
    }

    pub fn member(&self, user: &UserId) -> Option<&Member> {
        self.active_members().find(|m| &m.user_id == user)
    }

    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        self.member(user).map(|m| m.role)
    }

    pub fn pending_invites(&self) -> impl Iterator<Item = &Invite> {
        self.invites
            .iter()
            .filter(|i| i.status == InviteStatus::Pending)
    }
}

/// Persists the family document and enforces its role rules.
pub struct FamilyStore {
    doc: Document<Family>,
    ctx: NestContext,
}

impl FamilyStore {
    pub fn new(ctx: NestContext) -> Self {
        Self {
            doc: Document::new(ctx.clone(), Topic::Family),
            ctx,
        }
    }

    fn actor(&self) -> UserId {
        self.ctx.identity.current_user()
    }

    /// The family, created with the current user as owner on first access.
    pub fn get_or_create(&self) -> Result<Family> {
        let (family, stored) = self.current();
        if !stored {
            self.doc.save(&family)?;
            tracing::debug!(family = %family.id, owner = %family.owner_user_id, "created family");
        }
        Ok(family)
    }

    /// The stored family, or the one that would be created, without writing.
    /// The flag tells whether it is stored.
    fn current(&self) -> (Family, bool) {
        if self.doc.exists() {
            return (self.doc.load(), true);
        }

        let owner = self.actor();
        let now = Timestamp::now();
        let family = Family {
            id: self.ctx.ids.next_id(),
            owner_user_id: owner.clone(),
            members: vec![Member {
                id: self.ctx.ids.next_id(),
                user_id: owner,
                role: Role::Owner,
                status: MemberStatus::Active,
                joined_at: now,
            }],
            invites: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        (family, false)
    }

    pub fn role_of(&self, user: &UserId) -> Result<Option<Role>> {
        Ok(self.current().0.role_of(user))
    }

    pub fn can_manage(&self, user: &UserId) -> Result<bool> {
        Ok(self.role_of(user)?.is_some_and(Role::can_manage))
    }

    pub fn can_view(&self, user: &UserId) -> Result<bool> {
        Ok(self.role_of(user)?.is_some())
    }

    /// Invite someone with a non-owner role. Requires manage rights.
    pub fn invite(&self, invitee: impl Into<String>, role: Role) -> Result<Invite> {
        if role == Role::Owner {
            return Err(StoreError::InvalidOperation(
                "ownership is granted by transfer, not by invite".into(),
            ));
        }

        let id = self.ctx.ids.next_id();
        let invite = Invite {
            code: invite_code(&id),
            id,
            invitee: invitee.into(),
            role,
            status: InviteStatus::Pending,
            accepted_by: None,
            created_at: Timestamp::now(),
            resolved_at: None,
        };

        let created = invite.clone();
        self.mutate(true, move |family| {
            family.invites.insert(0, created);
            Ok(Edit::Changed(()))
        })?;
        Ok(invite)
    }

    /// Redeem an invite code as `user`. An invite is redeemable once.
    pub fn accept_invite(&self, code: &str, user: &UserId) -> Result<Member> {
        let user = user.clone();
        let code = code.trim().to_string();
        self.mutate(false, move |family| {
            let now = Timestamp::now();
            let invite = family
                .invites
                .iter_mut()
                .find(|i| i.code.eq_ignore_ascii_case(&code))
                .ok_or_else(|| StoreError::InvalidOperation(format!("unknown invite code {}", code)))?;

            match invite.status {
                InviteStatus::Pending => {}
                InviteStatus::Accepted => {
                    return Err(StoreError::InvalidOperation("invite already accepted".into()))
                }
                InviteStatus::Revoked => {
                    return Err(StoreError::InvalidOperation("invite was revoked".into()))
                }
            }
            invite.status = InviteStatus::Accepted;
            invite.accepted_by = Some(user.clone());
            invite.resolved_at = Some(now);
            let role = invite.role;
            let member_id = RecordId::new(format!("m-{}", invite.id));

            if let Some(existing) = family.members.iter_mut().find(|m| m.user_id == user) {
                if existing.is_active() {
                    // Never downgrade someone through an invite.
                    existing.role = existing.role.max(role);
                } else {
                    existing.status = MemberStatus::Active;
                    existing.role = role;
                    existing.joined_at = now;
                }
                return Ok(Edit::Changed(existing.clone()));
            }

            let member = Member {
                id: member_id,
                user_id: user,
                role,
                status: MemberStatus::Active,
                joined_at: now,
            };
            family.members.push(member.clone());
            Ok(Edit::Changed(member))
        })
    }

    /// Revoke a pending invite. Returns false if it is not pending.
    pub fn revoke_invite(&self, invite_id: &RecordId) -> Result<bool> {
        let invite_id = invite_id.clone();
        self.mutate(true, move |family| {
            match family
                .invites
                .iter_mut()
                .find(|i| i.id == invite_id && i.status == InviteStatus::Pending)
            {
                Some(invite) => {
                    invite.status = InviteStatus::Revoked;
                    invite.resolved_at = Some(Timestamp::now());
                    Ok(Edit::Changed(true))
                }
                None => Ok(Edit::Unchanged(false)),
            }
        })
    }

    /// Change a member's role. The owner's role cannot change here.
    pub fn change_role(&self, user: &UserId, role: Role) -> Result<Option<Member>> {
        if role == Role::Owner {
            return Err(StoreError::InvalidOperation(
                "use transfer_ownership to change the owner".into(),
            ));
        }
        let user = user.clone();
        self.mutate(true, move |family| {
            let Some(member) = family
                .members
                .iter_mut()
                .find(|m| m.user_id == user && m.is_active())
            else {
                return Ok(Edit::Unchanged(None));
            };
            if member.role == Role::Owner {
                return Err(StoreError::InvalidOperation(
                    "the owner cannot be demoted".into(),
                ));
            }
            if member.role == role {
                return Ok(Edit::Unchanged(Some(member.clone())));
            }
            member.role = role;
            Ok(Edit::Changed(Some(member.clone())))
        })
    }

    /// Remove a member. Managers may remove others; anyone may leave.
    /// The owner cannot be removed.
    pub fn remove_member(&self, user: &UserId) -> Result<bool> {
        let leaving_self = &self.actor() == user;
        let user = user.clone();
        self.mutate(!leaving_self, move |family| {
            let Some(member) = family
                .members
                .iter_mut()
                .find(|m| m.user_id == user && m.is_active())
            else {
                return Ok(Edit::Unchanged(false));
            };
            if member.role == Role::Owner {
                return Err(StoreError::InvalidOperation(
                    "the owner cannot be removed; transfer ownership first".into(),
                ));
            }
            member.status = MemberStatus::Removed;
            Ok(Edit::Changed(true))
        })
    }

    /// Hand ownership to another active member. Only the owner may do this;
    /// the previous owner becomes a manager.
    pub fn transfer_ownership(&self, new_owner: &UserId) -> Result<Family> {
        let actor = self.actor();
        let new_owner = new_owner.clone();
        self.mutate(false, move |family| {
            if family.role_of(&actor) != Some(Role::Owner) {
                return Err(StoreError::Permission(format!("{} is not the owner", actor)));
            }
            if family.member(&new_owner).is_none() {
                return Err(StoreError::InvalidOperation(format!(
                    "{} is not a member",
                    new_owner
                )));
            }
            if new_owner == actor {
                return Ok(Edit::Unchanged(family.clone()));
            }

            for member in family.members.iter_mut().filter(|m| m.is_active()) {
                if member.user_id == actor {
                    member.role = Role::Manager;
                } else if member.user_id == new_owner {
                    member.role = Role::Owner;
                }
            }
            family.owner_user_id = new_owner.clone();
            family.updated_at = Timestamp::now();
            Ok(Edit::Changed(family.clone()))
        })
    }

    /// Load (or build a fresh family), check permissions, apply, and save
    /// once if the change touched anything. A fresh family is only written
    /// together with its first change.
    fn mutate<T, F>(&self, require_manage: bool, change: F) -> Result<T>
    where
        F: FnOnce(&mut Family) -> Result<Edit<T>>,
    {
        let (mut family, _) = self.current();
        if require_manage {
            let actor = self.actor();
            if !family.role_of(&actor).is_some_and(Role::can_manage) {
                return Err(StoreError::Permission(format!(
                    "{} cannot manage this family",
                    actor
                )));
            }
        }

        match change(&mut family)? {
            Edit::Unchanged(result) => Ok(result),
            Edit::Changed(result) => {
                family.updated_at = Timestamp::now();
                self.doc.save(&family)?;
                Ok(result)
            }
        }
    }
}

/// Outcome of a family change: only `Changed` is persisted.
enum Edit<T> {
    Changed(T),
    Unchanged(T),
}

/// Invite codes are the id's digits rendered in upper-case hex.
fn invite_code(id: &RecordId) -> String {
    match id.as_str().parse::<u64>() {
        Ok(n) => format!("{:X}", n),
        Err(_) => id.as_str().to_uppercase(),
    }
}
