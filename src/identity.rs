//! Identity collaborator and owner-scope resolution.

use std::sync::RwLock;

use tracing::{info, warn};

use crate::domain::OwnerScope;
use crate::error::StoryResult;
use crate::prefs::{PrefKey, Prefs};

/// Role allowed to publish to the shared remote store.
pub const TEACHER_ROLE: &str = "teacher";

pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;

    fn current_user_role(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool {
        self.current_user_id().is_some()
    }

    /// Publishing requires a session, and a teacher role when a role is reported.
    fn can_publish(&self) -> bool {
        self.is_authenticated()
            && self
                .current_user_role()
                .map(|r| r.eq_ignore_ascii_case(TEACHER_ROLE))
                .unwrap_or(true)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub role: Option<String>,
}

/// In-process identity whose session is set at sign-in and cleared at sign-out.
#[derive(Default)]
pub struct SessionIdentity {
    session: RwLock<Option<Session>>,
}

impl SessionIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn signed_in(user_id: impl Into<String>, role: Option<&str>) -> Self {
        let id = Self::new();
        id.sign_in(user_id, role);
        id
    }

    pub fn sign_in(&self, user_id: impl Into<String>, role: Option<&str>) {
        let session = Session { user_id: user_id.into(), role: role.map(str::to_string) };
        info!(target: "story_vault", user_id = %session.user_id, role = ?session.role, "Signed in");
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    pub fn sign_out(&self) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn snapshot(&self) -> Option<Session> {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.snapshot().map(|s| s.user_id).filter(|id| !id.trim().is_empty())
    }

    fn current_user_role(&self) -> Option<String> {
        self.snapshot().and_then(|s| s.role)
    }
}

/// Owner scope in priority order: explicitly loaded profile, persisted last-known id,
/// the identity provider's current user, then the `"default"` sentinel.
/// An unusable remembered id is skipped; an unusable profile or user id is an error.
pub async fn resolve_owner_scope(
    profile_owner: Option<&str>,
    prefs: &Prefs,
    identity: &dyn IdentityProvider,
) -> StoryResult<OwnerScope> {
    let non_blank = |s: &str| !s.trim().is_empty();
    if let Some(p) = profile_owner.filter(|p| non_blank(p)) {
        return OwnerScope::new(p);
    }
    if let Some(last) = prefs.get(PrefKey::LastOwnerId).await.filter(|p| non_blank(p)) {
        match OwnerScope::new(last) {
            Ok(owner) => return Ok(owner),
            Err(e) => warn!(target: "story_vault", error = %e, "Ignoring remembered owner id"),
        }
    }
    if let Some(uid) = identity.current_user_id() {
        return OwnerScope::new(uid);
    }
    Ok(OwnerScope::default())
}
