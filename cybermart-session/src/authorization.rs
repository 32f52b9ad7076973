//! Authorization derived from a session
//!
//! Never stored: callers derive a fresh view from the session they hold.

use crate::session::Session;
use cybermart_core::Role;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationView {
    pub is_authenticated: bool,
    pub is_admin: bool,
}

impl AuthorizationView {
    pub fn derive(session: &Session) -> Self {
        match &session.user {
            Some(user) => Self {
                is_authenticated: true,
                is_admin: user.role == Role::Admin,
            },
            None => Self::default(),
        }
    }
}

impl From<&Session> for AuthorizationView {
    fn from(session: &Session) -> Self {
        Self::derive(session)
    }
}
