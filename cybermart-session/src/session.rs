//! Session values

use crate::authorization::AuthorizationView;
use cybermart_core::User;
use serde::Serialize;

/// Current user and the credential that authenticates it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Session {
    pub user: Option<User>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.token.is_none()
    }

    pub fn authorization(&self) -> AuthorizationView {
        AuthorizationView::from(self)
    }
}

/// What subscribers observe: the session plus whether startup restore is pending
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub session: Session,
    /// True until startup hydration resolves; "unknown" rather than "logged out"
    pub loading: bool,
}

impl SessionState {
    pub(crate) fn initial() -> Self {
        Self {
            session: Session::default(),
            loading: true,
        }
    }

    pub fn authorization(&self) -> AuthorizationView {
        self.session.authorization()
    }
}
