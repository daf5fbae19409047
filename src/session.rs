use cookie::{Cookie, SameSite};

use crate::auth::SessionId;

pub const COOKIE_NAME: &str = "sessionid";

/// The caller's session, extracted from the cookie at the start of each
/// request. Holds at most one authenticated username.
#[derive(Debug, Clone, Default)]
pub struct Session {
    id: Option<SessionId>,
    username: Option<String>,
}

/// Proof that the session's user is `username`.
#[derive(Debug)]
pub struct Owner<'s> {
    username: &'s str,
}

impl Session {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(id: SessionId, username: String) -> Self {
        Self {
            id: Some(id),
            username: Some(username),
        }
    }

    pub fn id(&self) -> Option<&SessionId> {
        self.id.as_ref()
    }

    pub fn current_user(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn owner_of(&self, username: &str) -> Option<Owner<'_>> {
        self.current_user()
            .filter(|&current| current == username)
            .map(|username| Owner { username })
    }

    pub fn cookie(&self, secure: bool) -> Cookie<'static> {
        match self.id {
            Some(ref id) => base_cookie(id.to_string(), secure),
            None => {
                let mut cookie = base_cookie(String::new(), secure);
                cookie.make_removal();
                cookie
            }
        }
    }
}

impl Owner<'_> {
    pub fn username(&self) -> &str {
        self.username
    }
}

fn base_cookie(value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}
