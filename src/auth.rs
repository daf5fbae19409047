use std::fmt;
use std::str::FromStr;

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use log::error;
use uuid::Uuid;

use crate::forms::RegisterForm;
use crate::user::{NewUser, User};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionId(Uuid);

pub struct AuthAttempt {
    user: String,
    pass: String,
}

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for SessionId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s).map(Self).map_err(|_| ())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.0.hyphenated())
    }
}

impl AuthAttempt {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// Whether this attempt's password matches the user's stored hash.
    pub fn matches(&self, user: &User) -> bool {
        verify_password(&self.pass, &user.password)
    }
}

/// Builds an unsaved user from a validated form, hashing the password.
pub fn register(form: &RegisterForm) -> Result<NewUser, ()> {
    let pwhash = hash_password(&form.password)?;

    Ok(NewUser {
        username: form.username.clone(),
        pwhash,
        email: form.email.clone(),
        first_name: form.first_name.clone(),
        last_name: form.last_name.clone(),
    })
}

pub fn hash_password(password: &str) -> Result<String, ()> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("couldn't hash password: {e}");
        })
}

pub fn verify_password(password: &str, pwhash: &str) -> bool {
    let parsed = match PasswordHash::new(pwhash) {
        Ok(hash) => hash,
        Err(e) => {
            error!("invalid stored password hash: {e}");
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
