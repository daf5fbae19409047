#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(sqlx::FromRow)]
pub struct User {
    pub username: String,
    /// argon2 PHC string, never the plaintext
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// A user that hasn't been persisted yet. Built by `auth::register`.
#[derive(Debug)]
pub struct NewUser {
    pub username: String,
    pub pwhash: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
