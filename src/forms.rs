use serde::Deserialize;

use crate::feedback::Feedback;

pub const USERNAME_MAX: usize = 20;
pub const EMAIL_MAX: usize = 50;
pub const NAME_MAX: usize = 30;
pub const TITLE_MAX: usize = 100;

const REQUIRED: &str = "This field is required.";

/// Field name -> message, in the order the problems were found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FormErrors(Vec<(&'static str, String)>);

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push((field, message.into()));
    }

    /// Messages for one field.
    pub fn field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(f, _)| *f == field)
            .map(|(_, msg)| msg.as_str())
    }

    pub fn has(&self, field: &str) -> bool {
        self.field(field).next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RegisterForm {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FeedbackForm {
    pub title: String,
    pub content: String,
}

impl RegisterForm {
    /// Trims every field but the password, then checks it.
    pub fn validate(&mut self) -> Result<(), FormErrors> {
        trim(&mut self.username);
        trim(&mut self.email);
        trim(&mut self.first_name);
        trim(&mut self.last_name);

        let mut errors = FormErrors::new();

        check_username(&mut errors, &self.username);
        required(&mut errors, "password", &self.password);

        if required(&mut errors, "email", &self.email)
            && !too_long(&mut errors, "email", &self.email, EMAIL_MAX)
            && !is_email(&self.email)
        {
            errors.add("email", "Invalid email address.");
        }

        for (field, value) in [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
        ] {
            if required(&mut errors, field, value) {
                too_long(&mut errors, field, value, NAME_MAX);
            }
        }

        errors.into_result()
    }
}

impl LoginForm {
    pub fn validate(&mut self) -> Result<(), FormErrors> {
        trim(&mut self.username);

        let mut errors = FormErrors::new();
        required(&mut errors, "username", &self.username);
        required(&mut errors, "password", &self.password);
        errors.into_result()
    }
}

impl FeedbackForm {
    pub fn validate(&mut self) -> Result<(), FormErrors> {
        trim(&mut self.title);
        trim(&mut self.content);

        let mut errors = FormErrors::new();
        if required(&mut errors, "title", &self.title) {
            too_long(&mut errors, "title", &self.title, TITLE_MAX);
        }
        required(&mut errors, "content", &self.content);
        errors.into_result()
    }
}

impl From<&Feedback> for FeedbackForm {
    fn from(feedback: &Feedback) -> Self {
        Self {
            title: feedback.title.clone(),
            content: feedback.content.clone(),
        }
    }
}

fn trim(s: &mut String) {
    let trimmed = s.trim();
    if trimmed.len() != s.len() {
        *s = trimmed.to_string();
    }
}

/// Returns whether the field was present.
fn required(errors: &mut FormErrors, field: &'static str, value: &str) -> bool {
    if value.is_empty() {
        errors.add(field, REQUIRED);
        false
    } else {
        true
    }
}

fn too_long(errors: &mut FormErrors, field: &'static str, value: &str, max: usize) -> bool {
    if value.chars().count() > max {
        errors.add(field, format!("Must be at most {max} characters."));
        true
    } else {
        false
    }
}

fn check_username(errors: &mut FormErrors, username: &str) {
    if !required(errors, "username", username) {
        return;
    }
    if too_long(errors, "username", username, USERNAME_MAX) {
        return;
    }
    if !username.chars().all(is_username_char) {
        errors.add(
            "username",
            "Only letters, digits, '_', '-' and '.' are allowed.",
        );
    }
}

pub fn is_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.rsplit_once('@') else {
        return false;
    };

    if local.is_empty() || s.chars().any(char::is_whitespace) {
        return false;
    }

    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty() && !host.contains('@'),
        None => false,
    }
}
