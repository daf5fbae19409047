use std::result;
use std::str::FromStr;

use log::{debug, error, info, warn};
use warp::http;

use crate::auth::{self, AuthAttempt, SessionId};
use crate::backend::{Backend, FindError, InsertError};
use crate::feedback::{Feedback, FeedbackUpdate};
use crate::forms::{FeedbackForm, RegisterForm};
use crate::session::{Owner, Session};
use crate::user::User;

pub struct Board(Backend);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    Internal,
    NotFound,
    UsernameTaken,
}

pub type Result<T> = result::Result<T, Error>;

impl From<Error> for http::StatusCode {
    fn from(e: Error) -> Self {
        match e {
            Error::Internal => http::StatusCode::INTERNAL_SERVER_ERROR,
            Error::NotFound => http::StatusCode::NOT_FOUND,
            Error::UsernameTaken => http::StatusCode::CONFLICT,
        }
    }
}

impl From<FindError> for Error {
    fn from(e: FindError) -> Self {
        match e {
            FindError::NotFound => Error::NotFound,
            FindError::Internal => Error::Internal,
        }
    }
}

impl warp::reject::Reject for Error {}

impl Board {
    pub fn new(backend: Backend) -> Self {
        Self(backend)
    }

    /// Persists a validated registration. The password is hashed before it
    /// reaches the store.
    pub async fn register(&self, form: &RegisterForm) -> Result<User> {
        let new_user = auth::register(form).map_err(|()| Error::Internal)?;

        match self.0.insert_user(&new_user).await {
            Ok(()) => {}
            Err(InsertError::Conflict) => {
                info!("{} register: username taken", new_user.username);
                return Err(Error::UsernameTaken);
            }
            Err(InsertError::Internal) => return Err(Error::Internal),
        }

        info!("{} registered", new_user.username);

        Ok(User {
            username: new_user.username,
            password: new_user.pwhash,
            email: new_user.email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
        })
    }

    /// `Ok(None)` covers both an unknown user and a wrong password.
    pub async fn authenticate(&self, attempt: &AuthAttempt) -> Result<Option<User>> {
        let username = attempt.user();

        let user = match self.0.find_user(username).await {
            Ok(user) => user,
            Err(FindError::NotFound) => {
                warn!("rejecting non-existant user {username}");
                return Ok(None);
            }
            Err(FindError::Internal) => return Err(Error::Internal),
        };

        if attempt.matches(&user) {
            Ok(Some(user))
        } else {
            warn!("wrong password for user {username}");
            Ok(None)
        }
    }

    /// Resolves the cookie sent by the client. Anything unrecognised is an
    /// anonymous session.
    pub async fn session(&self, cookie: Option<&str>) -> Result<Session> {
        let Some(cookie) = cookie else {
            return Ok(Session::anonymous());
        };

        let Ok(session_id) = SessionId::from_str(cookie) else {
            debug!("malformed session cookie");
            return Ok(Session::anonymous());
        };

        let username = self
            .0
            .session_user(&session_id.to_string())
            .await
            .map_err(|()| Error::Internal)?;

        Ok(match username {
            Some(username) => {
                debug!("found user by session");
                Session::authenticated(session_id, username)
            }
            None => {
                debug!("no user found for session {session_id}");
                Session::anonymous()
            }
        })
    }

    /// Starts a fresh session for `username`, dropping `previous` if it was
    /// live.
    pub async fn login(&self, previous: &Session, username: &str) -> Result<Session> {
        self.logout(previous).await?;

        let session_id = SessionId::new();
        self.0
            .create_session(&session_id.to_string(), username)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{username} login: new session created");
        Ok(Session::authenticated(session_id, username.to_string()))
    }

    pub async fn logout(&self, session: &Session) -> Result<()> {
        let Some(id) = session.id() else {
            return Ok(());
        };

        if let Some(username) = session.current_user() {
            info!("{username} logout");
        }

        self.0
            .delete_session(&id.to_string())
            .await
            .map_err(|()| Error::Internal)
    }

    pub async fn user(&self, username: &str) -> Result<User> {
        Ok(self.0.find_user(username).await?)
    }

    pub async fn feedback_for(&self, username: &str) -> Result<Vec<Feedback>> {
        self.0
            .feedback_for_user(username)
            .await
            .map(|feedback| {
                debug!("{username}, {} feedback entries", feedback.len());
                feedback
            })
            .map_err(|()| Error::Internal)
    }

    pub async fn feedback(&self, id: i64) -> Result<Feedback> {
        Ok(self.0.find_feedback(id).await?)
    }
}

impl Board {
    pub async fn delete_user(&self, owner: &Owner<'_>) -> Result<()> {
        let username = owner.username();

        let existed = self
            .0
            .delete_user(username)
            .await
            .map_err(|()| Error::Internal)?;

        if existed {
            info!("{username} deleted");
            Ok(())
        } else {
            error!("{username} vanished before deletion");
            Err(Error::NotFound)
        }
    }

    pub async fn add_feedback(&self, owner: &Owner<'_>, form: &FeedbackForm) -> Result<i64> {
        let username = owner.username();

        let id = self
            .0
            .insert_feedback(username, &form.title, &form.content)
            .await
            .map_err(|()| Error::Internal)?;

        info!("{username} added feedback {id}");
        Ok(id)
    }

    pub async fn update_feedback(
        &self,
        owner: &Owner<'_>,
        id: i64,
        form: &FeedbackForm,
    ) -> Result<()> {
        let username = owner.username();
        let update = FeedbackUpdate {
            title: &form.title,
            content: &form.content,
        };

        let updated = self
            .0
            .update_feedback(id, username, update)
            .await
            .map_err(|()| Error::Internal)?;

        if updated {
            info!("{username} updated feedback {id}");
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    pub async fn delete_feedback(&self, owner: &Owner<'_>, id: i64) -> Result<()> {
        let username = owner.username();

        let deleted = self
            .0
            .delete_feedback(id, username)
            .await
            .map_err(|()| Error::Internal)?;

        if deleted {
            info!("{username} deleted feedback {id}");
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }
}
