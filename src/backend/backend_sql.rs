use std::future::Future;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{query, query_as, query_scalar, Pool, Sqlite, Transaction};

use log::{error, info};

use crate::backend::{FindError, InsertError};
use crate::feedback::{Feedback, FeedbackUpdate};
use crate::user::{NewUser, User};

type Result<T> = std::result::Result<T, ()>;

pub struct Backend(pub Pool<Sqlite>);

fn into_sql(path: &Path) -> PathBuf {
    path.join("feedback.sql")
}

impl Backend {
    pub async fn new(data_dir: &Path) -> std::result::Result<Self, sqlx::Error> {
        let db_path = into_sql(data_dir);

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!("Using {}", db_path.display());

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self(pool))
    }
}

impl Backend {
    async fn transact<'t, T, R, F>(&self, transaction: T) -> Result<R>
    where
        T: FnOnce(Transaction<'t, Sqlite>) -> F,
        F: Future<Output = Result<(Transaction<'t, Sqlite>, R)>>,
    {
        let tx = self.0.begin().await.map_err(|e| {
            error!("error beginning transaction: {:?}", e);
        })?;

        let (tx, r) = transaction(tx).await?;

        tx.commit().await.map_err(|e| {
            error!("error committing transaction: {:?}", e);
        })?;

        Ok(r)
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = e else {
        return false;
    };

    // SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE
    matches!(db_err.code().as_deref(), Some("1555" | "2067"))
        || db_err.message().starts_with("UNIQUE constraint failed")
}

impl Backend {
    pub async fn find_user(&self, username: &str) -> std::result::Result<User, FindError> {
        query_as::<_, User>(
            "
            SELECT username, password, email, first_name, last_name
            FROM users
            WHERE username = ?
            ",
        )
        .bind(username)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if matches!(e, sqlx::Error::RowNotFound) {
                FindError::NotFound
            } else {
                error!("couldn't find user {username}: {e:?}");
                FindError::Internal
            }
        })
    }

    pub async fn insert_user(&self, user: &NewUser) -> std::result::Result<(), InsertError> {
        query(
            "
            INSERT INTO users
            (username, password, email, first_name, last_name)
            VALUES
            (?, ?, ?, ?, ?)
            ",
        )
        .bind(&user.username)
        .bind(&user.pwhash)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            if is_unique_violation(&e) {
                InsertError::Conflict
            } else {
                error!("error inserting user {}: {e:?}", user.username);
                InsertError::Internal
            }
        })
    }

    /// Removes the user along with their feedback and sessions.
    /// Returns whether the user existed.
    pub async fn delete_user(&self, username: &str) -> Result<bool> {
        self.transact(|mut tx| async move {
            query("DELETE FROM feedback WHERE username = ?")
                .bind(username)
                .execute(&mut tx)
                .await
                .map_err(|e| {
                    error!("error deleting feedback of {username}: {e:?}");
                })?;

            query("DELETE FROM sessions WHERE username = ?")
                .bind(username)
                .execute(&mut tx)
                .await
                .map_err(|e| {
                    error!("error deleting sessions of {username}: {e:?}");
                })?;

            let deleted = query("DELETE FROM users WHERE username = ?")
                .bind(username)
                .execute(&mut tx)
                .await
                .map_err(|e| {
                    error!("error deleting user {username}: {e:?}");
                })?
                .rows_affected();

            Ok((tx, deleted > 0))
        })
        .await
    }
}

impl Backend {
    pub async fn create_session(&self, session_id: &str, username: &str) -> Result<()> {
        query(
            "
            INSERT INTO sessions
            (id, username)
            VALUES
            (?, ?)
            ",
        )
        .bind(session_id)
        .bind(username)
        .execute(&self.0)
        .await
        .map(|_| ())
        .map_err(|e| {
            error!("couldn't create session for {username}: {e:?}");
        })
    }

    pub async fn session_user(&self, session_id: &str) -> Result<Option<String>> {
        query_scalar::<_, String>("SELECT username FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.0)
            .await
            .map_err(|e| {
                error!("couldn't query for session {session_id}: {e:?}");
            })
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        query("DELETE FROM sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.0)
            .await
            .map(|_| ())
            .map_err(|e| {
                error!("couldn't delete session {session_id}: {e:?}");
            })
    }
}

impl Backend {
    pub async fn feedback_for_user(&self, username: &str) -> Result<Vec<Feedback>> {
        query_as::<_, Feedback>(
            "
            SELECT id, title, content, username
            FROM feedback
            WHERE username = ?
            ORDER BY id
            ",
        )
        .bind(username)
        .fetch_all(&self.0)
        .await
        .map_err(|e| {
            error!("error selecting feedback for {username}: {e:?}");
        })
    }

    pub async fn find_feedback(&self, id: i64) -> std::result::Result<Feedback, FindError> {
        query_as::<_, Feedback>(
            "
            SELECT id, title, content, username
            FROM feedback
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_one(&self.0)
        .await
        .map_err(|e| {
            if matches!(e, sqlx::Error::RowNotFound) {
                FindError::NotFound
            } else {
                error!("couldn't find feedback {id}: {e:?}");
                FindError::Internal
            }
        })
    }

    pub async fn insert_feedback(&self, username: &str, title: &str, content: &str) -> Result<i64> {
        query(
            "
            INSERT INTO feedback
            (title, content, username)
            VALUES
            (?, ?, ?)
            ",
        )
        .bind(title)
        .bind(content)
        .bind(username)
        .execute(&self.0)
        .await
        .map(|done| done.last_insert_rowid())
        .map_err(|e| {
            error!("error inserting feedback for {username}: {e:?}");
        })
    }

    /// Only touches the row if `username` owns it.
    pub async fn update_feedback(
        &self,
        id: i64,
        username: &str,
        update: FeedbackUpdate<'_>,
    ) -> Result<bool> {
        query(
            "
            UPDATE feedback
            SET title = ?, content = ?
            WHERE id = ? AND username = ?
            ",
        )
        .bind(update.title)
        .bind(update.content)
        .bind(id)
        .bind(username)
        .execute(&self.0)
        .await
        .map(|done| done.rows_affected() > 0)
        .map_err(|e| {
            error!("error updating feedback {id}: {e:?}");
        })
    }

    /// Only touches the row if `username` owns it.
    pub async fn delete_feedback(&self, id: i64, username: &str) -> Result<bool> {
        query("DELETE FROM feedback WHERE id = ? AND username = ?")
            .bind(id)
            .bind(username)
            .execute(&self.0)
            .await
            .map(|done| done.rows_affected() > 0)
            .map_err(|e| {
                error!("error deleting feedback {id}: {e:?}");
            })
    }
}
