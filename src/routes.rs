use std::convert::Infallible;
use std::sync::Arc;

use log::{error, info};
use serde::de::DeserializeOwned;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::auth::AuthAttempt;
use crate::board::{self, Board};
use crate::forms::{FeedbackForm, FormErrors, LoginForm, RegisterForm};
use crate::pages;
use crate::session::{Session, COOKIE_NAME};

const FORM_LIMIT: u64 = 16 * 1024;

const TAKEN: &str = "Username already taken. Please pick another.";
const INVALID_CREDENTIALS: &str = "Invalid username/password.";

type HandlerResult = Result<Response, Rejection>;

#[derive(Clone)]
pub struct Ctx {
    board: Arc<Board>,
    /// Whether clients connect over https, making the cookie `Secure`.
    secure: bool,
}

impl Ctx {
    pub fn new(board: Board, secure: bool) -> Self {
        Self {
            board: Arc::new(board),
            secure,
        }
    }
}

pub fn routes(ctx: Ctx) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let with_ctx = {
        let ctx = ctx.clone();
        warp::any().map(move || ctx.clone())
    };

    let session = warp::cookie::optional::<String>(COOKIE_NAME)
        .and(with_ctx.clone())
        .and_then(|cookie: Option<String>, ctx: Ctx| async move {
            ctx.board
                .session(cookie.as_deref())
                .await
                .map_err(warp::reject::custom)
        });

    let index = warp::path::end()
        .and(warp::get())
        .map(|| redirect("/register"));

    let register = {
        let show = warp::path!("register")
            .and(warp::get())
            .and(session.clone())
            .and_then(show_register);

        let handle = warp::path!("register")
            .and(warp::post())
            .and(with_ctx.clone())
            .and(session.clone())
            .and(form())
            .and_then(handle_register);

        show.or(handle)
    };

    let login = {
        let show = warp::path!("login")
            .and(warp::get())
            .and(session.clone())
            .and_then(show_login);

        let handle = warp::path!("login")
            .and(warp::post())
            .and(with_ctx.clone())
            .and(session.clone())
            .and(form())
            .and_then(handle_login);

        show.or(handle)
    };

    let logout = warp::path!("logout")
        .and(warp::get())
        .and(with_ctx.clone())
        .and(session.clone())
        .and_then(logout);

    let users = {
        let profile = warp::path!("users" / String)
            .and(warp::get())
            .and(with_ctx.clone())
            .and(session.clone())
            .and_then(profile);

        let show_add = warp::path!("users" / String / "feedback" / "add")
            .and(warp::get())
            .and(session.clone())
            .and_then(show_add_feedback);

        let handle_add = warp::path!("users" / String / "feedback" / "add")
            .and(warp::post())
            .and(with_ctx.clone())
            .and(session.clone())
            .and(form())
            .and_then(handle_add_feedback);

        let delete = warp::path!("users" / String / "delete")
            .and(warp::post())
            .and(with_ctx.clone())
            .and(session.clone())
            .and_then(delete_user);

        profile.or(show_add).or(handle_add).or(delete)
    };

    let feedback = {
        let show_update = warp::path!("feedback" / i64 / "update")
            .and(warp::get())
            .and(with_ctx.clone())
            .and(session.clone())
            .and_then(show_update_feedback);

        let handle_update = warp::path!("feedback" / i64 / "update")
            .and(warp::post())
            .and(with_ctx.clone())
            .and(session.clone())
            .and(form())
            .and_then(handle_update_feedback);

        let delete = warp::path!("feedback" / i64 / "delete")
            .and(warp::post())
            .and(with_ctx.clone())
            .and(session.clone())
            .and_then(delete_feedback);

        show_update.or(handle_update).or(delete)
    };

    index
        .or(register)
        .or(login)
        .or(logout)
        .or(users)
        .or(feedback)
        .recover(recover)
        .with(warp::log("feedback_board"))
}

fn form<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: DeserializeOwned + Send,
{
    warp::body::content_length_limit(FORM_LIMIT).and(warp::body::form())
}

fn redirect(location: &str) -> Response {
    warp::reply::with_header(
        StatusCode::SEE_OTHER,
        "location",
        location.to_string(),
    )
    .into_response()
}

fn profile_path(username: &str) -> String {
    format!("/users/{username}")
}

fn with_session(reply: Response, session: &Session, secure: bool) -> Response {
    warp::reply::with_header(
        reply,
        "set-cookie",
        session.cookie(secure).to_string(),
    )
    .into_response()
}

fn html(page: String) -> Response {
    warp::reply::html(page).into_response()
}

fn reject(e: board::Error) -> Rejection {
    warp::reject::custom(e)
}

/// The session's user, or a redirect to the login page.
macro_rules! require_login {
    ($session: expr) => {
        match $session.current_user() {
            Some(user) => user,
            None => return Ok(redirect("/login")),
        }
    };
}

async fn show_register(session: Session) -> HandlerResult {
    if let Some(user) = session.current_user() {
        return Ok(redirect(&profile_path(user)));
    }

    Ok(html(pages::register(
        &RegisterForm::default(),
        &FormErrors::new(),
    )))
}

async fn handle_register(ctx: Ctx, session: Session, mut form: RegisterForm) -> HandlerResult {
    if let Err(errors) = form.validate() {
        return Ok(html(pages::register(&form, &errors)));
    }

    let user = match ctx.board.register(&form).await {
        Ok(user) => user,
        Err(board::Error::UsernameTaken) => {
            let errors = FormErrors::single("username", TAKEN);
            return Ok(html(pages::register(&form, &errors)));
        }
        Err(e) => return Err(reject(e)),
    };

    let session = ctx
        .board
        .login(&session, &user.username)
        .await
        .map_err(reject)?;

    Ok(with_session(
        redirect(&profile_path(&user.username)),
        &session,
        ctx.secure,
    ))
}

async fn show_login(session: Session) -> HandlerResult {
    if let Some(user) = session.current_user() {
        return Ok(redirect(&profile_path(user)));
    }

    Ok(html(pages::login(&LoginForm::default(), &FormErrors::new())))
}

async fn handle_login(ctx: Ctx, session: Session, mut form: LoginForm) -> HandlerResult {
    if let Err(errors) = form.validate() {
        return Ok(html(pages::login(&form, &errors)));
    }

    let attempt = AuthAttempt::new(form.username.as_str(), form.password.as_str());
    let Some(user) = ctx.board.authenticate(&attempt).await.map_err(reject)? else {
        let errors = FormErrors::single(pages::FORM, INVALID_CREDENTIALS);
        return Ok(html(pages::login(&form, &errors)));
    };

    let session = ctx
        .board
        .login(&session, &user.username)
        .await
        .map_err(reject)?;

    Ok(with_session(
        redirect(&profile_path(&user.username)),
        &session,
        ctx.secure,
    ))
}

async fn logout(ctx: Ctx, session: Session) -> HandlerResult {
    ctx.board.logout(&session).await.map_err(reject)?;

    Ok(with_session(
        redirect("/login"),
        &Session::anonymous(),
        ctx.secure,
    ))
}

async fn profile(username: String, ctx: Ctx, session: Session) -> HandlerResult {
    let viewer = require_login!(session);

    let user = ctx.board.user(&username).await.map_err(reject)?;
    let feedback = ctx.board.feedback_for(&username).await.map_err(reject)?;

    Ok(html(pages::profile(&user, &feedback, viewer)))
}

fn add_feedback_page(username: &str, form: &FeedbackForm, errors: &FormErrors) -> Response {
    html(pages::feedback(
        "Add Feedback",
        &format!("/users/{username}/feedback/add"),
        form,
        errors,
        username,
    ))
}

async fn show_add_feedback(username: String, session: Session) -> HandlerResult {
    require_login!(session);

    if session.owner_of(&username).is_none() {
        return Ok(redirect(&profile_path(&username)));
    }

    Ok(add_feedback_page(
        &username,
        &FeedbackForm::default(),
        &FormErrors::new(),
    ))
}

async fn handle_add_feedback(
    username: String,
    ctx: Ctx,
    session: Session,
    mut form: FeedbackForm,
) -> HandlerResult {
    require_login!(session);

    let Some(owner) = session.owner_of(&username) else {
        info!("{:?} may not add feedback for {username}", session.current_user());
        return Ok(redirect(&profile_path(&username)));
    };

    if let Err(errors) = form.validate() {
        return Ok(add_feedback_page(&username, &form, &errors));
    }

    ctx.board
        .add_feedback(&owner, &form)
        .await
        .map_err(reject)?;

    Ok(redirect(&profile_path(&username)))
}

async fn delete_user(username: String, ctx: Ctx, session: Session) -> HandlerResult {
    let current = require_login!(session);

    let Some(owner) = session.owner_of(&username) else {
        info!("{current} may not delete {username}");
        return Ok(redirect(&profile_path(current)));
    };

    ctx.board.delete_user(&owner).await.map_err(reject)?;

    Ok(with_session(
        redirect("/"),
        &Session::anonymous(),
        ctx.secure,
    ))
}

fn update_feedback_page(id: i64, form: &FeedbackForm, errors: &FormErrors, viewer: &str) -> Response {
    html(pages::feedback(
        "Edit Feedback",
        &format!("/feedback/{id}/update"),
        form,
        errors,
        viewer,
    ))
}

async fn show_update_feedback(id: i64, ctx: Ctx, session: Session) -> HandlerResult {
    let current = require_login!(session);

    let feedback = ctx.board.feedback(id).await.map_err(reject)?;

    if session.owner_of(&feedback.username).is_none() {
        return Ok(redirect(&profile_path(current)));
    }

    Ok(update_feedback_page(
        id,
        &FeedbackForm::from(&feedback),
        &FormErrors::new(),
        current,
    ))
}

async fn handle_update_feedback(
    id: i64,
    ctx: Ctx,
    session: Session,
    mut form: FeedbackForm,
) -> HandlerResult {
    let current = require_login!(session);

    let feedback = ctx.board.feedback(id).await.map_err(reject)?;

    let Some(owner) = session.owner_of(&feedback.username) else {
        info!("{current} may not edit feedback {id}");
        return Ok(redirect(&profile_path(current)));
    };

    if let Err(errors) = form.validate() {
        return Ok(update_feedback_page(id, &form, &errors, current));
    }

    ctx.board
        .update_feedback(&owner, id, &form)
        .await
        .map_err(reject)?;

    Ok(redirect(&profile_path(owner.username())))
}

async fn delete_feedback(id: i64, ctx: Ctx, session: Session) -> HandlerResult {
    let current = require_login!(session);

    let feedback = ctx.board.feedback(id).await.map_err(reject)?;

    let Some(owner) = session.owner_of(&feedback.username) else {
        info!("{current} may not delete feedback {id}");
        return Ok(redirect(&profile_path(current)));
    };

    ctx.board
        .delete_feedback(&owner, id)
        .await
        .map_err(reject)?;

    Ok(redirect(&profile_path(owner.username())))
}

async fn recover(err: Rejection) -> Result<impl Reply, Infallible> {
    let status = if let Some(&e) = err.find::<board::Error>() {
        StatusCode::from(e)
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        StatusCode::LENGTH_REQUIRED
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        StatusCode::BAD_REQUEST
    } else {
        error!("unhandled rejection: {err:?}");
        StatusCode::INTERNAL_SERVER_ERROR
    };

    if status.is_server_error() {
        error!("request failed: {status}");
    }

    Ok(warp::reply::with_status(
        status.canonical_reason().unwrap_or("error"),
        status,
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    use cookie::Cookie;
    use warp::http::Response as HttpResponse;
    use warp::hyper::body::Bytes;

    use crate::board::test::{create_board, rows};

    type Res = HttpResponse<Bytes>;

    async fn setup() -> Ctx {
        Ctx::new(create_board().await, false)
    }

    async fn get(ctx: &Ctx, path: &str, cookie: Option<&str>) -> Res {
        let mut req = warp::test::request().method("GET").path(path);
        if let Some(cookie) = cookie {
            req = req.header("cookie", format!("{COOKIE_NAME}={cookie}"));
        }
        req.reply(&routes(ctx.clone())).await
    }

    async fn post(ctx: &Ctx, path: &str, body: &str, cookie: Option<&str>) -> Res {
        let mut req = warp::test::request()
            .method("POST")
            .path(path)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body.to_string());
        if let Some(cookie) = cookie {
            req = req.header("cookie", format!("{COOKIE_NAME}={cookie}"));
        }
        req.reply(&routes(ctx.clone())).await
    }

    fn location(res: &Res) -> &str {
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
        res.headers()["location"].to_str().unwrap()
    }

    fn set_cookie(res: &Res) -> Option<Cookie<'static>> {
        let raw = res.headers().get("set-cookie")?.to_str().unwrap().to_string();
        Some(Cookie::parse(raw).unwrap())
    }

    fn body(res: &Res) -> &str {
        std::str::from_utf8(res.body()).unwrap()
    }

    async fn session_user(ctx: &Ctx, cookie: &str) -> Option<String> {
        ctx.board
            .session(Some(cookie))
            .await
            .unwrap()
            .current_user()
            .map(str::to_string)
    }

    /// Registers `username` (password "pw") and returns the session cookie.
    async fn register(ctx: &Ctx, username: &str) -> String {
        let body = format!(
            "username={username}&password=pw&email={username}%40x.com&first_name=F&last_name=L"
        );
        let res = post(ctx, "/register", &body, None).await;
        assert_eq!(location(&res), format!("/users/{username}"));
        set_cookie(&res).unwrap().value().to_string()
    }

    async fn add_feedback(ctx: &Ctx, username: &str, cookie: &str, title: &str) -> Res {
        let path = format!("/users/{username}/feedback/add");
        post(ctx, &path, &format!("title={title}&content=words"), Some(cookie)).await
    }

    #[tokio::test]
    async fn index_redirects_to_register() {
        let ctx = setup().await;

        let res = get(&ctx, "/", None).await;
        assert_eq!(location(&res), "/register");

        let res = get(&ctx, "/register", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body(&res).contains(r#"name="username""#));
    }

    #[tokio::test]
    async fn register_logs_in_and_redirects() {
        let ctx = setup().await;

        let res = post(
            &ctx,
            "/register",
            "username=ann&password=pw&email=a%40x.com&first_name=A&last_name=N",
            None,
        )
        .await;

        assert_eq!(location(&res), "/users/ann");
        assert_eq!(rows(&ctx.board, "users").await, 1);

        let cookie = set_cookie(&res).unwrap();
        assert_eq!(cookie.name(), COOKIE_NAME);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(session_user(&ctx, cookie.value()).await.as_deref(), Some("ann"));

        let res = get(&ctx, "/users/ann", Some(cookie.value())).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body(&res).contains("a@x.com"));

        // already logged in
        let res = get(&ctx, "/register", Some(cookie.value())).await;
        assert_eq!(location(&res), "/users/ann");
        let res = get(&ctx, "/login", Some(cookie.value())).await;
        assert_eq!(location(&res), "/users/ann");
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_form_error() {
        let ctx = setup().await;
        register(&ctx, "alice").await;

        let res = post(
            &ctx,
            "/register",
            "username=alice&password=other&email=b%40x.com&first_name=B&last_name=C",
            None,
        )
        .await;

        assert_eq!(res.status(), StatusCode::OK);
        assert!(body(&res).contains(TAKEN));
        assert!(set_cookie(&res).is_none());
        assert_eq!(rows(&ctx.board, "users").await, 1);
    }

    #[tokio::test]
    async fn invalid_registration_rerenders() {
        let ctx = setup().await;

        let res = post(&ctx, "/register", "username=ann&email=nope", None).await;

        assert_eq!(res.status(), StatusCode::OK);
        let page = body(&res);
        assert!(page.contains("This field is required."));
        assert!(page.contains("Invalid email address."));
        assert!(page.contains(r#"value="ann""#));
        assert_eq!(rows(&ctx.board, "users").await, 0);
    }

    #[tokio::test]
    async fn protected_pages_need_login() {
        let ctx = setup().await;
        register(&ctx, "alice").await;

        for cookie in [None, Some("garbage")] {
            let res = get(&ctx, "/users/alice", cookie).await;
            assert_eq!(location(&res), "/login");

            let res = get(&ctx, "/users/alice/feedback/add", cookie).await;
            assert_eq!(location(&res), "/login");

            let res = post(&ctx, "/users/alice/delete", "", cookie).await;
            assert_eq!(location(&res), "/login");
        }

        assert_eq!(rows(&ctx.board, "users").await, 1);
    }

    #[tokio::test]
    async fn login_is_generic_on_failure() {
        let ctx = setup().await;
        register(&ctx, "alice").await;

        for attempt in ["username=alice&password=wrong", "username=bob&password=pw"] {
            let res = post(&ctx, "/login", attempt, None).await;
            assert_eq!(res.status(), StatusCode::OK);
            assert!(body(&res).contains(INVALID_CREDENTIALS), "{attempt}");
            assert!(set_cookie(&res).is_none());
        }

        let res = post(&ctx, "/login", "username=alice", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body(&res).contains("This field is required."));

        let res = post(&ctx, "/login", "username=alice&password=pw", None).await;
        assert_eq!(location(&res), "/users/alice");
        let cookie = set_cookie(&res).unwrap();
        assert_eq!(session_user(&ctx, cookie.value()).await.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn logout_ends_session() {
        let ctx = setup().await;
        let cookie = register(&ctx, "alice").await;

        let res = get(&ctx, "/logout", Some(&cookie)).await;
        assert_eq!(location(&res), "/login");
        assert_eq!(set_cookie(&res).unwrap().value(), "");

        assert_eq!(session_user(&ctx, &cookie).await, None);
        let res = get(&ctx, "/users/alice", Some(&cookie)).await;
        assert_eq!(location(&res), "/login");
    }

    #[tokio::test]
    async fn only_owner_adds_feedback() {
        let ctx = setup().await;
        let alice = register(&ctx, "alice").await;
        let bob = register(&ctx, "bob").await;

        let res = get(&ctx, "/users/alice/feedback/add", Some(&bob)).await;
        assert_eq!(location(&res), "/users/alice");

        let res = add_feedback(&ctx, "alice", &bob, "sneaky").await;
        assert_eq!(location(&res), "/users/alice");
        assert_eq!(rows(&ctx.board, "feedback").await, 0);

        let res = add_feedback(&ctx, "alice", &alice, "hello").await;
        assert_eq!(location(&res), "/users/alice");
        assert_eq!(rows(&ctx.board, "feedback").await, 1);

        // bob may read it, but gets no controls
        let res = get(&ctx, "/users/alice", Some(&bob)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body(&res).contains("hello"));
        assert!(!body(&res).contains("/delete"));

        let res = post(
            &ctx,
            "/users/alice/feedback/add",
            "title=&content=x",
            Some(&alice),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body(&res).contains("This field is required."));
        assert_eq!(rows(&ctx.board, "feedback").await, 1);
    }

    #[tokio::test]
    async fn bob_cannot_delete_alices_feedback() {
        let ctx = setup().await;
        let alice = register(&ctx, "alice").await;
        let bob = register(&ctx, "bob").await;

        add_feedback(&ctx, "alice", &alice, "note").await;
        let entries = ctx.board.feedback_for("alice").await.unwrap();
        let [ref entry] = entries[..] else {
            panic!("expected single feedback")
        };
        let path = format!("/feedback/{}/delete", entry.id);

        let res = post(&ctx, &path, "", Some(&bob)).await;
        assert_eq!(location(&res), "/users/bob");
        assert_eq!(rows(&ctx.board, "feedback").await, 1);

        let res = post(&ctx, &path, "", Some(&alice)).await;
        assert_eq!(location(&res), "/users/alice");
        assert_eq!(rows(&ctx.board, "feedback").await, 0);

        let res = post(&ctx, &path, "", Some(&alice)).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn only_owner_edits_feedback() {
        let ctx = setup().await;
        let alice = register(&ctx, "alice").await;
        let bob = register(&ctx, "bob").await;

        add_feedback(&ctx, "alice", &alice, "draft").await;
        let id = ctx.board.feedback_for("alice").await.unwrap()[0].id;
        let path = format!("/feedback/{id}/update");

        let res = get(&ctx, &path, Some(&bob)).await;
        assert_eq!(location(&res), "/users/bob");
        let res = post(&ctx, &path, "title=mine&content=x", Some(&bob)).await;
        assert_eq!(location(&res), "/users/bob");

        let res = get(&ctx, &path, Some(&alice)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(body(&res).contains(r#"value="draft""#));

        let res = post(&ctx, &path, "title=&content=x", Some(&alice)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(ctx.board.feedback(id).await.unwrap().title, "draft");

        let res = post(&ctx, &path, "title=final&content=x", Some(&alice)).await;
        assert_eq!(location(&res), "/users/alice");
        assert_eq!(ctx.board.feedback(id).await.unwrap().title, "final");
    }

    #[tokio::test]
    async fn delete_user_cascades() {
        let ctx = setup().await;
        let alice = register(&ctx, "alice").await;
        let bob = register(&ctx, "bob").await;

        add_feedback(&ctx, "alice", &alice, "one").await;
        add_feedback(&ctx, "alice", &alice, "two").await;
        add_feedback(&ctx, "bob", &bob, "three").await;
        assert_eq!(rows(&ctx.board, "feedback").await, 3);

        let res = post(&ctx, "/users/alice/delete", "", Some(&bob)).await;
        assert_eq!(location(&res), "/users/bob");
        assert_eq!(rows(&ctx.board, "users").await, 2);
        assert_eq!(rows(&ctx.board, "feedback").await, 3);

        let res = post(&ctx, "/users/alice/delete", "", Some(&alice)).await;
        assert_eq!(location(&res), "/");
        assert_eq!(set_cookie(&res).unwrap().value(), "");

        assert_eq!(rows(&ctx.board, "users").await, 1);
        assert_eq!(rows(&ctx.board, "feedback").await, 1);
        assert_eq!(session_user(&ctx, &alice).await, None);

        let res = get(&ctx, "/users/alice", Some(&bob)).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_things_are_not_found() {
        let ctx = setup().await;
        let alice = register(&ctx, "alice").await;

        let res = get(&ctx, "/users/nobody", Some(&alice)).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = post(&ctx, "/feedback/999/delete", "", Some(&alice)).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = get(&ctx, "/no/such/page", None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
