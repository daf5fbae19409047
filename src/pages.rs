use std::fmt::Write;

use crate::feedback::Feedback;
use crate::forms::{FeedbackForm, FormErrors, LoginForm, RegisterForm};
use crate::user::User;

/// Form-level messages that don't belong to a single field.
pub const FORM: &str = "form";

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

fn layout(title: &str, current_user: Option<&str>, body: &str) -> String {
    let nav = match current_user {
        Some(user) => {
            let user = escape(user);
            format!(r#"<a href="/users/{user}">{user}</a> | <a href="/logout">Log out</a>"#)
        }
        None => r#"<a href="/register">Register</a> | <a href="/login">Log in</a>"#.to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
</head>
<body>
<nav>{nav}</nav>
<h1>{title}</h1>
{body}
</body>
</html>
"#,
        title = escape(title),
    )
}

fn form_errors(out: &mut String, errors: &FormErrors) {
    for msg in errors.field(FORM) {
        let _ = writeln!(out, r#"<p class="error">{}</p>"#, escape(msg));
    }
}

fn input(out: &mut String, errors: &FormErrors, name: &str, label: &str, kind: &str, value: &str) {
    let _ = write!(
        out,
        r#"<p><label for="{name}">{label}</label> <input type="{kind}" id="{name}" name="{name}" value="{}">"#,
        escape(value),
    );
    for msg in errors.field(name) {
        let _ = write!(out, r#" <span class="error">{}</span>"#, escape(msg));
    }
    out.push_str("</p>\n");
}

fn textarea(out: &mut String, errors: &FormErrors, name: &str, label: &str, value: &str) {
    let _ = write!(
        out,
        r#"<p><label for="{name}">{label}</label> <textarea id="{name}" name="{name}">{}</textarea>"#,
        escape(value),
    );
    for msg in errors.field(name) {
        let _ = write!(out, r#" <span class="error">{}</span>"#, escape(msg));
    }
    out.push_str("</p>\n");
}

pub fn register(form: &RegisterForm, errors: &FormErrors) -> String {
    let mut body = String::new();
    form_errors(&mut body, errors);

    body.push_str("<form method=\"POST\" action=\"/register\">\n");
    input(&mut body, errors, "first_name", "First Name", "text", &form.first_name);
    input(&mut body, errors, "last_name", "Last Name", "text", &form.last_name);
    input(&mut body, errors, "email", "Email Address", "email", &form.email);
    input(&mut body, errors, "username", "Username", "text", &form.username);
    // never echo the password back
    input(&mut body, errors, "password", "Password", "password", "");
    body.push_str("<button>Register</button>\n</form>\n");

    layout("Register", None, &body)
}

pub fn login(form: &LoginForm, errors: &FormErrors) -> String {
    let mut body = String::new();
    form_errors(&mut body, errors);

    body.push_str("<form method=\"POST\" action=\"/login\">\n");
    input(&mut body, errors, "username", "Username", "text", &form.username);
    input(&mut body, errors, "password", "Password", "password", "");
    body.push_str("<button>Log in</button>\n</form>\n");

    layout("Log in", None, &body)
}

pub fn profile(user: &User, feedback: &[Feedback], viewer: &str) -> String {
    let is_owner = user.username == viewer;
    let username = escape(&user.username);
    let mut body = String::new();

    let _ = writeln!(
        body,
        "<p>Username: {username}</p>\n<p>Name: {}</p>\n<p>Email: {}</p>",
        escape(&user.full_name()),
        escape(&user.email),
    );

    body.push_str("<h2>Feedback</h2>\n<ul>\n");
    for entry in feedback {
        let _ = write!(
            body,
            "<li><b>{}</b> {}",
            escape(&entry.title),
            escape(&entry.content),
        );
        if is_owner {
            let id = entry.id;
            let _ = write!(
                body,
                r#" <a href="/feedback/{id}/update">Edit</a> <form method="POST" action="/feedback/{id}/delete"><button>Delete</button></form>"#,
            );
        }
        body.push_str("</li>\n");
    }
    body.push_str("</ul>\n");

    if is_owner {
        let _ = writeln!(
            body,
            r#"<p><a href="/users/{username}/feedback/add">Add feedback</a></p>
<form method="POST" action="/users/{username}/delete"><button>Delete account</button></form>"#,
        );
    }

    layout(&user.username, Some(viewer), &body)
}

pub fn feedback(
    heading: &str,
    action: &str,
    form: &FeedbackForm,
    errors: &FormErrors,
    viewer: &str,
) -> String {
    let mut body = String::new();
    form_errors(&mut body, errors);

    let _ = writeln!(body, r#"<form method="POST" action="{}">"#, escape(action));
    input(&mut body, errors, "title", "Title", "text", &form.title);
    textarea(&mut body, errors, "content", "Content", &form.content);
    body.push_str("<button>Save</button>\n</form>\n");

    layout(heading, Some(viewer), &body)
}
