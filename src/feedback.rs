#[derive(Debug, Clone, PartialEq, Eq)]
#[derive(sqlx::FromRow)]
pub struct Feedback {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub username: String,
}

#[derive(Debug)]
pub struct FeedbackUpdate<'a> {
    pub title: &'a str,
    pub content: &'a str,
}
