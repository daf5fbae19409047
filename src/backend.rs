#[derive(Debug)]
pub enum FindError {
    NotFound,
    Internal,
}

#[derive(Debug)]
pub enum InsertError {
    /// A unique column already holds this value
    Conflict,
    Internal,
}

mod backend_sql;
pub use backend_sql::*;
