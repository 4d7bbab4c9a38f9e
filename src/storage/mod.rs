//! SQLite persistence for outlets, authors, tags and articles.
//!
//! Uniqueness is enforced by the schema, not in process: article URLs,
//! `(outlet_id, author name)` pairs and tag terms each carry a UNIQUE
//! constraint, and the create operations report violations as typed errors.

mod articles;
mod authors;
mod outlets;
mod schema;
mod tags;
mod types;

pub use schema::Database;
pub use types::{
    Article, ArticleFilter, Author, AuthorFilter, CreateArticleError, DatabaseError,
    DuplicateArticleError, NewArticle, NewOutlet, Outlet, Tag,
};

/// Build a `LIKE ... ESCAPE '\'` pattern matching `needle` as a lowercase
/// substring. Callers compare against `lower(column)`.
///
/// SQLite's `lower()` folds ASCII only, so the needle is folded the same way.
pub(crate) fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.to_ascii_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
