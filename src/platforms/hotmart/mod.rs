//! Hotmart club: login, lesson listing and media URL extraction.

pub mod auth;
pub mod catalog;
pub mod extractor;
pub mod parser;

pub use auth::{with_session, AuthState, Credentials, Session};
pub use catalog::{find_entry, list_entries};
pub use extractor::{LessonMedia, MediaResolver, PageExtractor};
