pub mod catalog;
pub mod download;
pub mod errors;
pub mod media;

pub use clubget_core::models::settings;
