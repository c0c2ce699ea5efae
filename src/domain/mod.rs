pub mod error;
pub mod identity;
pub mod levels;
pub mod models;
pub mod settings;
