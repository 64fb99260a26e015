//! Storage traits and implementations
//!
//! The sync engine only talks to [`MailStore`]. SQLite is the production
//! backend; the in-memory store backs tests.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::MailStore;
