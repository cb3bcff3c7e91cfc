//! Generic Data Access: CRUD parameterized by model name.

pub mod repository;
pub mod session;

pub use repository::DataAccess;
pub use session::{DataSession, SessionSavepoint};
