pub mod error;
pub mod types;
pub mod value;

pub use error::{PlatformError, Result};
pub use types::{Column, Row};
pub use value::{DataType, Value};
