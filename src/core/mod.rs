pub mod error;
pub mod naming;
pub mod value;

pub use error::{DriverError, OrmError, Result, ValidationDetail, ValidationError, UNIQUE_VIOLATION};
pub use value::Value;
