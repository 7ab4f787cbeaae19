mod result;

pub use result::{QueryResult, Records, Row};
