pub mod finding;
pub mod scan;
pub mod target;
