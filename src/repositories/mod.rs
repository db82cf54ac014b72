pub mod finding_repo;
pub mod scan_repo;
pub mod target_repo;
