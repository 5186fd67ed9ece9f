//! Serial-console contract between guest functions and the host runner.
pub mod frame;
pub mod result;
