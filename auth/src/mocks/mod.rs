//! Mock implementations for testing.
//!
//! In-memory stand-ins for the storage traits, for use in unit and
//! integration tests of crates that sit on top of authentication.

pub mod user;

pub use user::MockUserRepository;
