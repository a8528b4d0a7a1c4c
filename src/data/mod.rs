//! Data layer module
//!
//! SQLite persistence for users, quizzes, enrolments, sessions and
//! single-use access keys.

mod database;
mod models;

pub use database::Database;
pub use models::*;

#[cfg(test)]
mod database_test;
