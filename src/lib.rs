//! Library to backup a local [XAMPP][xampp] installation.
//!
//! The focus is on the database: [`backends::Database`] produces a usable
//! backup even if the server is down or its storage is damaged, escalating
//! from a live dump to a dump from a recovery-mode server and finally to a
//! cold copy of the data files. Every schema is reported as either backed up
//! or failed, nothing is skipped silently.
//!
//! [xampp]: https://www.apachefriends.org/

#![forbid(unsafe_code)]

pub mod archive;
pub mod backends;
pub mod cli;
pub mod config;
pub mod mariadb;
pub mod report;
pub mod session;
pub mod util;
