//! # woscite
//!
//! Web of Science DOI and citing-record export pipeline
//!
//! ## Modules
//!
//! - [`wos`] - Portal session driving a real browser (search, export, capture)
//! - [`table`] - Tabular frame for parsed exports and the final CSV
//! - [`cookies`] - Cookie persistence
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use woscite::wos::{Session, SessionOptions};
//!
//! fn main() -> anyhow::Result<()> {
//!     let session = Session::start(SessionOptions::default())?;
//!     let records = session.fetch("10.1103/PhysRevLett.116.061102")?;
//!     println!("{} record(s)", records.row_count());
//!     Ok(())
//! }
//! ```

pub mod cookies;
pub mod error;
pub mod table;
pub mod wos;

pub use error::{Result, WosError};
