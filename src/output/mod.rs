//! Output formatters for a session's duplicate groups.
//!
//! - JSON for automation and for external tools that act on the groups
//! - CSV for spreadsheet import
//!
//! # Example
//!
//! ```no_run
//! use neardupe::output::csv::CsvOutput;
//! # let groups: Vec<neardupe::duplicates::DuplicateGroup> = Vec::new();
//!
//! CsvOutput::new(&groups).write_to(std::io::stdout()).unwrap();
//! ```

pub mod csv;
pub mod json;

pub use csv::{CsvOutput, CsvOutputError};
pub use json::{JsonOutput, JsonOutputError};
