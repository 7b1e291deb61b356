//! Change-management data model
//!
//! A [`ChangeLog`] owns ordered [`ChangeLogBundle`]s, each bundle owns the
//! [`ChangeItem`]s discovered for one commit. Validation and apply results
//! are recorded on the items in place.

pub mod apply;
pub mod change_log;
pub mod options;
pub mod spec;
pub mod tracking;
pub mod validation;

// Re-export commonly used types
pub use apply::*;
pub use change_log::*;
pub use options::*;
pub use spec::*;
pub use tracking::*;
pub use validation::*;
