//! Read-only inspection of installed and remotely available modules.

mod report;
mod scan;

pub use report::*;
pub use scan::*;
