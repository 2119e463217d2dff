pub mod approvals;
pub mod directory;
pub mod errors;
pub mod numbering;
pub mod orders;
pub mod requests;
