pub mod models;
pub mod numbering;
pub mod policy;
