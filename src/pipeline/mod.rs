//! Dimensional data pipeline - spreadsheet to staging to dimensions and facts

pub mod config;
pub mod db;
pub mod flow;
pub mod parse;
pub mod script;
pub mod sheets;
pub mod types;
pub mod update;
pub mod write;

pub use types::*;
