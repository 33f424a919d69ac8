pub mod db;
pub mod memory;
pub mod models;
pub mod source;

pub use rusqlite;
