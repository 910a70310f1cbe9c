pub mod bus;
pub mod cache;
pub mod db;
pub mod memory;
pub mod store;
