pub mod connection;
pub mod listener;
