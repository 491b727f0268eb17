pub mod config;
pub mod health;
pub mod task;
pub mod worker;
