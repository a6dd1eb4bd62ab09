pub mod calc;
pub mod config;
pub mod db;
pub mod ipc;
pub mod merge;
pub mod plan;
pub mod plan_csv;
pub mod remote;
pub mod server;
pub mod tracker;
