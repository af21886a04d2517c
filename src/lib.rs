pub mod config;
pub mod credentials;
pub mod db;
pub mod dedup;
pub mod error;
pub mod events;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod routes;
pub mod runner;
pub mod sources;
