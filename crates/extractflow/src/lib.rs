pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod consumer;
pub mod db;
pub mod extract;
pub mod jobs;
pub mod queue;
pub mod submission;
pub mod telemetry;
