pub mod api;
pub mod app;
pub mod auth;
pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod global;
pub mod inflight;
pub mod meeting;
pub mod ui;
