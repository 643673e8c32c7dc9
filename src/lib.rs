// Library root for Authgate

pub mod core;
pub mod audit;
pub mod bus;
pub mod auth;
pub mod token;
pub mod api;
pub mod config;
