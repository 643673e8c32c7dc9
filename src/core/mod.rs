// Core domain types shared across the crate

pub mod errors;
pub mod models;
