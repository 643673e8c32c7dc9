// Account management: credentials, permissions, commands and handlers

pub mod commands;
pub mod handlers;
pub mod password;
pub mod permissions;
pub mod reset;
pub mod user_store;
