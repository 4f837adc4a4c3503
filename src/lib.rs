// src/lib.rs

pub mod chat;
pub mod config;
pub mod context;
pub mod db;
pub mod enrich;
pub mod error;
pub mod llm;
pub mod logging;
pub mod lookup;
pub mod session;
