//! HTTP request handlers

pub mod chat;
pub mod command;
