//! Agora command-line front end.
//!
//! Stands in for a chat transport: one-shot commands for discussions,
//! single-agent questions and session administration, plus an interactive
//! chat that routes messages the way a chat bot would.

pub mod app;
pub mod chat;
pub mod cli;
pub mod commands;
pub mod render;
