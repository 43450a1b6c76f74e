//! Inbox Assist: resumable email triage with human approval of every reply.

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod mail;
pub mod notify;
pub mod store;
pub mod workflow;
