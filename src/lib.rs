/*
 * Devify - Agentic Coding Assistant Engine
 * File Path: src/lib.rs
 * Responsibility: Shared library modules
 */

pub mod tools;
pub mod args;
pub mod parser;
pub mod sandbox;
pub mod guard;
pub mod rate_limit;
pub mod approval;
pub mod services;
pub mod manifest;
pub mod context;
pub mod executor;
pub mod history;
pub mod agent_loop;
pub mod session;
pub mod llm;
pub mod scheduler;
pub mod task_runner;
pub mod config;
pub mod init;
