pub mod analyzer;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod llm;
pub mod report;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod task;
pub mod web;
pub mod window;
