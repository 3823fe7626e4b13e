//! A local chat front-end for the Anthropic Messages API (or OpenAI chat
//! completions) with tool calling.
//!
//! Tools are described by a [`tools::Signature`] and a docstring; the
//! [`tools::ToolRegistry`] turns those into JSON schemas for the model and
//! dispatches the model's tool calls back to them. [`workflows::run_turn`]
//! drives the request/tool-result loop for one user turn.

pub mod commands;
pub mod conversation;
pub mod db;
pub mod llm;
pub mod models;
pub mod render;
pub mod settings;
pub mod tools;
pub mod workflows;
