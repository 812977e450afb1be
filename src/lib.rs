//! Formulation Studio: collects cosmetic product requirements, asks Gemini
//! for a phase-structured formulation and serves the result over HTTP.

pub mod config;
pub mod gemini;
pub mod models;
pub mod prompt;
pub mod render;
pub mod routes;
pub mod schema;
pub mod service;
