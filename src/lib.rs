#![deny(missing_docs)]

//! Core library for the rulebook ingestion server and upload client.

/// HTTP routing and REST handlers.
pub mod api;
/// Raw document and thumbnail storage.
pub mod assets;
/// Environment-driven configuration management.
pub mod config;
/// Page extraction through a multimodal model.
pub mod extraction;
pub(crate) mod http;
/// Hosted retrieval index, document store, and answering service.
pub mod index;
/// Server-side ingestion operations.
pub mod ingest;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Client-side upload state machine.
pub mod orchestrator;
/// Splitting a PDF into single-page documents.
pub mod pdf;
/// Bounded-parallel execution with retry.
pub mod runner;
/// Rulebook status and page document rows.
pub mod store;
