//! Lead Tracker API Library
//!
//! Ingests WhatsApp click/message and RD Station webhooks into canonical
//! leads, and serves the authenticated dashboard that reads them back.
//!
//! # Modules
//!
//! - `auth_client`: Hosted auth service client (GoTrue-compatible).
//! - `auth_handler`: Login, refresh, logout and session endpoints.
//! - `auth_store`: Session cache, init-once guard and the `AuthUser` extractor.
//! - `config`: Configuration management.
//! - `contact`: Phone and email normalization.
//! - `dashboard`: Period windows and dashboard aggregations.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Ingestion RPCs and dashboard queries.
//! - `errors`: Error handling types.
//! - `handlers`: Application state and dashboard HTTP handlers.
//! - `ingest`: Webhook payload validation and normalization.
//! - `ingest_handler`: Ingestion webhook handlers.
//! - `ingest_models`: Webhook payloads and RPC parameters.
//! - `models`: Lead and event rows.
//! - `realtime`: LISTEN/NOTIFY listener and SSE fan-out.
//! - `routes`: Router assembly and middleware.

pub mod auth_client;
pub mod auth_handler;
pub mod auth_store;
pub mod config;
pub mod contact;
pub mod dashboard;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod ingest;
pub mod ingest_handler;
pub mod ingest_models;
pub mod models;
pub mod realtime;
pub mod routes;
