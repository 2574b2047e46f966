#![doc(html_root_url = "https://docs.rs/rtsp-engine/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # rtsp-engine - RTSP client protocol engine
//!
//! `rtsp-engine` speaks the client side of RTSP/1.0: it builds requests,
//! parses responses off a TCP byte stream, matches them to requests by
//! CSeq, answers Basic/Digest challenges, negotiates RTP transport and
//! walks a media session through DESCRIBE, SETUP and PLAY.
//!
//! ## Features
//!
//! - Incremental response parsing with interleaved `$` frame extraction
//! - CSeq correlation tolerant of skipped and out-of-order responses
//! - Digest and Basic authentication, one retry per challenge
//! - One-shot redirect following (`301`/`302`)
//! - UDP, TCP-interleaved and multicast transport negotiation
//! - RTSP-over-HTTP tunneling
//! - Callback or `async` command completion
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtsp_engine::config::ClientConfig;
//! use rtsp_engine::format::rtsp::{RtspClient, SessionOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config =
//!         ClientConfig::new("rtsp://example.com/stream").with_credentials("admin", "secret");
//!     let base = config.client_port_base;
//!     let client = RtspClient::connect(config).await?;
//!
//!     let mut session = SessionOrchestrator::with_sdp(client.clone(), base);
//!     session.start().await?;
//!     println!("playing {} subsessions", session.ready_subsessions().len());
//!
//!     session.run_until_bye().await;
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `format::rtsp`: the protocol engine, the connection task and the
//!   session orchestrator
//! - `config`: programmatic and environment-based client settings
//! - `error`: the crate error type and `Result` alias

/// Client configuration
pub mod config;

/// Error types and utilities
pub mod error;

/// Streaming protocol implementations
pub mod format;

pub use error::{Result, RtspError};
