//! # rtxlink - Yamaha RTX router session engine
//!
//! `rtxlink` drives the interactive command line of Yamaha RTX routers over SSH
//! and turns it into a structured, retryable request/response API. It also
//! parses the router's full configuration dump into typed records and caches
//! the parsed snapshot between writes.
//!
//! ## Features
//!
//! - **Serialized Sessions**: One command in flight per router, concurrent callers queue
//! - **Prompt Detection**: User, administrator, login and pagination prompts with any hostname
//! - **On-demand Privilege**: Enters administrator mode the first time a command needs it
//! - **Classified Errors**: Transient failures are retried with backoff, rejections are not
//! - **Snapshot Parsing**: Sectioned `show config` parser with per-feature extractors
//! - **Write-invalidated Cache**: One SFTP fetch serves every read until the next write
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtxlink::client::Client;
//! use rtxlink::config::ClientConfig;
//! use rtxlink::session::Command;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = ClientConfig::new("192.168.100.1", "admin", "password")
//!         .with_admin_password("admin-password");
//!     config.sftp_enabled = true;
//!
//!     let client = Client::new(config)?;
//!     client.dial().await?;
//!
//!     let status = client.run(&Command::new("lan1", "show status lan1")).await?;
//!     println!("{status}");
//!
//!     match client.get_static_route("10.0.0.0", "255.0.0.0").await {
//!         Ok(route) => println!("{} gateway(s)", route.next_hops.len()),
//!         Err(e) if e.is_not_found() => println!("no such route"),
//!         Err(e) => return Err(e.into()),
//!     }
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`client::Client`] - Facade: dial, run, cached reads, per-feature CRUD
//! - [`session::CommandRunner`] - Session state machine, retry and resync
//! - [`device::PromptDetector`] - RTX prompt and error banner recognition
//! - [`snapshot::ParsedConfig`] - Configuration snapshot parser
//! - [`error::RtxError`] - Classified error type

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod retry;
pub mod session;
pub mod snapshot;

pub use client::Client;
pub use config::ClientConfig;
pub use error::{ErrorClass, RtxError};
