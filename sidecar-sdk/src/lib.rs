//! # sidecar-sdk
//!
//! Client SDK for game servers talking to their local Agones-style sidecar.
//!
//! ## Overview
//!
//! The `sidecar-sdk` library wraps the sidecar's lifecycle endpoints (Ready, Health,
//! Allocate, Reserve, Shutdown, metadata) and its server-push watch stream. The watch stream
//! is handled by a [`WatchChannel`]: a single long-lived subscription whose messages are
//! reassembled, decoded into [`GameServer`] snapshots and fanned out to every registered
//! callback, with automatic re-subscription when the connection drops.
//!
//! ## Key Features
//!
//! - Three interchangeable push transports: gRPC streaming, WebSocket, chunked HTTP
//! - Fragment reassembly with a bounded buffer
//! - Ordered, panic-isolated callback fan-out with explicit unsubscribe
//! - Periodic liveness check and reconnection
//! - Health pings, auto-connect and retried lifecycle requests
//! - Player tracking ([`Alpha`]) and counters and lists ([`Beta`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use sidecar_sdk::{Sdk, SdkConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sdk = Sdk::new(SdkConfig::from_env()?)?;
//!
//!     let _handle = sdk.watch_game_server(|gs| {
//!         println!("GameServer '{}' is {}", gs.name(), gs.state());
//!     });
//!
//!     let gs = sdk.wait_connected().await?;
//!     println!("Connected to {}", gs.name());
//!
//!     sdk.shutdown_sdk().await?;
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod config;
pub mod error;
pub mod network;
pub mod sdk;
pub mod types;
pub mod watch;

// Re-exports for convenience
pub use config::{SdkConfig, TransportKind, WatchConfig};
pub use error::{Result, SdkError};
pub use network::{Alpha, Beta, Frame, LifecycleClient, Subscription, Transport, WatchTransport};
pub use sdk::Sdk;
pub use types::{Address, Counter, GameServer, Health, List, ObjectMeta, Port, Spec, Status};
pub use watch::{SubscriberId, WatchChannel, WatchDriver, WatchHandle, WatchStats};
