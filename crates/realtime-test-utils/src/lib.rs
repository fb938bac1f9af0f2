//! # Realtime Test Utilities
//!
//! Shared test utilities for the realtime engine.
//!
//! ## Modules
//!
//! - `fixtures` - Users, servers, channels and message bodies
//! - `harness` - `TestCluster` (actor system over a mock service) and
//!   `TestSession` (a session actor with an in-memory transport)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use realtime_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let alice = TestUser::new("alice");
//!     let bob = TestUser::new("bob");
//!     let server = TestServer::new("s1", &alice)
//!         .with_members(&[&bob])
//!         .with_channel("general");
//!
//!     let cluster = TestCluster::start(&[server]).await.unwrap();
//!     let mut alice_session = cluster.connect(&alice).await.unwrap();
//!
//!     // the first frame is alice's own connect event
//!     let envelope = alice_session.recv().await.unwrap();
//! }
//! ```

pub mod fixtures;
pub mod harness;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
