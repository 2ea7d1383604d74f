//! Client-side token coordinator.
//!
//! Runs inside a consuming client process: attaches the cached access token
//! to outbound requests, detects 401s, and refreshes credentials with
//! at most one in-flight refresh exchange system-wide.

mod coordinator;

pub use coordinator::{AuthClient, ClientError, Tokens, UserProfile};
