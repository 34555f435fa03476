//! In-process real-time plumbing: connection registry and broadcast engine.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `registry` | user→connections and consultation→connections indices |
//! | `broadcast` | event fan-out with failure isolation and registry cleanup |

pub mod broadcast;
pub mod registry;
