//! Observability setup for the telemed backend.

pub mod tracing_setup;
