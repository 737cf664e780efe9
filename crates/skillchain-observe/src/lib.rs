//! Observability setup for the skill chain engine: structured logging with an
//! optional OpenTelemetry trace bridge.

pub mod tracing_setup;
