/*!
 * Monitoring
 * Tracing subscriber setup for applications and tests
 */

mod tracer;

pub use tracer::{init_tracing, TRACE_JSON_ENV};
