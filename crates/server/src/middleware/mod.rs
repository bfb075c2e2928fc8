//! HTTP middleware stack.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. `TraceLayer` (request spans)
//! 3. Request ID
//! 4. CORS
//! 5. Security headers
//! 6. Rate limiting (write endpoints only)

pub mod cors;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;

pub use cors::cors_layer;
pub use rate_limit::write_rate_limiter;
pub use request_id::request_id_middleware;
pub use security_headers::security_headers_middleware;
