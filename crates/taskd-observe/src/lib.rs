//! # taskd Observe - Observability Layer
//!
//! Structured logging setup and the span helpers used around RPCs and
//! credential checks. Authentication metrics live next to the code they
//! measure, in `taskd-auth`.

pub mod logging;

pub use logging::{LogConfig, LogFormat, init_logging};

/// Generate a fresh request id
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique_uuids() {
        let a = new_request_id();
        let b = new_request_id();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(&a).is_ok());
    }
}
