//! IAP proxy response models.

use serde::{Deserialize, Serialize};

/// Readiness probe response.
///
/// Returned by `/_readiness`. The key cache state is informational: a cold
/// cache is filled on the first verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    /// Service readiness status ("ready").
    pub status: String,

    /// Whether a usable key set is cached ("warm" or "cold").
    pub key_cache: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_response_serialization() {
        let ready = ReadinessResponse {
            status: "ready".to_string(),
            key_cache: "cold".to_string(),
        };

        let json = serde_json::to_string(&ready).unwrap();
        assert_eq!(json, r#"{"status":"ready","key_cache":"cold"}"#);
    }
}
