//! Server configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the diagnostics server.
///
/// None of these knobs change bridge semantics; they bound queues and the
/// listen socket.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Capacity of each node's pending-request queue.
    pub request_queue_capacity: usize,
    /// Capacity of each request's response sink.
    pub response_sink_capacity: usize,
    /// Forward writes are retried up to this many attempts before the
    /// request fails with `send-failed`.
    pub write_retry_limit: u32,
    /// Ceiling on live sessions, far below the 90M-PIN space.
    pub max_live_sessions: usize,
    /// Ceiling on one buffered companion JSON object before the connection
    /// is torn down.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            request_queue_capacity: 16,
            response_sink_capacity: 64,
            write_retry_limit: 15,
            max_live_sessions: 4096,
            max_frame_bytes: 8 * 1024 * 1024, // 8 MB
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_host_and_port() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_queue_capacities() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.request_queue_capacity, 16);
        assert_eq!(cfg.response_sink_capacity, 64);
    }

    #[test]
    fn default_retry_limit_is_fifteen() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.write_retry_limit, 15);
    }

    #[test]
    fn default_frame_ceiling() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.max_frame_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.request_queue_capacity, cfg.request_queue_capacity);
        assert_eq!(back.write_retry_limit, cfg.write_retry_limit);
        assert_eq!(back.max_live_sessions, cfg.max_live_sessions);
    }

    #[test]
    fn deserialize_from_json_string() {
        let json = r#"{"host":"0.0.0.0","port":8080,"request_queue_capacity":32,"response_sink_capacity":128,"write_retry_limit":5,"max_live_sessions":10,"max_frame_bytes":1024}"#;
        let cfg: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.write_retry_limit, 5);
    }
}
