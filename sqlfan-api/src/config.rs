//! Configuration for the API server
//!
//! The process takes `--port <N>` (default 9092); a parseable `PORT`
//! environment variable wins over both.
//!
//! # Example
//!
//! ```
//! use sqlfan_api::config::Config;
//!
//! let config = Config::resolve(&["--port".to_string(), "8080".to_string()], None);
//! assert_eq!(config.port, 8080);
//! ```

use serde::{Deserialize, Serialize};

/// Default listen port
pub const DEFAULT_PORT: u16 = 9092;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Port to bind to
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config { port: DEFAULT_PORT }
    }
}

impl Config {
    /// Loads configuration from process arguments and environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let args: Vec<String> = std::env::args().skip(1).collect();
        Config::resolve(&args, std::env::var("PORT").ok().as_deref())
    }

    /// Resolves the port: `PORT` env when parseable, else `--port`, else
    /// the default.
    pub fn resolve(args: &[String], env_port: Option<&str>) -> Self {
        let mut port = DEFAULT_PORT;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--port" {
                if let Some(value) = iter.next() {
                    if let Ok(parsed) = value.parse() {
                        port = parsed;
                    }
                }
            }
        }

        if let Some(env_value) = env_port {
            if let Ok(parsed) = env_value.parse() {
                port = parsed;
            }
        }

        Config { port }
    }

    /// The server bind address.
    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_port() {
        let config = Config::resolve(&[], None);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_port_flag() {
        let config = Config::resolve(&args(&["--port", "9000"]), None);
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_env_overrides_flag_when_parseable() {
        let config = Config::resolve(&args(&["--port", "9000"]), Some("7070"));
        assert_eq!(config.port, 7070);
    }

    #[test]
    fn test_unparseable_env_is_ignored() {
        let config = Config::resolve(&args(&["--port", "9000"]), Some("not a port"));
        assert_eq!(config.port, 9000);
    }

    #[test]
    fn test_unparseable_flag_is_ignored() {
        let config = Config::resolve(&args(&["--port", "lots"]), None);
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_bind_address() {
        let config = Config { port: 8081 };
        assert_eq!(config.bind_address(), "0.0.0.0:8081");
    }
}
