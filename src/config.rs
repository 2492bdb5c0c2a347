use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::{
    error::{Error, Result},
    weather::DEFAULT_BASE_URL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout
    Stdio,
    /// Streamable HTTP with session headers and SSE
    Http,
}

/// Runtime settings for the weather MCP server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "MCP server exposing a current-weather tool", long_about = None)]
pub struct Config {
    /// Transport to serve on
    #[arg(long, value_enum, env = "WEATHER_MCP_TRANSPORT", default_value = "stdio")]
    pub transport: Transport,

    /// Address the HTTP transport binds to
    #[arg(long, env = "WEATHER_MCP_BIND", default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// Base URL of the Open-Meteo API
    #[arg(long, env = "WEATHER_MCP_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub weather_base_url: String,

    /// Timeout for each weather request, in seconds
    #[arg(long, env = "WEATHER_MCP_TIMEOUT", default_value_t = 5)]
    pub request_timeout_secs: u64,

    /// Period of the tool-list-changed broadcast, in milliseconds
    #[arg(long, env = "WEATHER_MCP_TOOL_CHANGE_MS", default_value_t = 10_000)]
    pub tool_change_interval_ms: u64,

    /// Delay between session stream messages, in milliseconds
    #[arg(long, env = "WEATHER_MCP_STREAM_TICK_MS", default_value_t = 1_000)]
    pub stream_tick_ms: u64,

    /// Close HTTP sessions idle for this long, in seconds
    #[arg(long, env = "WEATHER_MCP_SESSION_IDLE_SECS", default_value_t = 300)]
    pub session_idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            bind: "127.0.0.1:3000".to_string(),
            weather_base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 5,
            tool_change_interval_ms: 10_000,
            stream_tick_ms: 1_000,
            session_idle_timeout_secs: 300,
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn tool_change_interval(&self) -> Duration {
        Duration::from_millis(self.tool_change_interval_ms)
    }

    pub fn stream_tick(&self) -> Duration {
        Duration::from_millis(self.stream_tick_ms)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.weather_base_url).map_err(|e| {
            Error::Config(format!(
                "invalid weather base URL {:?}: {e}",
                self.weather_base_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "weather base URL must be http or https, got {}",
                url.scheme()
            )));
        }
        for (name, value) in [
            ("request timeout", self.request_timeout_secs),
            ("tool change interval", self.tool_change_interval_ms),
            ("stream tick", self.stream_tick_ms),
            ("session idle timeout", self.session_idle_timeout_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_parser() {
        let parsed = Config::try_parse_from(["weather-mcp"]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.transport, default.transport);
        assert_eq!(parsed.bind, default.bind);
        assert_eq!(parsed.weather_base_url, default.weather_base_url);
        assert_eq!(parsed.request_timeout(), Duration::from_secs(5));
        assert_eq!(parsed.tool_change_interval(), Duration::from_secs(10));
        assert_eq!(parsed.stream_tick(), Duration::from_secs(1));
        assert_eq!(parsed.session_idle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::try_parse_from([
            "weather-mcp",
            "--transport",
            "http",
            "--bind",
            "0.0.0.0:8080",
            "--stream-tick-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(config.transport, Transport::Http);
        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.stream_tick(), Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            weather_base_url: "not a url".into(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config {
            weather_base_url: "ftp://example.com".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            tool_change_interval_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            session_idle_timeout_secs: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
