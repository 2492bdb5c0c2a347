//! Client for the Open-Meteo forecast API.
//!
//! One GET per call, bounded by the client timeout. Failures are returned to
//! the caller as [`WeatherError`]; nothing is retried or cached.

use std::{collections::HashMap, time::Duration};

use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const USER_AGENT: &str = concat!("weather-mcp/", env!("CARGO_PKG_VERSION"));
const CURRENT_FIELDS: &str = "temperature_2m,wind_speed_10m";
const HOURLY_FIELDS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m";

#[derive(Error, Debug)]
pub enum WeatherError {
    #[error("missing required parameter: {0}")]
    MissingCoordinate(&'static str),

    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("weather service returned status {0}")]
    Status(StatusCode),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("response has no current conditions")]
    MissingCurrent,
}

/// Raw forecast body. Only the sections we ask for are modelled.
#[derive(Debug, Deserialize)]
struct ForecastResponse {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    current_units: HashMap<String, String>,
    current: Option<CurrentConditions>,
    #[serde(default)]
    hourly: HourlySeries,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentConditions {
    #[serde(default)]
    pub time: Option<String>,
    pub temperature_2m: f64,
    pub wind_speed_10m: f64,
}

/// Hourly forecast columns, index-aligned with `time`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HourlySeries {
    #[serde(default)]
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m: Vec<Option<f64>>,
}

/// Current conditions plus the hourly series for one location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeatherReport {
    pub latitude: String,
    pub longitude: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub current_temperature: f64,
    pub temperature_unit: String,
    pub current_wind_speed: f64,
    pub wind_speed_unit: String,
    pub hourly: HourlySeries,
}

impl WeatherReport {
    pub fn summary(&self) -> String {
        format!(
            "Current weather at {}, {}: temperature {}{}, wind speed {} {}",
            self.latitude,
            self.longitude,
            self.current_temperature,
            self.temperature_unit,
            self.current_wind_speed,
            self.wind_speed_unit,
        )
    }
}

#[derive(Debug, Clone)]
pub struct WeatherClient {
    http: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl WeatherClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, WeatherError> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(WeatherError::Client)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch current conditions and the hourly series for a coordinate pair.
    pub async fn fetch_current(
        &self,
        latitude: &str,
        longitude: &str,
    ) -> Result<WeatherReport, WeatherError> {
        let latitude = latitude.trim();
        let longitude = longitude.trim();
        if latitude.is_empty() {
            return Err(WeatherError::MissingCoordinate("latitude"));
        }
        if longitude.is_empty() {
            return Err(WeatherError::MissingCoordinate("longitude"));
        }

        let url = format!("{}/forecast", self.base_url);
        debug!("Fetching weather for {}, {} from {}", latitude, longitude, url);

        let response = self
            .http
            .get(&url)
            .query(&[
                ("latitude", latitude),
                ("longitude", longitude),
                ("current", CURRENT_FIELDS),
                ("hourly", HOURLY_FIELDS),
            ])
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Status(status));
        }

        let body = response.bytes().await.map_err(|e| self.request_error(e))?;
        let forecast: ForecastResponse =
            serde_json::from_slice(&body).map_err(|e| WeatherError::Decode(e.to_string()))?;

        let current = forecast.current.ok_or(WeatherError::MissingCurrent)?;
        let unit = |key: &str| {
            forecast
                .current_units
                .get(key)
                .cloned()
                .unwrap_or_default()
        };

        Ok(WeatherReport {
            latitude: forecast
                .latitude
                .map(|v| v.to_string())
                .unwrap_or_else(|| latitude.to_string()),
            longitude: forecast
                .longitude
                .map(|v| v.to_string())
                .unwrap_or_else(|| longitude.to_string()),
            time: current.time,
            current_temperature: current.temperature_2m,
            temperature_unit: unit("temperature_2m"),
            current_wind_speed: current.wind_speed_10m,
            wind_speed_unit: unit("wind_speed_10m"),
            hourly: forecast.hourly,
        })
    }

    fn request_error(&self, e: reqwest::Error) -> WeatherError {
        if e.is_timeout() {
            WeatherError::Timeout(self.timeout)
        } else {
            WeatherError::Request(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forecast_without_current_section() {
        let body = r#"{"latitude":52.5,"longitude":13.4,"hourly":{"time":[]}}"#;
        let forecast: ForecastResponse = serde_json::from_str(body).unwrap();
        assert!(forecast.current.is_none());
    }

    #[test]
    fn test_hourly_series_allows_gaps() {
        let body = r#"{"time":["2024-01-01T00:00"],"temperature_2m":[null],"relative_humidity_2m":[80],"wind_speed_10m":[3.5]}"#;
        let hourly: HourlySeries = serde_json::from_str(body).unwrap();
        assert_eq!(hourly.temperature_2m, vec![None]);
        assert_eq!(hourly.relative_humidity_2m, vec![Some(80.0)]);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = WeatherClient::new("http://localhost:9/v1/", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9/v1");
    }

    #[tokio::test]
    async fn test_missing_coordinates_fail_before_network() {
        // Port 9 (discard) is never contacted; validation fails first.
        let client = WeatherClient::new("http://127.0.0.1:9", DEFAULT_TIMEOUT).unwrap();
        assert!(matches!(
            client.fetch_current("", "").await,
            Err(WeatherError::MissingCoordinate("latitude"))
        ));
        assert!(matches!(
            client.fetch_current("52.5", "  ").await,
            Err(WeatherError::MissingCoordinate("longitude"))
        ));
    }

    #[test]
    fn test_summary() {
        let report = WeatherReport {
            latitude: "52.52".into(),
            longitude: "13.41".into(),
            time: None,
            current_temperature: 12.5,
            temperature_unit: "°C".into(),
            current_wind_speed: 7.2,
            wind_speed_unit: "km/h".into(),
            hourly: HourlySeries::default(),
        };
        assert_eq!(
            report.summary(),
            "Current weather at 52.52, 13.41: temperature 12.5°C, wind speed 7.2 km/h"
        );
    }
}
