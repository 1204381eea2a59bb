//! Weather forecast integration (Open-Meteo)
//!
//! Provides the hourly cloud-cover series and daily sunrise/sunset times the
//! PV forecast is derived from. All timestamps are local wall-clock times in
//! the installation's timezone, exactly as the API returns them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Geographic location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudCoverPoint {
    pub time: NaiveDateTime,
    pub cloud_cover_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SunTimes {
    pub date: NaiveDate,
    pub sunrise: NaiveDateTime,
    pub sunset: NaiveDateTime,
}

/// Raw forecast series as delivered by the weather service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSeries {
    pub fetched_at: DateTime<Utc>,
    pub hourly: Vec<CloudCoverPoint>,
    pub days: Vec<SunTimes>,
}

impl WeatherSeries {
    pub fn sun_times(&self, date: NaiveDate) -> Option<&SunTimes> {
        self.days.iter().find(|d| d.date == date)
    }
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch_hourly_cloud_cover_and_sun_times(
        &self,
        location: &GeoLocation,
    ) -> Result<WeatherSeries>;

    /// Short identifier reported alongside forecast results.
    fn name(&self) -> &'static str;
}

/// Open-Meteo API client
pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
    timezone: Tz,
}

impl OpenMeteoClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.open-meteo.com";

    pub fn new(base_url: impl Into<String>, timezone: Tz, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static("solar-home-controller/0.1"),
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timezone,
        })
    }

    fn parse(&self, response: OpenMeteoResponse) -> Result<WeatherSeries> {
        if response.hourly.time.len() != response.hourly.cloudcover.len() {
            anyhow::bail!(
                "hourly series length mismatch: {} times vs {} values",
                response.hourly.time.len(),
                response.hourly.cloudcover.len()
            );
        }

        let mut hourly = Vec::with_capacity(response.hourly.time.len());
        for (time, cloud) in response.hourly.time.iter().zip(response.hourly.cloudcover) {
            // Missing values are simply not forecast for that hour.
            let Some(cloud) = cloud else { continue };
            hourly.push(CloudCoverPoint {
                time: parse_local(time)?,
                cloud_cover_percent: cloud,
            });
        }

        let daily = response.daily;
        if daily.sunrise.len() != daily.time.len() || daily.sunset.len() != daily.time.len() {
            anyhow::bail!("daily series length mismatch");
        }
        let mut days = Vec::with_capacity(daily.time.len());
        for ((date, sunrise), sunset) in daily.time.iter().zip(&daily.sunrise).zip(&daily.sunset) {
            days.push(SunTimes {
                date: NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .with_context(|| format!("bad daily date {date:?}"))?,
                sunrise: parse_local(sunrise)?,
                sunset: parse_local(sunset)?,
            });
        }

        Ok(WeatherSeries {
            fetched_at: Utc::now(),
            hourly,
            days,
        })
    }
}

fn parse_local(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .with_context(|| format!("bad local timestamp {raw:?}"))
}

#[async_trait]
impl WeatherSource for OpenMeteoClient {
    async fn fetch_hourly_cloud_cover_and_sun_times(
        &self,
        location: &GeoLocation,
    ) -> Result<WeatherSeries> {
        let url = format!("{}/v1/forecast", self.base_url.trim_end_matches('/'));
        let timezone = self.timezone.name().to_string();
        debug!(%url, latitude = location.latitude, longitude = location.longitude, "fetching weather forecast");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("hourly", "cloudcover".to_string()),
                ("daily", "sunrise,sunset".to_string()),
                ("timezone", timezone),
            ])
            .send()
            .await
            .context("weather GET failed")?;
        let status = resp.status();
        let body = resp.text().await.context("weather read failed")?;
        if !status.is_success() {
            anyhow::bail!("weather API error: HTTP {status}: {body}");
        }

        let raw: OpenMeteoResponse =
            serde_json::from_str(&body).context("weather JSON parse failed")?;
        self.parse(raw)
    }

    fn name(&self) -> &'static str {
        "open-meteo"
    }
}

// Open-Meteo API response structures
#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: OpenMeteoHourly,
    daily: OpenMeteoDaily,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    cloudcover: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoDaily {
    time: Vec<String>,
    sunrise: Vec<String>,
    sunset: Vec<String>,
}
