use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ForecastItem {
    dt_txt: String,
    main: ForecastMain,
    #[serde(default)]
    weather: Vec<ForecastCondition>,
}

#[derive(Debug, Deserialize)]
struct ForecastMain {
    temp: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastCondition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    list: Vec<ForecastItem>,
    #[serde(default)]
    city: Option<ForecastCity>,
}

#[derive(Debug, Deserialize)]
struct ForecastCity {
    #[serde(default)]
    name: Option<String>,
}

/// OpenWeather 5-day/3-hour forecast API. One line per day, taking the
/// first 3-hour slot of each day as representative.
pub struct WeatherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl WeatherClient {
    pub fn new(http: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            http,
            base_url,
            api_key,
        }
    }

    pub async fn forecast(&self, location: &str, days: i64) -> Result<String> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("weather integration is not configured"));
        }
        let url = format!(
            "{}/data/2.5/forecast",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .get(url)
            .query(&[
                ("q", location),
                ("appid", self.api_key.as_str()),
                ("units", "imperial"),
            ])
            .send()
            .await
            .context("weather request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("weather request failed ({})", response.status()));
        }
        let data: ForecastResponse = response
            .json()
            .await
            .context("weather response was malformed JSON")?;

        let days = days.max(1) as usize;
        if data.list.is_empty() {
            return Ok(format!("No forecast available for {location}."));
        }

        let mut lines = Vec::with_capacity(days + 1);
        let city = data
            .city
            .and_then(|city| city.name)
            .unwrap_or_else(|| location.to_string());
        lines.push(format!("Forecast for {city}:"));
        for item in data.list.iter().step_by(8).take(days) {
            let description = item
                .weather
                .first()
                .map(|condition| condition.description.as_str())
                .unwrap_or("conditions unavailable");
            let day = item.dt_txt.split(' ').next().unwrap_or(&item.dt_txt);
            lines.push(format!(
                "{day}: {}F, {description}",
                item.main.temp.round() as i64
            ));
        }
        Ok(lines.join("\n"))
    }
}
