use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

use crate::tools::{Tool, ToolArgs, ToolContent, ToolContext, ToolError, ToolOutput};

const DEFAULT_BASE_URL: &str = "https://weather.tsukumijima.net";

static CITY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<city\s([^>]*)>").expect("valid city tag regex"));
static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([\w:-]+)="([^"]*)""#).expect("valid attribute regex"));

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchWeatherArgs {
    /// City name as listed in the forecast area index
    pub city: String,
}

impl ToolArgs for FetchWeatherArgs {
    fn validate(&self) -> Result<(), String> {
        if self.city.trim().is_empty() {
            return Err("city must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Forecast {
    title: String,
    description: ForecastDescription,
}

#[derive(Debug, Deserialize)]
struct ForecastDescription {
    #[serde(rename = "bodyText")]
    body_text: String,
}

/// Look up the area id of `city` in the `primary_area.xml` index
pub fn find_city_id(index: &str, city: &str) -> Option<String> {
    CITY_TAG.captures_iter(index).find_map(|tag| {
        let mut title = None;
        let mut id = None;
        for attr in ATTRIBUTE.captures_iter(&tag[1]) {
            match &attr[1] {
                "title" => title = Some(attr[2].to_string()),
                "id" => id = Some(attr[2].to_string()),
                _ => {}
            }
        }
        match (title, id) {
            (Some(title), Some(id)) if title == city => Some(id),
            _ => None,
        }
    })
}

pub struct FetchWeather {
    client: reqwest::Client,
    base_url: String,
}

impl FetchWeather {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base URL from `STATEMUX_WEATHER_BASE_URL`, falling back to the public API
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("STATEMUX_WEATHER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        )
    }

    async fn area_index(&self) -> Result<String, reqwest::Error> {
        self.client
            .get(format!("{}/primary_area.xml", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    async fn forecast(&self, id: &str) -> Result<Forecast, reqwest::Error> {
        self.client
            .get(format!("{}/api/forecast/city/{}", self.base_url, id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl Tool for FetchWeather {
    type Args = FetchWeatherArgs;

    fn name(&self) -> &'static str {
        "fetch_weather"
    }

    fn description(&self) -> &'static str {
        "Fetch the weather forecast for a city"
    }

    async fn execute(&self, args: FetchWeatherArgs, ctx: ToolContext) -> Result<ToolOutput, ToolError> {
        let city = args.city.trim();
        let index = self.area_index().await.map_err(ToolError::execution)?;

        let Some(id) = find_city_id(&index, city) else {
            return Ok(ToolOutput::Single(ToolContent::text(format!(
                "City \"{}\" was not found.",
                city
            ))));
        };

        debug!("[{}] fetching forecast for {} ({})", ctx.request_id, city, id);
        let forecast = self.forecast(&id).await.map_err(ToolError::execution)?;

        Ok(ToolOutput::Single(ToolContent::text(format!(
            "{}\n{}",
            forecast.title, forecast.description.body_text
        ))))
    }
}
