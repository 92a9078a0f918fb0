use async_trait::async_trait;
use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::config::Config;

use super::{ApiClient, Params};

/// JSON-over-HTTP backend client
#[derive(Clone)]
pub struct HttpApiClient {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
  source: String,
}

impl HttpApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let base_url = Url::parse(&config.api.url)
      .map_err(|e| eyre!("Invalid API URL '{}': {}", config.api.url, e))?;

    let client = reqwest::Client::builder()
      .timeout(config.api_timeout())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token: Config::get_api_token(),
      source: config.api.client_name.clone(),
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  /// Append `endpoint` to the base path and encode `params` as the query.
  pub fn build_url(base: &Url, endpoint: &str, params: &Params) -> Result<Url> {
    let joined = format!(
      "{}/{}",
      base.as_str().trim_end_matches('/'),
      endpoint.trim_start_matches('/')
    );
    let mut url = Url::parse(&joined).map_err(|e| eyre!("Invalid endpoint '{}': {}", endpoint, e))?;
    if !params.is_empty() {
      url.query_pairs_mut().extend_pairs(params.iter());
    }
    Ok(url)
  }

  fn request(&self, method: Method, endpoint: &str, params: &Params) -> Result<RequestBuilder> {
    let url = Self::build_url(&self.base_url, endpoint, params)?;
    let mut req = self
      .client
      .request(method, url)
      .header("X-Source", &self.source);
    if let Some(token) = &self.token {
      req = req.bearer_auth(token);
    }
    Ok(req)
  }

  async fn send(&self, req: RequestBuilder, what: &str) -> Result<reqwest::Response> {
    req
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(|e| eyre!("{} failed: {}", what, e))
  }
}

#[async_trait]
impl ApiClient for HttpApiClient {
  async fn complete_task(&self, id: &str, completed_at: Option<DateTime<Utc>>) -> Result<()> {
    let mut body = json!({ "status": "COMPLETED" });
    if let Some(at) = completed_at {
      body["completedAt"] = json!(at.to_rfc3339());
    }
    let req = self
      .request(Method::PATCH, &format!("/tasks/{}", id), &Params::new())?
      .json(&body);
    self.send(req, &format!("Complete task {}", id)).await?;
    Ok(())
  }

  async fn update_task(&self, id: &str, patch: &Value) -> Result<()> {
    let req = self
      .request(Method::PATCH, &format!("/tasks/{}", id), &Params::new())?
      .json(patch);
    self.send(req, &format!("Update task {}", id)).await?;
    Ok(())
  }

  async fn create_task(&self, data: &Value) -> Result<()> {
    let req = self.request(Method::POST, "/tasks", &Params::new())?.json(data);
    self.send(req, "Create task").await?;
    Ok(())
  }

  async fn mark_notification_read(&self, id: &str) -> Result<()> {
    let req = self.request(
      Method::POST,
      &format!("/notifications/{}/read", id),
      &Params::new(),
    )?;
    self
      .send(req, &format!("Mark notification {} read", id))
      .await?;
    Ok(())
  }

  async fn fetch(&self, endpoint: &str, params: &Params) -> Result<Value> {
    debug!(endpoint, "GET");
    let req = self.request(Method::GET, endpoint, params)?;
    let response = self.send(req, &format!("GET {}", endpoint)).await?;
    response
      .json::<Value>()
      .await
      .map_err(|e| eyre!("Failed to parse response from {}: {}", endpoint, e))
  }

  async fn ping(&self) -> Result<()> {
    let req = self.request(Method::HEAD, "/ping", &Params::new())?;
    self.send(req, "Ping").await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_build_url_keeps_base_path() {
    let base = Url::parse("https://crm.example.com/api/v1/").unwrap();
    let url = HttpApiClient::build_url(&base, "/dashboard/stats", &Params::new()).unwrap();
    assert_eq!(url.as_str(), "https://crm.example.com/api/v1/dashboard/stats");

    let base = Url::parse("https://crm.example.com/api/v1").unwrap();
    let url = HttpApiClient::build_url(&base, "tasks", &Params::new()).unwrap();
    assert_eq!(url.as_str(), "https://crm.example.com/api/v1/tasks");
  }

  #[test]
  fn test_build_url_encodes_params() {
    let base = Url::parse("http://localhost:3001/api/v1").unwrap();
    let mut params = Params::new();
    params.insert("priority".into(), "HIGH,URGENT".into());
    params.insert("limit".into(), "10".into());

    let url = HttpApiClient::build_url(&base, "/tasks", &params).unwrap();
    assert_eq!(
      url.as_str(),
      "http://localhost:3001/api/v1/tasks?limit=10&priority=HIGH%2CURGENT"
    );
  }
}
