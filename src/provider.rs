use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};

use crate::config::ProviderSettings;
use crate::errors::CoreError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider refused the request. Retrying will not help.
    #[error("provider rejected the request: {0}")]
    Rejected(String),

    /// Timeout, transport failure or 5xx. The scheduler retries these.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl From<ProviderError> for CoreError {
    fn from(error: ProviderError) -> Self {
        CoreError::ProviderUnavailable(error.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        ProviderError::Unavailable(error.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaceOrder {
    pub reference: String,
    pub site: String,
    pub item_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStatus {
    Processing,
    Ready { download_url: String, file_name: Option<String> },
    Failed { message: String },
}

impl ProviderStatus {
    /// Interprets a status report, whether pushed by webhook or pulled by polling.
    ///
    /// An error message wins over any status. A ready report without a link
    /// cannot complete the order and is treated as still processing.
    pub fn from_report(
        status: &str,
        download_link: Option<String>,
        file_name: Option<String>,
        error_message: Option<String>,
    ) -> Result<Self, CoreError> {
        let error_message = error_message.filter(|m| !m.trim().is_empty());
        let download_link = download_link.filter(|l| !l.trim().is_empty());

        match (status.to_ascii_lowercase().as_str(), error_message) {
            (_, Some(message)) => Ok(ProviderStatus::Failed { message }),
            ("failed" | "error", None) => Ok(ProviderStatus::Failed {
                message: "provider reported failure".to_string(),
            }),
            ("ready" | "completed", None) => match download_link {
                Some(download_url) => Ok(ProviderStatus::Ready { download_url, file_name }),
                None => {
                    warn!(status, "ready report without download link");
                    Ok(ProviderStatus::Processing)
                }
            },
            ("processing" | "pending" | "queued", None) => Ok(ProviderStatus::Processing),
            _ => Err(CoreError::BadRequest("status".to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadLink {
    pub download_url: String,
    pub file_name: Option<String>,
}

/// Observable contract of the external fulfillment provider.
#[async_trait]
pub trait FulfillmentProvider: Send + Sync {
    /// Places the order and returns the provider's task id.
    async fn place_order(&self, request: &PlaceOrder) -> Result<String, ProviderError>;

    async fn check_status(&self, task_id: &str) -> Result<ProviderStatus, ProviderError>;

    async fn download_link(&self, task_id: &str) -> Result<DownloadLink, ProviderError>;
}

#[derive(Deserialize)]
struct PlaceOrderResponse {
    task_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    download_link: Option<String>,
    file_name: Option<String>,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct DownloadLinkResponse {
    download_link: String,
    file_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(Into::into);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::REQUEST_TIMEOUT {
            Err(ProviderError::Rejected(format!("{status}: {body}")))
        } else {
            Err(ProviderError::Unavailable(format!("{status}: {body}")))
        }
    }
}

#[async_trait]
impl FulfillmentProvider for HttpProvider {
    #[instrument(skip(self), fields(reference = request.reference.as_str()))]
    async fn place_order(&self, request: &PlaceOrder) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;
        let placed = Self::read_json::<PlaceOrderResponse>(response).await?;
        if placed.task_id.is_empty() {
            return Err(ProviderError::Unavailable("empty task id".to_string()));
        }
        Ok(placed.task_id)
    }

    #[instrument(skip(self))]
    async fn check_status(&self, task_id: &str) -> Result<ProviderStatus, ProviderError> {
        let response = self
            .client
            .get(format!("{}/orders/{}", self.base_url, task_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let report = Self::read_json::<StatusResponse>(response).await?;
        ProviderStatus::from_report(&report.status, report.download_link, report.file_name, report.error_message)
            .map_err(|_| ProviderError::Unavailable(format!("unrecognised status {}", report.status)))
    }

    #[instrument(skip(self))]
    async fn download_link(&self, task_id: &str) -> Result<DownloadLink, ProviderError> {
        let response = self
            .client
            .post(format!("{}/orders/{}/download-link", self.base_url, task_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        let link = Self::read_json::<DownloadLinkResponse>(response).await?;
        Ok(DownloadLink {
            download_url: link.download_link,
            file_name: link.file_name,
        })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-process provider that answers from pre-loaded scripts.
    #[derive(Default)]
    pub struct ScriptedProvider {
        pub placements: Mutex<VecDeque<Result<String, ProviderError>>>,
        pub statuses: Mutex<VecDeque<Result<ProviderStatus, ProviderError>>>,
        pub links: Mutex<VecDeque<Result<DownloadLink, ProviderError>>>,
        pub placed: Mutex<Vec<PlaceOrder>>,
    }

    impl ScriptedProvider {
        pub fn accepting(task_id: &str) -> Self {
            let provider = Self::default();
            provider.placements.lock().unwrap().push_back(Ok(task_id.to_string()));
            provider
        }

        pub fn failing(error: ProviderError) -> Self {
            let provider = Self::default();
            provider.placements.lock().unwrap().push_back(Err(error));
            provider
        }
    }

    fn unscripted<T>() -> Result<T, ProviderError> {
        Err(ProviderError::Unavailable("no scripted answer".to_string()))
    }

    #[async_trait]
    impl FulfillmentProvider for ScriptedProvider {
        async fn place_order(&self, request: &PlaceOrder) -> Result<String, ProviderError> {
            self.placed.lock().unwrap().push(request.clone());
            self.placements.lock().unwrap().pop_front().unwrap_or_else(unscripted)
        }

        async fn check_status(&self, _task_id: &str) -> Result<ProviderStatus, ProviderError> {
            self.statuses.lock().unwrap().pop_front().unwrap_or_else(unscripted)
        }

        async fn download_link(&self, _task_id: &str) -> Result<DownloadLink, ProviderError> {
            self.links.lock().unwrap().pop_front().unwrap_or_else(unscripted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use std::time::Duration;

    #[test]
    fn test_report_classification() {
        let ready = ProviderStatus::from_report("ready", Some("https://cdn/x".into()), Some("x.jpg".into()), None);
        assert_eq!(
            ready.unwrap(),
            ProviderStatus::Ready {
                download_url: "https://cdn/x".into(),
                file_name: Some("x.jpg".into())
            }
        );
        let completed = ProviderStatus::from_report("completed", Some("https://cdn/x".into()), None, None);
        assert!(matches!(completed.unwrap(), ProviderStatus::Ready { .. }));

        let failed = ProviderStatus::from_report("processing", None, None, Some("quota".into()));
        assert_eq!(failed.unwrap(), ProviderStatus::Failed { message: "quota".into() });
        assert!(matches!(
            ProviderStatus::from_report("failed", None, None, Some("  ".into())).unwrap(),
            ProviderStatus::Failed { .. }
        ));

        assert_eq!(ProviderStatus::from_report("ready", None, None, None).unwrap(), ProviderStatus::Processing);
        assert_eq!(ProviderStatus::from_report("processing", None, None, None).unwrap(), ProviderStatus::Processing);
        assert!(ProviderStatus::from_report("exploded", None, None, None).is_err());
    }

    async fn start_stub() -> (HttpProvider, actix_web::dev::ServerHandle) {
        let server = HttpServer::new(|| {
            App::new()
                .route(
                    "/orders",
                    web::post().to(|body: web::Json<serde_json::Value>| async move {
                        match body["site"].as_str() {
                            Some("bad") => HttpResponse::UnprocessableEntity().body("unsupported site"),
                            Some("down") => HttpResponse::BadGateway().finish(),
                            _ => HttpResponse::Ok().json(serde_json::json!({ "task_id": "T-100" })),
                        }
                    }),
                )
                .route(
                    "/orders/{task_id}",
                    web::get().to(|| async {
                        HttpResponse::Ok().json(serde_json::json!({
                            "status": "ready",
                            "download_link": "https://cdn.test/T-100",
                            "file_name": "asset.jpg"
                        }))
                    }),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        let provider = HttpProvider::new(&ProviderSettings {
            base_url: format!("http://{addr}/"),
            api_key: "key".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        (provider, handle)
    }

    fn request(site: &str) -> PlaceOrder {
        PlaceOrder {
            reference: "42".to_string(),
            site: site.to_string(),
            item_id: "item".to_string(),
            url: "https://stock.test/item".to_string(),
        }
    }

    #[actix_web::test]
    async fn test_http_provider_outcomes() {
        let (provider, handle) = start_stub().await;

        assert_eq!(provider.place_order(&request("ok")).await.unwrap(), "T-100");
        assert!(matches!(
            provider.place_order(&request("bad")).await,
            Err(ProviderError::Rejected(_))
        ));
        assert!(matches!(
            provider.place_order(&request("down")).await,
            Err(ProviderError::Unavailable(_))
        ));
        assert!(matches!(
            provider.check_status("T-100").await.unwrap(),
            ProviderStatus::Ready { .. }
        ));
        // no route registered for download links
        assert!(matches!(
            provider.download_link("T-100").await,
            Err(ProviderError::Rejected(_))
        ));

        handle.stop(false).await;
    }
}
