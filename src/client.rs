use std::panic::{AssertUnwindSafe, RefUnwindSafe};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, CONTENT_DISPOSITION, CONTENT_TYPE};
use percent_encoding::percent_decode_str;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_derive::Deserialize;
use thiserror::Error;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

use crate::models::{Absentee, Booking, BookingChanges, Event, EventForm};
use crate::session::Session;

/// File name used when the payment file response does not name itself.
pub const DEFAULT_PAYMENT_FILE_NAME: &str = "payment_confirmation";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("backend rejected the session")]
    Unauthorized,
    #[error("backend answered {status}: {detail}")]
    Status { status: StatusCode, detail: String },
    #[error("could not reach the backend")]
    Transport(#[source] reqwest::Error),
    #[error("unexpected response from the backend")]
    Decode(#[source] reqwest::Error),
    #[error("invalid backend URL")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Download {
    pub file_name: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[async_trait]
pub trait Backend: Send + Sync + RefUnwindSafe {
    async fn login(&self, username: &str, password: &str) -> Result<String, ApiError>;

    async fn list_events(&self, session: &Session) -> Result<Vec<Event>, ApiError>;
    async fn create_event(&self, session: &Session, event: &EventForm) -> Result<Event, ApiError>;
    async fn get_event(&self, session: &Session, guid: Uuid) -> Result<Event, ApiError>;
    async fn update_event(
        &self,
        session: &Session,
        guid: Uuid,
        event: &EventForm,
    ) -> Result<(), ApiError>;
    async fn delete_event(&self, session: &Session, guid: Uuid) -> Result<(), ApiError>;

    async fn list_bookings(
        &self,
        session: &Session,
        event_guid: Option<Uuid>,
    ) -> Result<Vec<Booking>, ApiError>;
    async fn get_booking(&self, session: &Session, guid: Uuid) -> Result<Booking, ApiError>;
    async fn update_booking(
        &self,
        session: &Session,
        guid: Uuid,
        changes: &BookingChanges,
    ) -> Result<(), ApiError>;
    async fn verify_booking(&self, session: &Session, guid: Uuid) -> Result<(), ApiError>;
    async fn list_absentees(
        &self,
        session: &Session,
        event_guid: Uuid,
    ) -> Result<Vec<Absentee>, ApiError>;

    async fn export_bookings(&self, session: &Session, event_guid: Uuid)
        -> Result<Download, ApiError>;
    async fn payment_file(&self, session: &Session, guid: Uuid) -> Result<Download, ApiError>;
    async fn download_payment(&self, session: &Session, guid: Uuid) -> Result<Download, ApiError>;
}

pub struct RestBackend {
    // gotham's state middleware needs RefUnwindSafe, which reqwest::Client is not.
    http: AssertUnwindSafe<reqwest::Client>,
    base: Url,
}

impl RestBackend {
    pub fn new(mut base: Url, timeout: Duration) -> Result<Self, ApiError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Transport)?;
        Ok(RestBackend {
            http: AssertUnwindSafe(http),
            base,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        session: &Session,
    ) -> Result<RequestBuilder, ApiError> {
        let request = self.http.request(method, self.base.join(path)?);
        Ok(match session.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        })
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, ApiError> {
        let response = request.send().await.map_err(|err| {
            error!(operation, error = %err, "backend request failed");
            ApiError::Transport(err)
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(operation, "backend rejected the session");
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            let detail = error_detail(response.text().await.unwrap_or_default());
            error!(operation, %status, %detail, "backend returned an error");
            return Err(ApiError::Status { status, detail });
        }
        debug!(operation, %status, "backend request succeeded");
        Ok(response)
    }

    async fn fetch_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        self.send(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| {
                error!(operation, error = %err, "could not decode backend response");
                ApiError::Decode(err)
            })
    }

    async fn fetch_file(
        &self,
        operation: &'static str,
        request: RequestBuilder,
        fixed_name: Option<String>,
    ) -> Result<Download, ApiError> {
        let response = self.send(operation, request).await?;
        let (content_type, file_name) = {
            let header = |name: HeaderName| {
                response
                    .headers()
                    .get(name)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned)
            };
            let file_name = fixed_name.unwrap_or_else(|| {
                header(CONTENT_DISPOSITION)
                    .and_then(|value| disposition_file_name(&value))
                    .unwrap_or_else(|| DEFAULT_PAYMENT_FILE_NAME.to_owned())
            });
            (header(CONTENT_TYPE), file_name)
        };
        let body = response.bytes().await.map_err(|err| {
            error!(operation, error = %err, "could not read backend file");
            ApiError::Decode(err)
        })?;
        Ok(Download {
            file_name,
            content_type,
            body,
        })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[async_trait]
impl Backend for RestBackend {
    async fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let request = self
            .request(Method::POST, "token", &Session::anonymous())?
            .form(&[("username", username), ("password", password)]);
        let token: TokenResponse = self.fetch_json("login", request).await?;
        Ok(token.access_token)
    }

    async fn list_events(&self, session: &Session) -> Result<Vec<Event>, ApiError> {
        let request = self.request(Method::GET, "events", session)?;
        self.fetch_json("list_events", request).await
    }

    async fn create_event(&self, session: &Session, event: &EventForm) -> Result<Event, ApiError> {
        let request = self.request(Method::POST, "events", session)?.json(event);
        self.fetch_json("create_event", request).await
    }

    async fn get_event(&self, session: &Session, guid: Uuid) -> Result<Event, ApiError> {
        let request = self.request(Method::GET, &format!("events/{}", guid), session)?;
        self.fetch_json("get_event", request).await
    }

    async fn update_event(
        &self,
        session: &Session,
        guid: Uuid,
        event: &EventForm,
    ) -> Result<(), ApiError> {
        let request = self
            .request(Method::PATCH, &format!("events/{}", guid), session)?
            .json(event);
        self.send("update_event", request).await.map(|_| ())
    }

    async fn delete_event(&self, session: &Session, guid: Uuid) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, &format!("events/{}", guid), session)?;
        self.send("delete_event", request).await.map(|_| ())
    }

    async fn list_bookings(
        &self,
        session: &Session,
        event_guid: Option<Uuid>,
    ) -> Result<Vec<Booking>, ApiError> {
        let mut request = self.request(Method::GET, "bookings/", session)?;
        if let Some(event_guid) = event_guid {
            request = request.query(&[("event_guid", event_guid.to_string())]);
        }
        self.fetch_json("list_bookings", request).await
    }

    async fn get_booking(&self, session: &Session, guid: Uuid) -> Result<Booking, ApiError> {
        let request = self.request(Method::GET, &format!("bookings/{}", guid), session)?;
        self.fetch_json("get_booking", request).await
    }

    async fn update_booking(
        &self,
        session: &Session,
        guid: Uuid,
        changes: &BookingChanges,
    ) -> Result<(), ApiError> {
        let request = self
            .request(Method::PATCH, &format!("bookings/{}", guid), session)?
            .json(changes);
        self.send("update_booking", request).await.map(|_| ())
    }

    async fn verify_booking(&self, session: &Session, guid: Uuid) -> Result<(), ApiError> {
        let request = self.request(Method::POST, &format!("bookings/{}/verify", guid), session)?;
        self.send("verify_booking", request).await.map(|_| ())
    }

    async fn list_absentees(
        &self,
        session: &Session,
        event_guid: Uuid,
    ) -> Result<Vec<Absentee>, ApiError> {
        let request =
            self.request(Method::GET, &format!("events/{}/absentees", event_guid), session)?;
        self.fetch_json("list_absentees", request).await
    }

    async fn export_bookings(
        &self,
        session: &Session,
        event_guid: Uuid,
    ) -> Result<Download, ApiError> {
        let request =
            self.request(Method::GET, &format!("events/{}/export", event_guid), session)?;
        let name = format!("bookings_{}.csv", event_guid);
        self.fetch_file("export_bookings", request, Some(name)).await
    }

    async fn payment_file(&self, session: &Session, guid: Uuid) -> Result<Download, ApiError> {
        let request =
            self.request(Method::GET, &format!("bookings/{}/payment-file", guid), session)?;
        self.fetch_file("payment_file", request, None).await
    }

    async fn download_payment(&self, session: &Session, guid: Uuid) -> Result<Download, ApiError> {
        let request =
            self.request(Method::GET, &format!("bookings/{}/download", guid), session)?;
        let name = format!("payment_{}.pdf", guid);
        self.fetch_file("download_payment", request, Some(name)).await
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

fn error_detail(body: String) -> String {
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => body,
    }
}

/// An RFC 5987 `filename*=` parameter wins over a plain `filename=`.
pub fn disposition_file_name(header: &str) -> Option<String> {
    const EXTENDED: &str = "filename*=";
    const PLAIN: &str = "filename=";
    const UTF8_PREFIX: &str = "utf-8''";

    let lower = header.to_ascii_lowercase();
    if let Some(start) = lower.find(EXTENDED) {
        let value = parameter_value(&header[start + EXTENDED.len()..]);
        let value = match value.get(..UTF8_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(UTF8_PREFIX) => &value[UTF8_PREFIX.len()..],
            _ => value,
        };
        let decoded = percent_decode_str(value).decode_utf8_lossy();
        if !decoded.is_empty() {
            return Some(decoded.into_owned());
        }
    }
    if let Some(start) = lower.find(PLAIN) {
        let value = parameter_value(&header[start + PLAIN.len()..]).trim_matches('"');
        if !value.is_empty() {
            return Some(value.to_owned());
        }
    }
    None
}

fn parameter_value(rest: &str) -> &str {
    rest.split(';').next().unwrap_or("").trim()
}
