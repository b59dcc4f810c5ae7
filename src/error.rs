use std::io;

use gotham::helpers::http::response::create_response;
use gotham::state::State;
use http::header::InvalidHeaderValue;
use hyper::{Body, Response, StatusCode};
use thiserror::Error;
use tracing::{info, warn};

use crate::client::ApiError;
use crate::handlers::sign_out;
use crate::templates;

#[derive(Debug, Error)]
pub enum Error {
    /// A backend call failed; `context` is what the operator sees.
    #[error("{context}")]
    Backend {
        context: &'static str,
        #[source]
        source: ApiError,
    },
    #[error("Missing field{}: {}", plural(.0), .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("Malformed form submission")]
    Form(#[from] serde_urlencoded::de::Error),
    #[error("Malformed event filter")]
    Filter(#[from] uuid::Error),
    #[error("Could not read the request")]
    RequestBody(#[from] hyper::Error),
    #[error("The server issued an unusable token")]
    Token(#[from] InvalidHeaderValue),
    #[error("Unexpected error")]
    Render(#[from] io::Error),
}

fn plural(fields: &[String]) -> &'static str {
    if fields.len() == 1 {
        ""
    } else {
        "s"
    }
}

impl Error {
    pub fn backend(context: &'static str) -> impl FnOnce(ApiError) -> Error {
        move |source| Error::Backend { context, source }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Error::Backend {
                source: ApiError::Unauthorized,
                ..
            }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        use Error::*;
        match self {
            Backend { source, .. } if source.is_not_found() => StatusCode::NOT_FOUND,
            Backend {
                source: ApiError::Unauthorized,
                ..
            } => StatusCode::UNAUTHORIZED,
            Backend { .. } | Token(..) => StatusCode::BAD_GATEWAY,
            MissingFields(..) | Form(..) | Filter(..) | RequestBody(..) => StatusCode::BAD_REQUEST,
            Render(..) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Unauthorized backend answers sign the operator out; everything else
    /// renders the error page.
    pub fn into_response(self, state: &State) -> Response<Body> {
        if self.is_unauthorized() {
            info!("session rejected by backend, signing out");
            return sign_out(state);
        }

        let status = self.status_code();
        warn!(%status, error = ?self, "request failed");
        let mut body = Vec::new();
        match templates::error_html(&mut body, &self.to_string()) {
            Ok(()) => create_response(state, status, mime::TEXT_HTML_UTF_8, body),
            Err(_) => {
                let body = format!("Error: {}", self);
                create_response(state, status, mime::TEXT_PLAIN_UTF_8, body)
            }
        }
    }
}
