use gotham::state::{FromState, State};
use http::header::{HeaderMap, HeaderValue, InvalidHeaderValue, COOKIE};

/// Cookie holding the operator's bearer token.
pub const TOKEN_COOKIE: &str = "authToken";

/// Credentials of the operator making the current request.
///
/// Read from the browser cookie once per request and passed explicitly to
/// every backend call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Session {
    token: Option<String>,
}

impl Session {
    pub fn anonymous() -> Self {
        Session { token: None }
    }

    #[cfg(test)]
    pub fn with_token(token: impl Into<String>) -> Self {
        Session {
            token: Some(token.into()),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let token = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == TOKEN_COOKIE)
            .map(|(_, value)| value.trim_matches('"').to_owned())
            .filter(|token| !token.is_empty());
        Session { token }
    }

    pub fn from_state(state: &State) -> Self {
        Session::from_headers(HeaderMap::borrow_from(state))
    }
}

pub fn token_cookie(token: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = if secure { "; Secure" } else { "" };
    HeaderValue::from_str(&format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax{}",
        TOKEN_COOKIE, token, secure
    ))
}

pub fn cleared_token_cookie() -> HeaderValue {
    HeaderValue::from_static("authToken=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
