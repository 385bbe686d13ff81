//! Browser session identification.
//!
//! A session is an opaque UUID carried in a cookie (name from `sessions.cookie_name`) or, for
//! scripted clients, the `x-storyloom-session` header. Requests without a usable id get a fresh
//! one, which handlers hand back through [`SessionCookie`].

use axum::{
    extract::FromRequestParts,
    http::{HeaderValue, header, request::Parts},
    response::{IntoResponseParts, ResponseParts},
};
use std::convert::Infallible;
use tracing::trace;
use uuid::Uuid;

use crate::{AppState, config::SessionsConfig, interactions::SessionId};

pub const SESSION_HEADER: &str = "x-storyloom-session";

#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub id: SessionId,
    /// The client did not present a valid id; it must be told about this one
    pub is_new: bool,
}

fn parse_id(value: &str) -> Option<SessionId> {
    Uuid::parse_str(value.trim()).ok().map(SessionId)
}

fn from_header(parts: &Parts) -> Option<SessionId> {
    parts.headers.get(SESSION_HEADER)?.to_str().ok().and_then(parse_id)
}

fn from_cookie(parts: &Parts, cookie_name: &str) -> Option<SessionId> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .and_then(|(_, value)| parse_id(value))
}

impl FromRequestParts<AppState> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let parts: &Parts = parts;
        if let Some(id) = from_header(parts).or_else(|| from_cookie(parts, &state.config.sessions.cookie_name)) {
            return Ok(Session { id, is_new: false });
        }

        let id = SessionId::new();
        trace!(session = %id, "Issuing new session");
        Ok(Session { id, is_new: true })
    }
}

/// Sets the session cookie on the response when the session is new.
pub struct SessionCookie(Option<HeaderValue>);

impl SessionCookie {
    pub fn new(session: &Session, config: &SessionsConfig) -> Self {
        if !session.is_new {
            return Self(None);
        }

        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            config.cookie_name,
            session.id,
            config.idle_timeout.as_secs()
        );
        Self(HeaderValue::from_str(&cookie).ok())
    }
}

impl IntoResponseParts for SessionCookie {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        if let Some(cookie) = self.0 {
            res.headers_mut().append(header::SET_COOKIE, cookie);
        }
        Ok(res)
    }
}
