use axum::response::{IntoResponse, Redirect, Response};
use thiserror::Error;

use crate::auth::AuthError;

/// Errors that reach the dashboard; each becomes a redirect.
#[derive(Error, Debug)]
pub enum DeskError {
    #[error("Please log in")]
    Unauthorized,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub fn error_location(message: &str) -> String {
    format!("/error?message={}", urlencoding::encode(message))
}

impl IntoResponse for DeskError {
    fn into_response(self) -> Response {
        match self {
            DeskError::Unauthorized => Redirect::to("/login").into_response(),
            other => {
                log::error!("{}", other);
                Redirect::to(&error_location(&other.to_string())).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};

    #[test]
    fn unauthorized_redirects_to_login() {
        let response = DeskError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[test]
    fn other_errors_carry_message_text() {
        let response = DeskError::Other(anyhow::anyhow!("IMAP login failed")).into_response();
        assert_eq!(response.headers()[header::LOCATION], "/error?message=IMAP%20login%20failed");
    }
}
