use std::fmt;

#[derive(Debug, Clone)]
pub enum Error {
    /// Credentials rejected by the login endpoint, or a login response
    /// without a usable cookie set.
    LoginError(String),
    /// Login failed with a status other than 200/401, or never reached the
    /// provider at all.
    ConnectionError(String),
    /// Mid-session request failed: transport error, non-200 status, or a 401
    /// that survived the single re-authentication retry.
    ApiError(String),
    InvalidResponse(String, String),
    UnexpectedApiResponse,
    StoreError(String),
    InternalError,
}

impl Error {
    /// Authentication failures must surface to the caller even on the
    /// code paths that otherwise swallow errors into empty series.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, Error::LoginError(_) | Error::ConnectionError(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LoginError(s) => write!(f, "login failed: {}", s),
            Error::ConnectionError(s) => write!(f, "connection error: {}", s),
            Error::ApiError(s) => write!(f, "API error: {}", s),
            Error::InvalidResponse(e, context) => {
                write!(f, "invalid API response: {} ({})", e, context)
            }
            Error::UnexpectedApiResponse => write!(f, "unexpected API response"),
            Error::StoreError(s) => write!(f, "session store error: {}", s),
            Error::InternalError => write!(f, "internal error"),
        }
    }
}

impl std::error::Error for Error {}
