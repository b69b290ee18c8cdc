use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::api::error::Error;

/// Default location of the persisted session blob.
pub const SESSION_FILE: &str = "noe_smartmeter_session.json";

const SESSION_FORMAT_VERSION: u32 = 1;

/// Authenticated-access token granted by the provider: the cookie set
/// returned by the login endpoint, replayed on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    version: u32,
    cookies: BTreeMap<String, String>,
}

impl SessionHandle {
    pub fn from_cookies<I>(cookies: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        SessionHandle {
            version: SESSION_FORMAT_VERSION,
            cookies: cookies.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Value for the `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Durable store for the session handle, keyed by a fixed file name.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        SessionStore { path: path.into() }
    }

    /// Overwrites any previously saved handle.
    pub fn save(&self, handle: &SessionHandle) -> Result<(), Error> {
        let data = serde_json::to_vec(handle).map_err(|e| Error::StoreError(e.to_string()))?;
        fs::write(&self.path, data).map_err(|e| Error::StoreError(e.to_string()))
    }

    /// A missing, unreadable or incompatible blob reads back as absent,
    /// never as an error.
    pub fn load(&self) -> Option<SessionHandle> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    log::warn!("unable to read session file {}: {}", self.path.display(), e);
                }
                return None;
            }
        };

        let handle: SessionHandle = match serde_json::from_slice(&data) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!(
                    "discarding unreadable session file {}: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        if handle.version != SESSION_FORMAT_VERSION {
            log::warn!(
                "discarding session with unsupported format version {}",
                handle.version
            );
            return None;
        }

        Some(handle)
    }

    /// No-op if nothing is stored.
    pub fn clear(&self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("stored session deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StoreError(e.to_string())),
        }
    }
}
