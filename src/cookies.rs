//! Cookie persistence for the Web of Science session.
//!
//! This module handles cookie persistence so an entitled (logged-in or
//! IP-licensed) portal session can be reused across runs instead of
//! re-authenticating every time.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Default cookie file path: `~/.woscite_cookies.json`
fn default_cookie_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".woscite_cookies.json"))
        .ok_or_else(|| crate::error::WosError::Config("Cannot determine home directory".to_string()))
}

/// A persisted browser cookie
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    /// Expiry as seconds since the Unix epoch; `None` for session cookies
    #[serde(default)]
    pub expires: Option<f64>,
}

impl Cookie {
    /// Whether the cookie's expiry lies before `now_epoch`
    pub fn is_expired(&self, now_epoch: f64) -> bool {
        matches!(self.expires, Some(e) if e <= now_epoch)
    }

    /// Render as a `document.cookie` assignment value, e.g.
    /// `SID=abc; path=/; domain=.webofscience.com`
    pub fn to_document_cookie(&self) -> String {
        let mut parts = vec![format!("{}={}", self.name, self.value)];
        if !self.path.is_empty() {
            parts.push(format!("path={}", self.path));
        }
        if !self.domain.is_empty() {
            parts.push(format!("domain={}", self.domain));
        }
        if self.secure {
            parts.push("secure".to_string());
        }
        parts.join("; ")
    }
}

/// Cookie manager for loading and saving cookies
pub struct CookieManager {
    path: PathBuf,
}

impl CookieManager {
    /// Create a new CookieManager with default path
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: default_cookie_path()?,
        })
    }

    /// Create a new CookieManager with custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the cookie file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load cookies from file
    ///
    /// Returns empty vec if file doesn't exist or is invalid
    pub fn load(&self) -> Vec<Cookie> {
        if !self.path.exists() {
            debug!("Cookie file not found: {:?}", self.path);
            return Vec::new();
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<Vec<Cookie>>(&content) {
                Ok(cookies) => {
                    info!("Loaded {} cookies from {:?}", cookies.len(), self.path);
                    cookies
                }
                Err(e) => {
                    warn!("Failed to parse cookies: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Failed to read cookie file: {}", e);
                Vec::new()
            }
        }
    }

    /// Load cookies, dropping any whose expiry has passed
    pub fn load_fresh(&self) -> Vec<Cookie> {
        let now = chrono::Utc::now().timestamp() as f64;
        let all = self.load();
        let total = all.len();
        let fresh: Vec<Cookie> = all.into_iter().filter(|c| !c.is_expired(now)).collect();
        if fresh.len() < total {
            debug!("Dropped {} expired cookies", total - fresh.len());
        }
        fresh
    }

    /// Save cookies to file
    pub fn save(&self, cookies: &[Cookie]) -> Result<()> {
        let content = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, content)?;
        info!("Saved {} cookies to {:?}", cookies.len(), self.path);
        Ok(())
    }

    /// Clear stored cookies
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!("Cleared cookies at {:?}", self.path);
        }
        Ok(())
    }
}

impl Default for CookieManager {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            path: PathBuf::from(".woscite_cookies.json"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sample(name: &str, expires: Option<f64>) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: "value".to_string(),
            domain: ".webofscience.com".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            expires,
        }
    }

    #[test]
    fn test_load_empty() {
        let manager = CookieManager::with_path(PathBuf::from("/nonexistent/path"));
        assert!(manager.load().is_empty());
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let temp = NamedTempFile::new()?;
        let manager = CookieManager::with_path(temp.path().to_path_buf());

        manager.save(&[sample("test", None)])?;
        let loaded = manager.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "test");
        Ok(())
    }

    #[test]
    fn test_load_fresh_drops_expired() -> Result<()> {
        let temp = NamedTempFile::new()?;
        let manager = CookieManager::with_path(temp.path().to_path_buf());

        let future = chrono::Utc::now().timestamp() as f64 + 3600.0;
        manager.save(&[
            sample("stale", Some(1.0)),
            sample("live", Some(future)),
            sample("session", None),
        ])?;

        let fresh = manager.load_fresh();
        let names: Vec<&str> = fresh.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["live", "session"]);
        Ok(())
    }

    #[test]
    fn test_to_document_cookie() {
        let cookie = sample("SID", None);
        assert_eq!(
            cookie.to_document_cookie(),
            "SID=value; path=/; domain=.webofscience.com; secure"
        );
    }
}
