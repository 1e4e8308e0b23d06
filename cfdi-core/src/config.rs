//! Configuration and endpoint selection.
use std::env;

/// WSDL descriptor for SAT's production lookup service.
pub const DEFAULT_WSDL_URL: &str =
    "https://consultaqr.facturaelectronica.sat.gob.mx/ConsultaCFDIService.svc?wsdl";

/// Environment variable overriding the descriptor URL.
pub const WSDL_URL_ENV: &str = "CFDI_CONSULTA_WSDL_URL";

/// Configuration for validation clients.
///
/// # Examples
/// ```rust
/// use cfdi_core::config::Config;
///
/// let config = Config::default();
/// # let _ = config;
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    wsdl_url: String,
}

impl Config {
    pub fn new(wsdl_url: impl Into<String>) -> Self {
        Self {
            wsdl_url: wsdl_url.into(),
        }
    }

    pub fn wsdl_url(&self) -> &str {
        &self.wsdl_url
    }
}

impl Default for Config {
    fn default() -> Self {
        let wsdl_url =
            env::var(WSDL_URL_ENV).unwrap_or_else(|_| DEFAULT_WSDL_URL.to_string());
        Self { wsdl_url }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    struct WsdlUrlGuard {
        _lock: MutexGuard<'static, ()>,
        previous: Option<String>,
    }

    impl WsdlUrlGuard {
        fn set(url: Option<&str>) -> Self {
            let lock = env_lock().lock().expect("env lock");
            let previous = env::var(WSDL_URL_ENV).ok();
            match url {
                Some(url) => unsafe {
                    env::set_var(WSDL_URL_ENV, url);
                },
                None => unsafe {
                    env::remove_var(WSDL_URL_ENV);
                },
            }
            Self {
                _lock: lock,
                previous,
            }
        }
    }

    impl Drop for WsdlUrlGuard {
        fn drop(&mut self) {
            match self.previous.as_ref() {
                Some(value) => unsafe {
                    env::set_var(WSDL_URL_ENV, value);
                },
                None => unsafe {
                    env::remove_var(WSDL_URL_ENV);
                },
            }
        }
    }

    #[test]
    fn custom_url_is_preserved() {
        let config = Config::new("http://localhost:8080/service?wsdl");
        assert_eq!(config.wsdl_url(), "http://localhost:8080/service?wsdl");
    }

    #[test]
    fn default_points_at_sat() {
        let _guard = WsdlUrlGuard::set(None);
        let config = Config::default();
        assert_eq!(config.wsdl_url(), DEFAULT_WSDL_URL);
    }

    #[test]
    fn default_reads_env_override() {
        let _guard = WsdlUrlGuard::set(Some("http://localhost:9090/service?wsdl"));
        let config = Config::default();
        assert_eq!(config.wsdl_url(), "http://localhost:9090/service?wsdl");
    }
}
