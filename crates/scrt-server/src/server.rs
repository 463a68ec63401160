use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    auth::require_user,
    error::method_not_allowed,
    handlers::{create_secret, get_settings, health, retrieve_secret, save_settings, stats},
    notify::{MailjetEmail, ReceiptNotifier, TwilioSms, DEFAULT_MAILJET_TEMPLATE_ID},
    store::{crypto, Store},
    AppState,
};

pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number, E.164.
    pub from: String,
}

pub struct MailjetConfig {
    pub api_key: String,
    pub api_secret: String,
    pub template_id: u64,
    pub sender: String,
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    /// When set, the encryption key is derived from it; otherwise a random key
    /// is generated once and kept in `scrt.key`.
    pub master_key: Option<String>,
    pub cors_origins: Option<String>,
    /// Link sent in SMS receipts ($SCRT_PUBLIC_URL).
    pub public_url: String,
    pub twilio: Option<TwilioConfig>,
    pub mailjet: Option<MailjetConfig>,
    /// Timeout for each outbound receipt request.
    pub notify_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let env = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let twilio = env("SCRT_TWILIO_ACCOUNT_SID").map(|account_sid| TwilioConfig {
            account_sid,
            auth_token: env("SCRT_TWILIO_AUTH_TOKEN").unwrap_or_default(),
            from: env("SCRT_TWILIO_FROM").unwrap_or_default(),
        });
        let mailjet = env("SCRT_MAILJET_API_KEY").map(|api_key| MailjetConfig {
            api_key,
            api_secret: env("SCRT_MAILJET_API_SECRET").unwrap_or_default(),
            template_id: env("SCRT_MAILJET_TEMPLATE_ID")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAILJET_TEMPLATE_ID),
            sender: env("SCRT_MAILJET_SENDER").unwrap_or_else(|| "no-reply@scrt.link".into()),
        });

        Self {
            host: env("SCRT_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: env("SCRT_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            data_dir: env("SCRT_DATA_DIR").map(PathBuf::from),
            master_key: env("SCRT_MASTER_KEY"),
            cors_origins: env("SCRT_CORS_ORIGINS"),
            public_url: env("SCRT_PUBLIC_URL").unwrap_or_else(|| "https://scrt.link".into()),
            twilio,
            mailjet,
            notify_timeout: Duration::from_secs(
                env("SCRT_NOTIFY_TIMEOUT_SECS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }
}

/// Read a master key from a file, trimming surrounding whitespace.
/// Fails if the file cannot be read or is empty after trimming.
pub fn read_key_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read key file: {}", path.display()))?;
    let key = content.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("key file is empty: {}", path.display());
    }
    Ok(key)
}

/// Resolve the master key from `SCRT_MASTER_KEY_FILE` (preferred) or `SCRT_MASTER_KEY`.
/// Returns `None` when neither is set.
pub fn resolve_master_key() -> Result<Option<String>> {
    if let Ok(path) = std::env::var("SCRT_MASTER_KEY_FILE") {
        let key = read_key_file(Path::new(&path))?;
        if std::env::var("SCRT_MASTER_KEY").is_ok() {
            warn!("both SCRT_MASTER_KEY and SCRT_MASTER_KEY_FILE are set; using file");
        }
        return Ok(Some(key));
    }
    Ok(std::env::var("SCRT_MASTER_KEY")
        .ok()
        .filter(|k| !k.is_empty()))
}

/// Resolve and create the data directory.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

/// Build the HTTP router over `state`.
pub fn router(state: AppState, cors_origins: Option<&str>) -> Router {
    let account = Router::new()
        .route(
            "/api/me",
            get(get_settings)
                .post(save_settings)
                .fallback(method_not_allowed),
        )
        .route_layer(middleware::from_fn(require_user));

    Router::new()
        .route("/health", get(health).fallback(method_not_allowed))
        .route("/api/stats", get(stats).fallback(method_not_allowed))
        .route(
            "/api/secrets",
            post(create_secret).fallback(method_not_allowed),
        )
        .route(
            "/api/secrets/{alias}",
            delete(retrieve_secret).fallback(method_not_allowed),
        )
        .merge(account)
        .with_state(state)
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
    info!(data_dir = %data_dir.display(), "using data directory");

    let enc_key = match cfg.master_key.as_deref() {
        Some(master_key) => {
            let salt = load_or_create_salt(&data_dir)?;
            crypto::derive_key(master_key, &salt).context("derive encryption key")?
        }
        None => load_or_create_key(&data_dir)?,
    };

    // A store that fails to open leaves the server up in degraded mode so the
    // failure is visible on /health; secret routes answer 500 until restart.
    let db_path = data_dir.join("scrt.db");
    let store = match Store::open(&db_path, enc_key) {
        Ok(store) => Some(store),
        Err(e) => {
            error!(error = %format!("{e:#}"), path = %db_path.display(), "could not open store");
            None
        }
    };

    let state = AppState {
        store,
        notifier: build_notifier(&cfg),
    };
    let app = router(state, cfg.cors_origins.as_deref());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "scrt server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    axum::serve(listener, app).await.context("server error")
}

fn build_notifier(cfg: &ServerConfig) -> ReceiptNotifier {
    let mut notifier = ReceiptNotifier::new(cfg.public_url.clone());

    if let Some(t) = &cfg.twilio {
        match TwilioSms::new(
            t.account_sid.clone(),
            t.auth_token.clone(),
            t.from.clone(),
            cfg.notify_timeout,
        ) {
            Ok(sms) => {
                info!("SMS receipts enabled (Twilio)");
                notifier = notifier.with_sms(Arc::new(sms));
            }
            Err(e) => warn!(error = %e, "SMS receipts disabled"),
        }
    }

    if let Some(m) = &cfg.mailjet {
        match MailjetEmail::new(
            m.api_key.clone(),
            m.api_secret.clone(),
            m.template_id,
            m.sender.clone(),
            cfg.notify_timeout,
        ) {
            Ok(email) => {
                info!(template_id = m.template_id, "email receipts enabled (Mailjet)");
                notifier = notifier.with_email(Arc::new(email));
            }
            Err(e) => warn!(error = %e, "email receipts disabled"),
        }
    }

    notifier
}

fn load_or_create_key(data_dir: &Path) -> Result<crypto::EncryptionKey> {
    let key_path = data_dir.join("scrt.key");
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("read scrt.key")?;
        crypto::load_key(&bytes).ok_or_else(|| {
            anyhow::anyhow!(
                "scrt.key is corrupt (expected 32 bytes, got {})",
                bytes.len()
            )
        })
    } else {
        let key = crypto::generate_key();
        std::fs::write(&key_path, key.as_bytes()).context("write scrt.key")?;
        info!("generated new encryption key");
        Ok(key)
    }
}

fn load_or_create_salt(data_dir: &Path) -> Result<[u8; 32]> {
    let salt_path = data_dir.join("scrt.salt");
    if salt_path.exists() {
        let bytes = std::fs::read(&salt_path).context("read scrt.salt")?;
        bytes.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!(
                "scrt.salt is corrupt (expected 32 bytes, got {})",
                bytes.len()
            )
        })
    } else {
        let salt = crypto::generate_salt();
        std::fs::write(&salt_path, salt).context("write scrt.salt")?;
        info!("generated new key derivation salt");
        Ok(salt)
    }
}

fn build_cors(origins: Option<&str>) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            http::Method::GET,
            http::Method::HEAD,
            http::Method::POST,
            http::Method::DELETE,
            http::Method::OPTIONS,
        ])
        .allow_headers(Any);

    match origins {
        Some(o) => {
            let origins: Vec<_> = o.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            cors.allow_origin(origins)
        }
        None => cors.allow_origin(Any),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn key_file_is_created_once_and_reused() {
        let dir = tempdir().unwrap();
        let first = load_or_create_key(dir.path()).unwrap();
        let second = load_or_create_key(dir.path()).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn corrupt_key_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("scrt.key"), b"short").unwrap();
        assert!(load_or_create_key(dir.path()).is_err());
    }

    #[test]
    fn salt_is_persisted() {
        let dir = tempdir().unwrap();
        let first = load_or_create_salt(dir.path()).unwrap();
        let second = load_or_create_salt(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn read_key_file_trims_and_rejects_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("master");
        std::fs::write(&path, "  s3cret\n").unwrap();
        assert_eq!(read_key_file(&path).unwrap(), "s3cret");

        std::fs::write(&path, " \n").unwrap();
        assert!(read_key_file(&path).is_err());
    }
}
