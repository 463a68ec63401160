mod envelope;

use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "scrt", about = "scrt: one-time secret links", version)]
struct Cli {
    /// scrt server URL (default: http://localhost:8080 or $SCRT_SERVER)
    #[arg(long, env = "SCRT_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scrt HTTP server
    Serve {
        /// Port to listen on (default: $SCRT_PORT or 8080)
        #[arg(long, env = "SCRT_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $SCRT_HOST or 0.0.0.0)
        #[arg(long, env = "SCRT_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// Create a secret and print its alias
    Create {
        /// Secret content; read from stdin when omitted
        message: Option<String>,
        #[arg(long = "type", value_enum, default_value = "text")]
        secret_type: Kind,
        /// Custom alias (default: server-generated)
        #[arg(long)]
        alias: Option<String>,
        /// Encrypt the message with this password before it leaves the machine
        #[arg(long)]
        password: Option<String>,
        /// Neogram only: text shown before the message self-destructs
        #[arg(long)]
        destruction_message: Option<String>,
        /// Neogram only: countdown, e.g. 5s or 1m
        #[arg(long)]
        timeout: Option<String>,
        /// Email address notified when the secret is viewed
        #[arg(long)]
        receipt_email: Option<String>,
        /// Phone number (international format) notified when the secret is viewed
        #[arg(long)]
        receipt_phone: Option<String>,
    },
    /// Reveal (and destroy) a secret
    Reveal {
        alias: String,
        /// Password for secrets created with --password
        #[arg(long)]
        password: Option<String>,
    },
    /// Decrypt a password-protected message printed by `reveal`
    Open {
        envelope: String,
        #[arg(long)]
        password: String,
    },
    /// Show creation and view counters
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Text,
    Url,
    Neogram,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::Text => "text",
            Kind::Url => "url",
            Kind::Neogram => "neogram",
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let (cli, dotenv) = load_env_and_parse(None, std::env::args_os())?;

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SCRT_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Some(path) = dotenv {
        tracing::info!(path = %path.display(), "loaded environment file");
    }

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Create {
            message,
            secret_type,
            alias,
            password,
            destruction_message,
            timeout,
            receipt_email,
            receipt_phone,
        } => {
            let message = match message {
                Some(m) => m,
                None => read_stdin()?,
            };
            let timeout = timeout.as_deref().map(parse_duration).transpose()?;
            let body = CreateArgs {
                secret_type,
                alias,
                password,
                destruction_message,
                timeout,
                receipt_email,
                receipt_phone,
            }
            .into_body(message)?;
            cmd_create(&cli.server, body).await
        }

        Commands::Reveal { alias, password } => {
            cmd_reveal(&cli.server, &alias, password.as_deref()).await
        }

        Commands::Open { envelope, password } => {
            println!("{}", envelope::open(&password, &envelope)?);
            Ok(())
        }

        Commands::Stats => cmd_stats(&cli.server).await,
    }
}

/// Load `.env` (or `env_file`), then parse `args`, so the file feeds the clap
/// `env` fallbacks and `SCRT_LOG_LEVEL`. Returns the file that was loaded.
fn load_env_and_parse<I, T>(env_file: Option<&Path>, args: I) -> Result<(Cli, Option<PathBuf>)>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let loaded = match env_file {
        Some(path) => dotenvy::from_path(path).map(|()| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    let loaded = match loaded {
        Ok(path) => Some(path),
        Err(e) if e.not_found() => None,
        Err(e) => return Err(e).context("load .env"),
    };
    Ok((Cli::parse_from(args), loaded))
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = scrt_server::ServerConfig {
        host,
        port,
        master_key: scrt_server::resolve_master_key()?,
        ..Default::default()
    };

    scrt_server::run(cfg).await
}

struct CreateArgs {
    secret_type: Kind,
    alias: Option<String>,
    password: Option<String>,
    destruction_message: Option<String>,
    timeout: Option<u64>,
    receipt_email: Option<String>,
    receipt_phone: Option<String>,
}

impl CreateArgs {
    fn into_body(self, message: String) -> Result<Value> {
        let message = match self.password.as_deref() {
            Some(password) => envelope::seal(password, &message)?,
            None => message,
        };
        Ok(json!({
            "alias": self.alias,
            "secretType": self.secret_type.as_str(),
            "message": message,
            "isEncryptedWithUserPassword": self.password.is_some(),
            "neogramDestructionMessage": self.destruction_message,
            "neogramDestructionTimeout": self.timeout,
            "receiptEmail": self.receipt_email,
            "receiptPhoneNumber": self.receipt_phone,
        }))
    }
}

async fn cmd_create(server: &str, body: Value) -> Result<()> {
    let client = Client::new();
    let resp = client
        .post(format!("{}/api/secrets", server.trim_end_matches('/')))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {}", error_text(&json));
    }

    let alias = json["alias"].as_str().context("response has no alias")?;
    println!("{alias}");
    println!("{}", secret_url(server, alias)?);
    Ok(())
}

async fn cmd_reveal(server: &str, alias: &str, password: Option<&str>) -> Result<()> {
    let client = Client::new();
    let resp = client
        .delete(secret_url(server, alias)?)
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("{}", error_text(&json));
    }

    let message = json["message"].as_str().unwrap_or("");
    let protected = json["isEncryptedWithUserPassword"].as_bool().unwrap_or(false);

    match (protected, password) {
        (true, Some(password)) => println!("{}", envelope::open(password, message)?),
        (true, None) => {
            // The secret is already gone server-side; keep the envelope.
            eprintln!("secret is password-protected; decrypt with `scrt open <ENVELOPE> --password ...`");
            println!("{message}");
        }
        (false, _) => println!("{message}"),
    }

    if json["secretType"] == "neogram" {
        let destruction = json["neogramDestructionMessage"].as_str().unwrap_or("");
        let timeout = json["neogramDestructionTimeout"].as_u64().unwrap_or(0);
        if !destruction.is_empty() {
            eprintln!("{destruction}");
        }
        eprintln!("(self-destructs after {timeout}s)");
    }
    Ok(())
}

async fn cmd_stats(server: &str) -> Result<()> {
    let client = Client::new();
    let resp = client
        .get(format!("{}/api/stats", server.trim_end_matches('/')))
        .send()
        .await
        .context("HTTP request failed")?;

    let status = resp.status();
    let json: Value = resp.json().await.context("parse response")?;
    if !status.is_success() {
        anyhow::bail!("server returned {status}: {}", error_text(&json));
    }

    println!(
        "created: {}  viewed: {}",
        json["totalSecretsCount"], json["totalSecretsViewCount"]
    );
    for kind in ["text", "url", "neogram"] {
        println!(
            "  {kind:<8} {:>8} created  {:>8} viewed",
            json["secretsCount"][kind], json["secretsViewCount"][kind]
        );
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read message from stdin")?;
    let message = buf.trim_end_matches(['\r', '\n']).to_owned();
    if message.is_empty() {
        anyhow::bail!("no message given (pass it as an argument or on stdin)");
    }
    Ok(message)
}

/// Parse human duration strings like "5s" or "1m" into seconds.
fn parse_duration(s: &str) -> Result<u64> {
    let d: humantime::Duration = s
        .parse()
        .with_context(|| format!("invalid duration: {s}"))?;
    Ok(d.as_secs())
}

/// `{server}/api/secrets/{alias}`, with the alias encoded as a single path segment.
fn secret_url(server: &str, alias: &str) -> Result<Url> {
    let mut url = Url::parse(server).with_context(|| format!("invalid server URL: {server}"))?;
    url.path_segments_mut()
        .map_err(|()| anyhow::anyhow!("invalid server URL: {server}"))?
        .pop_if_empty()
        .extend(["api", "secrets", alias]);
    Ok(url)
}

fn error_text(json: &Value) -> &str {
    json["error"].as_str().unwrap_or("unknown error")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> CreateArgs {
        CreateArgs {
            secret_type: Kind::Neogram,
            alias: Some("abc123".into()),
            password: None,
            destruction_message: Some("poof".into()),
            timeout: Some(5),
            receipt_email: None,
            receipt_phone: None,
        }
    }

    #[test]
    fn create_body_uses_wire_names() {
        let body = args().into_body("hello".into()).unwrap();
        assert_eq!(body["alias"], "abc123");
        assert_eq!(body["secretType"], "neogram");
        assert_eq!(body["message"], "hello");
        assert_eq!(body["isEncryptedWithUserPassword"], false);
        assert_eq!(body["neogramDestructionTimeout"], 5);
        assert_eq!(body["receiptEmail"], Value::Null);
    }

    #[test]
    fn password_encrypts_before_sending() {
        let mut a = args();
        a.password = Some("hunter2".into());
        let body = a.into_body("hello".into()).unwrap();
        assert_eq!(body["isEncryptedWithUserPassword"], true);
        let sent = body["message"].as_str().unwrap();
        assert_ne!(sent, "hello");
        assert_eq!(envelope::open("hunter2", sent).unwrap(), "hello");
    }

    #[test]
    fn secret_url_encodes_the_alias() {
        assert_eq!(
            secret_url("http://localhost:8080", "abc123").unwrap().as_str(),
            "http://localhost:8080/api/secrets/abc123"
        );
        assert_eq!(
            secret_url("https://scrt.link/base/", "abc").unwrap().as_str(),
            "https://scrt.link/base/api/secrets/abc"
        );

        let url = secret_url("http://localhost:8080", "a?b#c/d").unwrap();
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
        assert_eq!(url.path(), "/api/secrets/a%3Fb%23c%2Fd");

        assert!(secret_url("not a url", "abc").is_err());
    }

    #[test]
    fn env_file_feeds_flag_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(&env_file, "SCRT_PORT=9000\nSCRT_HOST=127.0.0.1\n").unwrap();

        let parsed = load_env_and_parse(Some(&env_file), ["scrt", "serve"]);
        std::env::remove_var("SCRT_PORT");
        std::env::remove_var("SCRT_HOST");

        let (cli, loaded) = parsed.unwrap();
        assert_eq!(loaded.as_deref(), Some(env_file.as_path()));
        match cli.command {
            Commands::Serve { port, host } => {
                assert_eq!(port, 9000);
                assert_eq!(host, "127.0.0.1");
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn missing_env_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, loaded) =
            load_env_and_parse(Some(&dir.path().join("absent.env")), ["scrt", "stats"]).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("5s").unwrap(), 5);
        assert_eq!(parse_duration("1m").unwrap(), 60);
        assert!(parse_duration("soon").is_err());
    }
}
