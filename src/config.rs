use anyhow::{Context, Result, bail};
use base64::{Engine as _, engine::general_purpose};
use clap::Parser;
use std::{env, fmt};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// `None` disables authentication.
    pub credentials: Option<Credentials>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "WebDAV gateway over a flat object store")]
pub struct Args {
    /// Host to bind to (overrides DAV_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DAV_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides DAV_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DAV_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Basic auth user name (overrides DAV_USERNAME)
    #[arg(long)]
    pub username: Option<String>,

    /// Basic auth password (overrides DAV_PASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// The single user allowed in when authentication is enabled.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The exact `Authorization` header value these credentials produce.
    pub fn basic_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", general_purpose::STANDARD.encode(raw))
    }

    pub fn matches(&self, authorization: Option<&str>) -> bool {
        authorization.is_some_and(|value| value == self.basic_header())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name))?;
        Ok((cfg, migrate))
    }

    /// Merge `args` over the variables returned by `var`, over defaults.
    pub fn resolve<F>(args: Args, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        // --- Environment fallback ---
        let env_host = var("DAV_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match var("DAV_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing DAV_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading DAV_PORT"),
        };
        let env_storage = var("DAV_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db =
            var("DAV_DATABASE_URL").unwrap_or_else(|_| "sqlite://./data/meta/dav.db".into());

        let username = args.username.or_else(|| var("DAV_USERNAME").ok());
        let password = args.password.or_else(|| var("DAV_PASSWORD").ok());
        let credentials = match (username, password) {
            (Some(username), Some(password)) => Some(Credentials::new(username, password)),
            (None, None) => None,
            _ => bail!("DAV_USERNAME and DAV_PASSWORD must be set together"),
        };

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            credentials,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
