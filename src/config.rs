use anyhow::{Context, Result, anyhow};
use clap::Parser;
use reqwest::Url;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub director: DirectorConfig,
    pub pool: PoolConfig,
}

/// Connection to the Data Director backend.
#[derive(Clone)]
pub struct DirectorConfig {
    pub host: String,
    pub port: u16,
    pub api_path: String,
    pub username: String,
    pub password: String,
    pub org: String,
    pub dbgroup: String,
    pub template: String,
    pub backup_template: String,
    /// Skip the name lookup when set.
    pub dbgroup_id: Option<String>,
    pub template_id: Option<String>,
    pub backup_template_id: Option<String>,
    pub task_timeout: Duration,
}

// Hand-written so the password never reaches the logs.
impl std::fmt::Debug for DirectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectorConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_path", &self.api_path)
            .field("username", &self.username)
            .field("org", &self.org)
            .field("dbgroup", &self.dbgroup)
            .field("template", &self.template)
            .field("backup_template", &self.backup_template)
            .field("dbgroup_id", &self.dbgroup_id)
            .field("template_id", &self.template_id)
            .field("backup_template_id", &self.backup_template_id)
            .field("task_timeout", &self.task_timeout)
            .finish_non_exhaustive()
    }
}

impl DirectorConfig {
    pub fn base_url(&self) -> Result<Url> {
        let raw = format!("https://{}:{}", self.host, self.port);
        Url::parse(&raw).with_context(|| format!("building backend URL from `{raw}`"))
    }
}

/// Pool sizing and loop timing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_pool_size: i64,
    pub pool_check_cycle: Duration,
    pub cleanup_check_cycle: Duration,
    /// Rename databases after the name in the provision request.
    pub update_service_name: bool,
    /// Host name handed to callers in credentials.
    pub nameserver: String,
    pub nameserver_port: u16,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Warm-pool database broker for the Data Director API")]
pub struct Args {
    /// Host to bind to (overrides DBPOOL_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DBPOOL_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL of the local state store (overrides DBPOOL_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Backend host (overrides DBPOOL_DIRECTOR_HOST)
    #[arg(long)]
    pub director_host: Option<String>,

    /// Backend port (overrides DBPOOL_DIRECTOR_PORT)
    #[arg(long)]
    pub director_port: Option<u16>,

    /// Backend API path prefix (overrides DBPOOL_API_PATH)
    #[arg(long)]
    pub api_path: Option<String>,

    /// Backend user (overrides DBPOOL_DIRECTOR_USERNAME)
    #[arg(long)]
    pub director_username: Option<String>,

    /// Organization name (overrides DBPOOL_ORG)
    #[arg(long)]
    pub org: Option<String>,

    /// Database group name (overrides DBPOOL_DBGROUP)
    #[arg(long)]
    pub dbgroup: Option<String>,

    /// Database configuration template name (overrides DBPOOL_TEMPLATE)
    #[arg(long)]
    pub template: Option<String>,

    /// Backup template name (overrides DBPOOL_BACKUP_TEMPLATE)
    #[arg(long)]
    pub backup_template: Option<String>,

    /// Host name given to callers (overrides DBPOOL_NAMESERVER)
    #[arg(long)]
    pub nameserver: Option<String>,

    /// Port given to callers (overrides DBPOOL_NAMESERVER_PORT)
    #[arg(long)]
    pub nameserver_port: Option<u16>,

    /// Databases kept ready (overrides DBPOOL_MIN_POOL_SIZE)
    #[arg(long)]
    pub min_pool_size: Option<i64>,

    /// Seconds between fill passes (overrides DBPOOL_POOL_CHECK_CYCLE)
    #[arg(long)]
    pub db_pool_check_cycle: Option<u64>,

    /// Seconds between cleanup passes (overrides DBPOOL_CLEANUP_CHECK_CYCLE)
    #[arg(long)]
    pub db_cleanup_check_cycle: Option<u64>,

    /// Seconds to wait for a backend task (overrides DBPOOL_TASK_TIMEOUT)
    #[arg(long)]
    pub task_timeout: Option<u64>,

    /// Rename databases after the requested service name (overrides DBPOOL_UPDATE_SERVICE_NAME)
    #[arg(long)]
    pub update_service_name: bool,

    /// Create the state store schema and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up with `lookup`, over defaults.
    ///
    /// Secrets (the backend password) are only read from the environment.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |arg: Option<String>, key: &str, default: &str| {
            arg.or_else(|| lookup(key))
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let director = DirectorConfig {
            host: args
                .director_host
                .or_else(|| lookup("DBPOOL_DIRECTOR_HOST"))
                .ok_or_else(|| anyhow!("DBPOOL_DIRECTOR_HOST or --director-host is required"))?,
            port: pick(args.director_port, &lookup, "DBPOOL_DIRECTOR_PORT", 443)?,
            api_path: text(args.api_path, "DBPOOL_API_PATH", "/datadirector/api/v1"),
            username: text(args.director_username, "DBPOOL_DIRECTOR_USERNAME", ""),
            password: lookup("DBPOOL_DIRECTOR_PASSWORD").unwrap_or_default(),
            org: text(args.org, "DBPOOL_ORG", ""),
            dbgroup: text(args.dbgroup, "DBPOOL_DBGROUP", ""),
            template: text(args.template, "DBPOOL_TEMPLATE", ""),
            backup_template: text(args.backup_template, "DBPOOL_BACKUP_TEMPLATE", ""),
            dbgroup_id: optional("DBPOOL_DBGROUP_ID"),
            template_id: optional("DBPOOL_TEMPLATE_ID"),
            backup_template_id: optional("DBPOOL_BACKUP_TEMPLATE_ID"),
            task_timeout: Duration::from_secs(pick(
                args.task_timeout,
                &lookup,
                "DBPOOL_TASK_TIMEOUT",
                300,
            )?),
        };

        let pool = PoolConfig {
            min_pool_size: pick(args.min_pool_size, &lookup, "DBPOOL_MIN_POOL_SIZE", 3)?,
            pool_check_cycle: Duration::from_secs(pick(
                args.db_pool_check_cycle,
                &lookup,
                "DBPOOL_POOL_CHECK_CYCLE",
                10,
            )?),
            cleanup_check_cycle: Duration::from_secs(pick(
                args.db_cleanup_check_cycle,
                &lookup,
                "DBPOOL_CLEANUP_CHECK_CYCLE",
                60,
            )?),
            update_service_name: args.update_service_name
                || pick(None, &lookup, "DBPOOL_UPDATE_SERVICE_NAME", false)?,
            nameserver: text(args.nameserver, "DBPOOL_NAMESERVER", "localhost"),
            nameserver_port: pick(args.nameserver_port, &lookup, "DBPOOL_NAMESERVER_PORT", 5432)?,
        };

        if pool.min_pool_size < 0 {
            anyhow::bail!("min_pool_size must not be negative");
        }

        Ok(Self {
            host: text(args.host, "DBPOOL_HOST", "0.0.0.0"),
            port: pick(args.port, &lookup, "DBPOOL_PORT", 3000)?,
            database_url: text(
                args.database_url,
                "DBPOOL_DATABASE_URL",
                "sqlite://./data/broker.db",
            ),
            director,
            pool,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value, else parsed environment value, else default.
fn pick<T>(
    arg: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = arg {
        return Ok(value);
    }
    match lookup(key) {
        Some(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::resolve(Args::default(), env(&[("DBPOOL_DIRECTOR_HOST", "dd")])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.director.port, 443);
        assert_eq!(cfg.director.api_path, "/datadirector/api/v1");
        assert_eq!(cfg.director.task_timeout, Duration::from_secs(300));
        assert_eq!(cfg.pool.min_pool_size, 3);
        assert_eq!(cfg.pool.pool_check_cycle, Duration::from_secs(10));
        assert_eq!(cfg.pool.cleanup_check_cycle, Duration::from_secs(60));
        assert!(!cfg.pool.update_service_name);
        assert_eq!(
            cfg.director.base_url().unwrap().as_str(),
            "https://dd/"
        );
    }

    #[test]
    fn args_beat_env() {
        let args = Args {
            min_pool_size: Some(7),
            director_host: Some("from-flag".into()),
            update_service_name: true,
            ..Args::default()
        };
        let cfg = AppConfig::resolve(
            args,
            env(&[
                ("DBPOOL_DIRECTOR_HOST", "from-env"),
                ("DBPOOL_MIN_POOL_SIZE", "2"),
                ("DBPOOL_TASK_TIMEOUT", "45"),
                ("DBPOOL_TEMPLATE_ID", "42"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.director.host, "from-flag");
        assert_eq!(cfg.pool.min_pool_size, 7);
        assert!(cfg.pool.update_service_name);
        assert_eq!(cfg.director.task_timeout, Duration::from_secs(45));
        assert_eq!(cfg.director.template_id.as_deref(), Some("42"));
        assert_eq!(cfg.director.dbgroup_id, None);
    }

    #[test]
    fn invalid_numbers_are_errors() {
        let err = AppConfig::resolve(
            Args::default(),
            env(&[("DBPOOL_DIRECTOR_HOST", "dd"), ("DBPOOL_PORT", "eighty")]),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("DBPOOL_PORT"));
    }

    #[test]
    fn backend_host_is_required() {
        assert!(AppConfig::resolve(Args::default(), env(&[])).is_err());
    }

    #[test]
    fn password_is_not_debug_printed() {
        let cfg = AppConfig::resolve(
            Args::default(),
            env(&[
                ("DBPOOL_DIRECTOR_HOST", "dd"),
                ("DBPOOL_DIRECTOR_PASSWORD", "hunter2"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.director.password, "hunter2");
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
