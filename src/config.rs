use std::env;

use anyhow::{Context, bail};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub run_migrations: bool,
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub delete_confirm_ttl_secs: i64,
    /// `None` means a random key per process.
    pub delete_guard_secret: Option<String>,
    pub enforce_slot_conflicts: bool,
    pub bootstrap_admin_token: Option<String>,
}

fn parse_bool(key: &str, raw: &str) -> anyhow::Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{key} must be a boolean, got {other:?}"),
    }
}

fn parse_positive(key: &str, raw: &str) -> anyhow::Result<i64> {
    let n = raw
        .trim()
        .parse::<i64>()
        .with_context(|| format!("{key} must be an integer, got {raw:?}"))?;
    if n <= 0 {
        bail!("{key} must be > 0, got {n}");
    }
    Ok(n)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8000".to_string());

        let backend = match get("STORE_BACKEND").as_deref().map(str::trim) {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => bail!("STORE_BACKEND must be postgres or memory, got {other:?}"),
        };

        let database_url = get("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL is required when STORE_BACKEND=postgres");
        }

        let run_migrations = match get("RUN_MIGRATIONS") {
            Some(v) => parse_bool("RUN_MIGRATIONS", &v)?,
            None => true,
        };
        let default_page_size = match get("DEFAULT_PAGE_SIZE") {
            Some(v) => parse_positive("DEFAULT_PAGE_SIZE", &v)?,
            None => 10,
        };
        let max_page_size = match get("MAX_PAGE_SIZE") {
            Some(v) => parse_positive("MAX_PAGE_SIZE", &v)?,
            None => 100,
        };
        if default_page_size > max_page_size {
            bail!("DEFAULT_PAGE_SIZE ({default_page_size}) exceeds MAX_PAGE_SIZE ({max_page_size})");
        }
        let delete_confirm_ttl_secs = match get("DELETE_CONFIRM_TTL_SECS") {
            Some(v) => parse_positive("DELETE_CONFIRM_TTL_SECS", &v)?,
            None => 300,
        };
        let enforce_slot_conflicts = match get("ENFORCE_SLOT_CONFLICTS") {
            Some(v) => parse_bool("ENFORCE_SLOT_CONFLICTS", &v)?,
            None => false,
        };

        let bootstrap_admin_token = get("BOOTSTRAP_ADMIN_TOKEN");
        if bootstrap_admin_token.is_some() && backend != StoreBackend::Memory {
            bail!("BOOTSTRAP_ADMIN_TOKEN is only honoured with STORE_BACKEND=memory");
        }

        Ok(Self {
            bind_addr,
            backend,
            database_url,
            run_migrations,
            default_page_size,
            max_page_size,
            delete_confirm_ttl_secs,
            delete_guard_secret: get("DELETE_GUARD_SECRET"),
            enforce_slot_conflicts,
            bootstrap_admin_token,
        })
    }
}
