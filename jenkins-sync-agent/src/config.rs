use std::{
    borrow::Cow,
    net::{AddrParseError, SocketAddr},
    num::ParseIntError,
    time::Duration,
};

use thiserror::Error;

pub const ENABLED_ENV: &str = "JENKINS_SYNC_ENABLED";
pub const JENKINS_SERVICE_ENV: &str = "JENKINS_SYNC_JENKINS_SERVICE";
pub const FINGERPRINT_ENV: &str = "JENKINS_SYNC_FINGERPRINT";
pub const NAMESPACES_ENV: &str = "JENKINS_SYNC_NAMESPACES";
pub const WORKERS_ENV: &str = "JENKINS_SYNC_WORKERS";
pub const BACKOFF_BASE_MS_ENV: &str = "JENKINS_SYNC_BACKOFF_BASE_MS";
pub const BACKOFF_CAP_SECS_ENV: &str = "JENKINS_SYNC_BACKOFF_CAP_SECS";
pub const MAX_RETRIES_ENV: &str = "JENKINS_SYNC_MAX_RETRIES";
pub const GATE_INTERVAL_SECS_ENV: &str = "JENKINS_SYNC_GATE_INTERVAL_SECS";
pub const GATE_TIMEOUT_SECS_ENV: &str = "JENKINS_SYNC_GATE_TIMEOUT_SECS";
pub const SYNC_INTERVAL_SECS_ENV: &str = "JENKINS_SYNC_CACHE_SYNC_INTERVAL_SECS";
pub const SYNC_TIMEOUT_SECS_ENV: &str = "JENKINS_SYNC_CACHE_SYNC_TIMEOUT_SECS";
pub const HEARTBEAT_PERIOD_SECS_ENV: &str = "JENKINS_SYNC_HEARTBEAT_PERIOD_SECS";
pub const HEARTBEAT_STALENESS_SECS_ENV: &str = "JENKINS_SYNC_HEARTBEAT_STALENESS_SECS";
pub const HEARTBEAT_THRESHOLD_ENV: &str = "JENKINS_SYNC_HEARTBEAT_THRESHOLD";
pub const WATCHER_ALIVE_CHECK_SECS_ENV: &str = "JENKINS_SYNC_WATCHER_ALIVE_CHECK_SECS";
pub const KUBECONFIG_ENV: &str = "JENKINS_SYNC_KUBECONFIG";
pub const KUBE_CONTEXT_ENV: &str = "JENKINS_SYNC_KUBE_CONTEXT";
pub const APPLY_CRDS_ENV: &str = "JENKINS_SYNC_APPLY_CRDS";
pub const METRICS_ADDR_ENV: &str = "JENKINS_SYNC_METRICS_ADDR";

#[derive(Debug, Error)]
pub enum FromError {
    #[error("Env var unavailable: {}", .0)]
    VarUnset(Cow<'static, str>),
    #[error("{} must be either 'true' or 'false', got '{}'", .0, .1)]
    InvalidBool(Cow<'static, str>, String),
    #[error("{} couldn't be parsed: {}", .0, .1)]
    InvalidNumber(Cow<'static, str>, ParseIntError),
    #[error("{} must be a host:port address: {}", .0, .1)]
    InvalidAddress(Cow<'static, str>, AddrParseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub enabled: bool,
    pub jenkins_service: String,
    /// identity of the Jenkins instance, has to survive restarts
    pub fingerprint: String,
    /// empty means every namespace
    pub namespaces: Vec<String>,
    pub workers: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_retries: u32,
    pub gate_interval: Duration,
    pub gate_timeout: Duration,
    pub sync_interval: Duration,
    pub sync_timeout: Duration,
    pub heartbeat_period: Duration,
    pub heartbeat_staleness: Duration,
    pub heartbeat_threshold: u32,
    pub watcher_alive_check: Duration,
    pub kubeconfig: Option<String>,
    pub kube_context: Option<String>,
    pub apply_crds: bool,
    /// Prometheus listener, metrics aren't exported when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jenkins_service: String::new(),
            fingerprint: String::new(),
            namespaces: Vec::new(),
            workers: 1,
            backoff_base: Duration::from_millis(5),
            backoff_cap: Duration::from_secs(1000),
            max_retries: 15,
            gate_interval: Duration::from_secs(60),
            gate_timeout: Duration::from_secs(365 * 24 * 60 * 60),
            sync_interval: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(30 * 60),
            heartbeat_period: Duration::from_secs(60),
            heartbeat_staleness: Duration::from_secs(60),
            heartbeat_threshold: 3,
            watcher_alive_check: Duration::from_secs(5 * 60),
            kubeconfig: None,
            kube_context: None,
            apply_crds: false,
            metrics_addr: None,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, FromError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FromError> {
        let defaults = Self::default();

        Ok(Self {
            enabled: parse_bool(&lookup, ENABLED_ENV)?.unwrap_or(defaults.enabled),
            jenkins_service: lookup(JENKINS_SERVICE_ENV)
                .ok_or(FromError::VarUnset(JENKINS_SERVICE_ENV.into()))?,
            fingerprint: lookup(FINGERPRINT_ENV)
                .filter(|fingerprint| !fingerprint.trim().is_empty())
                .ok_or(FromError::VarUnset(FINGERPRINT_ENV.into()))?,
            namespaces: lookup(NAMESPACES_ENV)
                .map(|namespaces| {
                    namespaces
                        .split(',')
                        .map(str::trim)
                        .filter(|namespace| !namespace.is_empty())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default(),
            workers: parse_number(&lookup, WORKERS_ENV)?
                .map(|workers: usize| workers.max(1))
                .unwrap_or(defaults.workers),
            backoff_base: parse_number(&lookup, BACKOFF_BASE_MS_ENV)?
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_cap: parse_secs(&lookup, BACKOFF_CAP_SECS_ENV)?.unwrap_or(defaults.backoff_cap),
            max_retries: parse_number(&lookup, MAX_RETRIES_ENV)?.unwrap_or(defaults.max_retries),
            gate_interval: parse_secs(&lookup, GATE_INTERVAL_SECS_ENV)?
                .unwrap_or(defaults.gate_interval),
            gate_timeout: parse_secs(&lookup, GATE_TIMEOUT_SECS_ENV)?
                .unwrap_or(defaults.gate_timeout),
            sync_interval: parse_secs(&lookup, SYNC_INTERVAL_SECS_ENV)?
                .unwrap_or(defaults.sync_interval),
            sync_timeout: parse_secs(&lookup, SYNC_TIMEOUT_SECS_ENV)?
                .unwrap_or(defaults.sync_timeout),
            heartbeat_period: parse_secs(&lookup, HEARTBEAT_PERIOD_SECS_ENV)?
                .unwrap_or(defaults.heartbeat_period),
            heartbeat_staleness: parse_secs(&lookup, HEARTBEAT_STALENESS_SECS_ENV)?
                .unwrap_or(defaults.heartbeat_staleness),
            heartbeat_threshold: parse_number(&lookup, HEARTBEAT_THRESHOLD_ENV)?
                .unwrap_or(defaults.heartbeat_threshold),
            watcher_alive_check: parse_secs(&lookup, WATCHER_ALIVE_CHECK_SECS_ENV)?
                .unwrap_or(defaults.watcher_alive_check),
            kubeconfig: lookup(KUBECONFIG_ENV),
            kube_context: lookup(KUBE_CONTEXT_ENV),
            apply_crds: parse_bool(&lookup, APPLY_CRDS_ENV)?.unwrap_or(defaults.apply_crds),
            metrics_addr: lookup(METRICS_ADDR_ENV)
                .map(|addr| {
                    addr.trim()
                        .parse()
                        .map_err(|err| FromError::InvalidAddress(METRICS_ADDR_ENV.into(), err))
                })
                .transpose()?,
        })
    }

    /// Namespaces to list and watch, `None` standing for all of them.
    pub fn scopes(&self) -> Vec<Option<String>> {
        match self.namespaces.is_empty() {
            true => vec![None],
            false => self.namespaces.iter().cloned().map(Some).collect(),
        }
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<bool>, FromError> {
    match lookup(name) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(FromError::InvalidBool(name.into(), value)),
        },
        None => Ok(None),
    }
}

fn parse_number<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, FromError>
where
    T: std::str::FromStr<Err = ParseIntError>,
{
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|err| FromError::InvalidNumber(name.into(), err))
        })
        .transpose()
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<Duration>, FromError> {
    Ok(parse_number(lookup, name)?.map(Duration::from_secs))
}
