use crate::{Error, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// number of threads config
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Thread {
    /// number of http server threads
    pub http: usize,
}

/// network config
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Network {
    /// server bind host
    pub host: String,
    /// server bind port
    pub port: u16,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Paylabs gateway setting
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Paylabs {
    /// api base url, sandbox by default
    pub api_url: String,
    pub merchant_id: String,

    /// merchant RSA private key, PEM or bare base64
    pub private_key: Option<String>,
    /// read the private key from this file when `private_key` is unset
    pub private_key_file: Option<PathBuf>,

    /// Paylabs public key for webhook signatures
    pub public_key: Option<String>,
    pub public_key_file: Option<PathBuf>,

    /// path of the notify url, also the path signed by webhook requests
    pub webhook_path: String,

    /// request timeout in seconds
    pub timeout: u64,

    /// refuse unsigned or badly signed notifications
    pub verify_webhook: bool,
}

impl Default for Paylabs {
    fn default() -> Self {
        Self {
            api_url: "https://sit-pay.paylabs.co.id".to_owned(),
            merchant_id: String::new(),
            private_key: None,
            private_key_file: None,
            public_key: None,
            public_key_file: None,
            webhook_path: "/api/v1/payment/webhook".to_owned(),
            timeout: 30,
            verify_webhook: true,
        }
    }
}

// keys stay out of the logs
impl fmt::Debug for Paylabs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Paylabs")
            .field("api_url", &self.api_url)
            .field("merchant_id", &self.merchant_id)
            .field("private_key", &self.private_key.as_ref().map(|_| "***"))
            .field("private_key_file", &self.private_key_file)
            .field("public_key", &self.public_key.as_ref().map(|_| "***"))
            .field("public_key_file", &self.public_key_file)
            .field("webhook_path", &self.webhook_path)
            .field("timeout", &self.timeout)
            .field("verify_webhook", &self.verify_webhook)
            .finish()
    }
}

fn key_material(inline: &Option<String>, file: &Option<PathBuf>) -> Result<Option<String>> {
    match (inline, file) {
        (Some(key), _) if !key.trim().is_empty() => Ok(Some(key.clone())),
        (_, Some(path)) => Ok(Some(fs::read_to_string(path)?)),
        _ => Ok(None),
    }
}

impl Paylabs {
    pub fn private_key_material(&self) -> Result<Option<String>> {
        key_material(&self.private_key, &self.private_key_file)
    }

    pub fn public_key_material(&self) -> Result<Option<String>> {
        key_material(&self.public_key, &self.public_key_file)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// donation rules
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Donation {
    /// minimum amount in rupiah
    pub min_amount: i64,
    /// minimum amount for e-wallet methods
    pub ewallet_min_amount: i64,
}

impl Default for Donation {
    fn default() -> Self {
        Self {
            min_amount: 1_000,
            ewallet_min_amount: 10_000,
        }
    }
}

/// overlay alert stream
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Alert {
    /// heartbeat interval in seconds
    pub heartbeat: u64,
    /// per connection alert buffer
    pub buffer: usize,
}

impl Default for Alert {
    fn default() -> Self {
        Self {
            heartbeat: 30,
            buffer: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Setting {
    /// database url
    /// https://www.sea-ql.org/SeaORM/docs/install-and-config/connection/
    pub db_url: String,

    /// the public site url, used to build the notify url
    pub site: Option<String>,

    pub thread: Thread,
    pub network: Network,

    pub paylabs: Paylabs,
    pub donation: Donation,
    pub alert: Alert,
}

impl Default for Setting {
    fn default() -> Self {
        Self {
            db_url: "sqlite://jajanin.sqlite?mode=rwc".to_string(),
            site: None,
            thread: Default::default(),
            network: Default::default(),
            paylabs: Default::default(),
            donation: Default::default(),
            alert: Default::default(),
        }
    }
}

impl Setting {
    /// site url, falls back to the bind address
    pub fn site(&self) -> String {
        self.site
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.network.host, self.network.port))
    }

    /// read config from file and env
    pub fn read<P: AsRef<Path>>(file: P, env_prefix: Option<String>) -> Result<Self> {
        let file = file
            .as_ref()
            .to_str()
            .ok_or_else(|| Error::Message("invalid config path".to_owned()))?;
        let mut config = Config::builder().add_source(File::with_name(file));
        if let Some(prefix) = env_prefix {
            config = config.add_source(Self::env_source(&prefix));
        }

        let config = config.build()?;
        let mut setting: Setting = config.try_deserialize()?;
        setting.validate()?;
        Ok(setting)
    }

    fn env_source(prefix: &str) -> Environment {
        Environment::with_prefix(prefix)
            .try_parsing(true)
            .prefix_separator("_")
            .separator("__")
    }

    /// read config from env
    pub fn from_env(env_prefix: String) -> Result<Self> {
        let config = Config::builder()
            .add_source(Self::env_source(&env_prefix))
            .build()?;
        let mut setting: Setting = config.try_deserialize()?;
        setting.validate()?;
        Ok(setting)
    }

    /// config from str
    pub fn from_str(s: &str, format: FileFormat) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(s, format))
            .build()?;
        let mut setting: Setting = config.try_deserialize()?;
        setting.validate()?;
        Ok(setting)
    }

    fn validate(&mut self) -> Result<()> {
        if self.donation.min_amount < 1 {
            return Err(Error::Str("donation.min_amount must be positive"));
        }
        if self.donation.ewallet_min_amount < self.donation.min_amount {
            self.donation.ewallet_min_amount = self.donation.min_amount;
        }
        if !self.paylabs.webhook_path.starts_with('/') {
            self.paylabs.webhook_path = format!("/{}", self.paylabs.webhook_path);
        }
        if self.alert.heartbeat == 0 {
            return Err(Error::Str("alert.heartbeat must be positive"));
        }
        Ok(())
    }
}
