//! Node and backend settings, loaded from YAML.
//!
//! ```yaml
//! host: 127.0.0.1
//! port: 4943
//! key_file: alice.key
//! canister_id: be2us-64aaa-aaaaa-qaabq-cai
//! ledger_id: ryjl3-tyaaa-aaaaa-aaaba-cai
//! canister_account: 8b2f...
//! ```
//!
//! Only the identifiers and the key file are required.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    adjudicator::DEFAULT_EVENT_POLL_INTERVAL,
    channel::Amount,
    connector::Connector,
    encoding::{self, types::AccountId},
    funder::{DEFAULT_FUNDING_TIMEOUT, DEFAULT_POLL_INTERVAL},
    ledger::DEFAULT_FEE,
    sig::{self, Signer},
    wire::dfx::{DfxCanister, DfxCli, DfxLedger},
    Adjudicator, Funder,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid canister_account: {0}")]
    CanisterAccount(#[source] encoding::Error),
    #[error("could not load key: {0}")]
    Key(#[from] sig::Error),
    #[error("{0} must not be zero")]
    Zero(&'static str),
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    4943
}

fn default_fee() -> Amount {
    DEFAULT_FEE
}

fn default_funding_timeout_secs() -> u64 {
    DEFAULT_FUNDING_TIMEOUT.as_secs()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_event_poll_interval_ms() -> u64 {
    DEFAULT_EVENT_POLL_INTERVAL.as_millis() as u64
}

fn default_dfx_binary() -> PathBuf {
    "dfx".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// File holding the hex encoded ed25519 seed of this participant.
    pub key_file: PathBuf,
    pub canister_id: String,
    pub ledger_id: String,
    /// Hex encoded ledger account of the canister, target of funding
    /// transfers.
    pub canister_account: String,
    #[serde(default = "default_fee")]
    pub transfer_fee: Amount,
    #[serde(default = "default_funding_timeout_secs")]
    pub funding_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_event_poll_interval_ms")]
    pub event_poll_interval_ms: u64,
    #[serde(default = "default_dfx_binary")]
    pub dfx_binary: PathBuf,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let mut cfg = Self::from_yaml_str(&content)?;
        // Relative key files are resolved against the config's directory.
        if cfg.key_file.is_relative() {
            if let Some(dir) = path.parent() {
                cfg.key_file = dir.join(&cfg.key_file);
            }
        }
        Ok(cfg)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.canister_account()?;
        if self.funding_timeout_secs == 0 {
            return Err(ConfigError::Zero("funding_timeout_secs"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("poll_interval_ms"));
        }
        if self.event_poll_interval_ms == 0 {
            return Err(ConfigError::Zero("event_poll_interval_ms"));
        }
        Ok(())
    }

    pub fn node_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn canister_account(&self) -> Result<AccountId, ConfigError> {
        AccountId::from_hex(&self.canister_account).map_err(ConfigError::CanisterAccount)
    }

    pub fn funding_timeout(&self) -> Duration {
        Duration::from_secs(self.funding_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }

    pub fn load_signer(&self) -> Result<Signer, ConfigError> {
        Ok(Signer::from_key_file(&self.key_file)?)
    }

    pub fn dfx(&self) -> DfxCli {
        DfxCli::new(&self.dfx_binary, self.node_url())
    }

    /// Connection to the configured canister and ledger through the `dfx`
    /// command line.
    pub fn connect_dfx(
        &self,
    ) -> Result<Arc<Connector<DfxCanister<DfxCli>, DfxLedger<DfxCli>>>, ConfigError> {
        let signer = self.load_signer()?;
        info!(
            url = %self.node_url(),
            canister = %self.canister_id,
            address = %signer.address().to_hex(),
            "connecting"
        );
        let conn = Connector::new(
            DfxCanister::new(self.dfx(), &self.canister_id),
            DfxLedger::new(self.dfx(), &self.ledger_id),
            signer,
            self.canister_account()?,
        )
        .with_fee(self.transfer_fee);
        Ok(Arc::new(conn))
    }

    /// Funder using the configured timeout and poll interval.
    pub fn funder<C, L>(&self, conn: Arc<Connector<C, L>>) -> Funder<C, L>
    where
        C: crate::canister::Canister,
        L: crate::ledger::Ledger,
    {
        Funder::new(conn)
            .with_timeout(self.funding_timeout())
            .with_poll_interval(self.poll_interval())
    }

    pub fn adjudicator<C, L>(&self, conn: Arc<Connector<C, L>>) -> Adjudicator<C, L>
    where
        C: crate::canister::Canister,
        L: crate::ledger::Ledger,
    {
        Adjudicator::new(conn).with_poll_interval(self.event_poll_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
key_file: alice.key
canister_id: be2us-64aaa-aaaaa-qaabq-cai
ledger_id: ryjl3-tyaaa-aaaaa-aaaba-cai
canister_account: "0x0101010101010101010101010101010101010101010101010101010101010101"
"#;

    #[test]
    fn defaults_fill_in_everything_but_identifiers() {
        let cfg = Config::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(cfg.node_url(), "http://127.0.0.1:4943");
        assert_eq!(cfg.transfer_fee, DEFAULT_FEE);
        assert_eq!(cfg.funding_timeout(), DEFAULT_FUNDING_TIMEOUT);
        assert_eq!(cfg.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(cfg.event_poll_interval(), DEFAULT_EVENT_POLL_INTERVAL);
        assert_eq!(cfg.dfx_binary, PathBuf::from("dfx"));
        assert_eq!(cfg.canister_account().unwrap(), AccountId([1; 32]));
    }

    #[test]
    fn overrides_are_applied() {
        let yaml = format!("{MINIMAL}host: 10.0.0.2\nport: 8000\ntransfer_fee: 0\nfunding_timeout_secs: 5\n");
        let cfg = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(cfg.node_url(), "http://10.0.0.2:8000");
        assert_eq!(cfg.transfer_fee, 0);
        assert_eq!(cfg.funding_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(matches!(
            Config::from_yaml_str("key_file: a.key\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_yaml_str(&format!("{MINIMAL}colour: blue\n")),
            Err(ConfigError::Parse(_))
        ));
        let short = MINIMAL.replace("0x0101010101", "0x01");
        assert!(matches!(
            Config::from_yaml_str(&short),
            Err(ConfigError::CanisterAccount(_))
        ));
        assert!(matches!(
            Config::from_yaml_str(&format!("{MINIMAL}poll_interval_ms: 0\n")),
            Err(ConfigError::Zero("poll_interval_ms"))
        ));
    }

    #[test]
    fn key_file_is_resolved_next_to_the_config() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("alice.key"), format!("0x{}\n", "07".repeat(32))).unwrap();
        std::fs::write(dir.join("node.yaml"), MINIMAL).unwrap();

        let cfg = Config::from_file(dir.join("node.yaml")).unwrap();
        assert_eq!(cfg.key_file, dir.join("alice.key"));
        let signer = cfg.load_signer().unwrap();
        assert_eq!(signer.address(), Signer::from_seed([7; 32]).address());

        assert!(matches!(
            Config::from_file(dir.join("missing.yaml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
