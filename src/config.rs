use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Orbit, Rocket,
};
use serde::Deserialize;
use thiserror::Error;

use crate::ledger::{EthRpcLedger, LedgerClient, ReceiptPolling};
use crate::model::Address;
use crate::sync::{Engine, EngineSettings};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    contract_address: Address,
    rpc_url: String,
    #[serde(default)]
    account: Option<Address>,
    #[serde(default = "default_status_poll_secs")]
    status_poll_secs: u64,
    #[serde(default = "default_tally_poll_secs")]
    tally_poll_secs: u64,
    #[serde(default = "default_voter_poll_secs")]
    voter_poll_secs: u64,
    #[serde(default = "default_history_poll_secs")]
    history_poll_secs: u64,
    #[serde(default = "default_receipt_poll_millis")]
    receipt_poll_millis: u64,
    #[serde(default = "default_receipt_timeout_secs")]
    receipt_timeout_secs: u64,
    #[serde(default)]
    auto_finalize: bool,
}

fn default_status_poll_secs() -> u64 {
    10
}

fn default_tally_poll_secs() -> u64 {
    5
}

fn default_voter_poll_secs() -> u64 {
    30
}

fn default_history_poll_secs() -> u64 {
    30
}

fn default_receipt_poll_millis() -> u64 {
    2000
}

fn default_receipt_timeout_secs() -> u64 {
    300
}

#[derive(Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("`contract_address` is not set")]
    MissingContract,
    #[error("`rpc_url` is not set")]
    MissingRpcUrl,
    #[error("`rpc_url` is not a valid URL: {0}")]
    InvalidRpcUrl(String),
    #[error("`{0}` must be greater than zero")]
    ZeroInterval(&'static str),
}

impl Config {
    /// Address of the election contract.
    /// Configured via `CONTRACT_ADDRESS`.
    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    /// JSON-RPC endpoint of the ledger. May embed a provider API key.
    /// Configured via `RPC_URL`.
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// The wallet we send writes from and annotate the ballot of.
    /// Configured via `ACCOUNT`.
    pub fn account(&self) -> Option<Address> {
        self.account
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }

    pub fn tally_interval(&self) -> Duration {
        Duration::from_secs(self.tally_poll_secs)
    }

    pub fn voter_interval(&self) -> Duration {
        Duration::from_secs(self.voter_poll_secs)
    }

    pub fn history_interval(&self) -> Duration {
        Duration::from_secs(self.history_poll_secs)
    }

    /// How writes are followed until they are mined.
    pub fn receipt_polling(&self) -> ReceiptPolling {
        ReceiptPolling {
            interval: Duration::from_millis(self.receipt_poll_millis),
            timeout: Duration::from_secs(self.receipt_timeout_secs),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            status_interval: self.status_interval(),
            tally_interval: self.tally_interval(),
            voter_interval: self.voter_interval(),
            history_interval: self.history_interval(),
            auto_finalize: self.auto_finalize,
            account: self.account,
        }
    }

    /// Refuse to run against an undefined target.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contract_address.is_zero() {
            return Err(ConfigError::MissingContract);
        }
        if self.rpc_url.trim().is_empty() {
            return Err(ConfigError::MissingRpcUrl);
        }
        reqwest::Url::parse(&self.rpc_url).map_err(|e| ConfigError::InvalidRpcUrl(e.to_string()))?;
        for (key, value) in [
            ("status_poll_secs", self.status_poll_secs),
            ("tally_poll_secs", self.tally_poll_secs),
            ("voter_poll_secs", self.voter_poll_secs),
            ("history_poll_secs", self.history_poll_secs),
            ("receipt_poll_millis", self.receipt_poll_millis),
            ("receipt_timeout_secs", self.receipt_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(key));
            }
        }
        Ok(())
    }
}

/// A fairing that loads and validates the application config and puts it in
/// managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if let Err(e) = config.validate() {
            error!("Invalid application config: {e}");
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// A fairing that builds the JSON-RPC ledger client from the config and
/// places it into managed state as an `Arc<dyn LedgerClient>`.
pub struct LedgerFairing;

#[rocket::async_trait]
impl Fairing for LedgerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ledger",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.state::<Config>() {
            Some(config) => config.clone(),
            None => {
                error!("Ledger fairing needs the config fairing attached first");
                return Err(rocket);
            }
        };
        let ledger = match EthRpcLedger::new(
            config.rpc_url(),
            config.contract_address(),
            config.account(),
            config.receipt_polling(),
        ) {
            Ok(ledger) => ledger,
            Err(e) => {
                error!("Failed to set up ledger client: {e}");
                return Err(rocket);
            }
        };
        info!("Using election contract {:?}", config.contract_address());

        let ledger: Arc<dyn LedgerClient> = Arc::new(ledger);
        rocket = rocket.manage(ledger);
        Ok(rocket)
    }
}

/// A fairing that starts the sync engine on ignition and disposes it on
/// shutdown. The engine becomes managed state.
pub struct EngineFairing;

#[rocket::async_trait]
impl Fairing for EngineFairing {
    fn info(&self) -> Info {
        Info {
            name: "Election sync",
            kind: Kind::Ignite | Kind::Shutdown,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        let (config, ledger) = match (
            rocket.state::<Config>(),
            rocket.state::<Arc<dyn LedgerClient>>(),
        ) {
            (Some(config), Some(ledger)) => (config.clone(), ledger.clone()),
            _ => {
                error!("Election sync needs the config and ledger fairings attached first");
                return Err(rocket);
            }
        };
        let engine = Engine::new(ledger, config.engine_settings());
        engine.init();

        rocket = rocket.manage(engine);
        Ok(rocket)
    }

    async fn on_shutdown(&self, rocket: &Rocket<Orbit>) {
        if let Some(engine) = rocket.state::<Engine>() {
            engine.dispose();
        }
    }
}
