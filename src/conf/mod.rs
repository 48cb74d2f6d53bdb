//! Provides client configuration options.
//!
//! Configuration options can be parsed from config files in TOML format and
//! overridden with `MEDEA_CLIENT_`-prefixed environment variables.

pub mod features;
pub mod log;
pub mod reconnect;
pub mod rpc;
pub mod session;
pub mod sfu;

use std::env;

use config::{Config, Environment, File};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use tracerr::Traced;

#[doc(inline)]
pub use self::{
    features::{Features, FeaturesError},
    log::Log,
    reconnect::Reconnect,
    rpc::Rpc,
    session::Session,
    sfu::Sfu,
};

/// CLI argument that is responsible for holding application configuration
/// file path.
static APP_CONF_PATH_CMD_ARG_NAME: &str = "--conf";

/// Environment variable that is responsible for holding application
/// configuration file path.
static APP_CONF_PATH_ENV_VAR_NAME: &str = "MEDEA_CLIENT_CONF";

/// Prefix of environment variables overriding configuration values.
static APP_CONF_ENV_PREFIX: &str = "MEDEA_CLIENT";

/// Holds client configuration options.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Conf {
    /// SFU control channel settings.
    pub rpc: Rpc,

    /// P2P [`Session`] settings.
    ///
    /// [`Session`]: crate::peer::Session
    pub session: Session,

    /// SFU transport settings.
    pub sfu: Sfu,

    /// Glitch-free reconnect settings.
    pub reconnect: Reconnect,

    /// Behaviour toggles.
    pub features: Features,

    /// Logging settings.
    pub log: Log,
}

/// Errors which may occur while loading [`Conf`].
#[derive(Debug, Display, From)]
pub enum ConfError {
    /// Failed to read or deserialize configuration sources.
    #[display(fmt = "Failed to load configuration: {}", _0)]
    Load(config::ConfigError),

    /// Loaded [`Features`] combination is not valid.
    #[display(fmt = "Invalid features: {}", _0)]
    Features(FeaturesError),
}

impl Conf {
    /// Creates new [`Conf`] and applies values from such sources
    /// and in that order:
    /// - default values;
    /// - configuration file, the name of which is given as a command line
    ///   parameter or environment variable;
    /// - environment variables.
    ///
    /// # Errors
    ///
    /// Errors if parsing fails or loaded [`Features`] are contradictory.
    pub fn parse() -> Result<Self, Traced<ConfError>> {
        let mut cfg = Config::new();

        if let Some(path) = get_conf_file_name(
            env::var(APP_CONF_PATH_ENV_VAR_NAME),
            env::args(),
        ) {
            cfg.merge(File::with_name(&path))
                .map_err(tracerr::from_and_wrap!())?;
        }

        cfg.merge(
            Environment::with_prefix(APP_CONF_ENV_PREFIX).separator("__"),
        )
        .map_err(tracerr::from_and_wrap!())?;

        let conf: Self = cfg.try_into().map_err(tracerr::from_and_wrap!())?;
        conf.features
            .validate()
            .map_err(tracerr::from_and_wrap!())?;
        Ok(conf)
    }
}

/// Returns the path to the configuration file, if it's set via CLI `args`
/// or environment variable.
fn get_conf_file_name<T>(
    env_var: Result<String, env::VarError>,
    cmd_args: T,
) -> Option<String>
where
    T: IntoIterator<Item = String>,
{
    // First, check CLI arguments as they have the highest priority.
    let mut args = cmd_args
        .into_iter()
        .skip_while(|x| x != APP_CONF_PATH_CMD_ARG_NAME);
    if args.next().is_some() {
        return args.next().filter(|v| !v.is_empty());
    }

    // Then check env var.
    env_var.ok().filter(|v| !v.is_empty())
}
