use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors raised while decoding or validating a [`Configuration`].
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The configuration object could not be decoded.
    #[error("configuration could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    /// A server address could not be parsed.
    #[error("invalid server address '{address}': {reason}")]
    InvalidServer {
        /// The offending address.
        address: String,

        /// Why the address was rejected.
        reason: String,
    },

    /// The `user_password` strategy is missing a username or password.
    #[error("username and password are required for 'user_password' strategy")]
    MissingUserPassword,

    /// The `token` strategy is missing a token.
    #[error("token is required for 'token' strategy")]
    MissingToken,

    /// No server address was given.
    #[error("at least one server address is required")]
    NoServers,

    /// The auth strategy name is not recognised.
    #[error("unknown auth strategy '{0}'")]
    UnknownStrategy(String),
}

/// How the client authenticates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStrategy {
    /// No credentials; TLS verification may be disabled with the `unsafe` flag.
    Unsafe,

    /// Username and password.
    UserPassword,

    /// Bearer token.
    Token,
}

impl FromStr for AuthStrategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsafe" => Ok(Self::Unsafe),
            "user_password" => Ok(Self::UserPassword),
            "token" => Ok(Self::Token),
            other => Err(ConfigurationError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Authentication settings.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Auth {
    /// The strategy; an absent or empty strategy behaves like `unsafe`.
    #[serde(deserialize_with = "deserialize_strategy")]
    pub strategy: Option<AuthStrategy>,

    /// Skip TLS certificate verification (honoured by `unsafe` and absent strategies only).
    #[serde(rename = "unsafe")]
    pub insecure: bool,

    /// Username for `user_password`.
    pub username: String,

    /// Password for `user_password`.
    pub password: String,

    /// Token for `token`.
    pub token: String,
}

impl Debug for Auth {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Auth")
            .field("strategy", &self.strategy)
            .field("insecure", &self.insecure)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

fn deserialize_strategy<'de, D>(deserializer: D) -> Result<Option<AuthStrategy>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)?.as_deref() {
        None | Some("") => Ok(None),
        Some(name) => name.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Client configuration as supplied by the hosting script environment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Configuration {
    /// Server addresses, tried in order.
    pub servers: Vec<String>,

    /// Authentication settings.
    pub auth: Auth,
}

/// Credentials derived from a validated [`Configuration`].
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// No credentials.
    None,

    /// Username and password.
    UserPassword {
        /// The username.
        username: String,

        /// The password.
        password: String,
    },

    /// Bearer token.
    Token(String),
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::None => write!(f, "None"),
            Self::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Token(_) => write!(f, "Token(..)"),
        }
    }
}

/// Connection settings a transport needs to open a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Server addresses, in order.
    pub servers: Vec<String>,

    /// Credentials to present.
    pub credentials: Credentials,

    /// Whether to skip TLS certificate verification.
    pub insecure_tls: bool,
}

impl Configuration {
    /// Decodes a configuration from a host value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Decode` if the value does not have the expected shape.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Decodes a configuration from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::Decode` if the text is not a valid configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Validates the configuration and derives connection settings.
    ///
    /// Runs before any connection attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if no server is given or the auth strategy is missing a
    /// required field.
    pub fn validate(&self) -> Result<ConnectionSettings, ConfigurationError> {
        if self.servers.is_empty() {
            return Err(ConfigurationError::NoServers);
        }

        let auth = &self.auth;
        let (credentials, insecure_tls) = match auth.strategy {
            None | Some(AuthStrategy::Unsafe) => (Credentials::None, auth.insecure),
            Some(AuthStrategy::UserPassword) => {
                if auth.username.is_empty() || auth.password.is_empty() {
                    return Err(ConfigurationError::MissingUserPassword);
                }
                (
                    Credentials::UserPassword {
                        username: auth.username.clone(),
                        password: auth.password.clone(),
                    },
                    false,
                )
            }
            Some(AuthStrategy::Token) => {
                if auth.token.is_empty() {
                    return Err(ConfigurationError::MissingToken);
                }
                (Credentials::Token(auth.token.clone()), false)
            }
        };

        Ok(ConnectionSettings {
            servers: self.servers.clone(),
            credentials,
            insecure_tls,
        })
    }
}
