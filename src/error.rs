use thiserror::Error;

/// Errors surfaced by the HydroLink client and its helpers.
///
/// `InvalidAuth` and `CannotConnect` are both recoverable: the coordinator
/// keeps polling and retries on its next tick.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid HydroLink credentials")]
    InvalidAuth,

    #[error("cannot connect to HydroLink: {0}")]
    CannotConnect(String),

    #[error("unexpected HydroLink payload: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::InvalidAuth)
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::CannotConnect(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Decode(err.to_string())
        } else {
            Error::CannotConnect(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<rumqttc::ClientError> for Error {
    fn from(err: rumqttc::ClientError) -> Self {
        Error::Mqtt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
