use thiserror::Error;

pub mod coap;
pub mod command;
pub mod device;
pub mod effects;
pub mod pairing;
pub mod session;
pub mod store;

pub use command::{Command, Method, Transport};
pub use device::{Device, GatewayInfo, Group, Light, Mood, SmartTask, Xy};
pub use effects::{Effect, Effects, Timings};
pub use pairing::{CredentialSource, KeyExchange, Pairing, SecurityCode};
pub use session::{Session, Snapshot};
pub use store::{CredentialRecord, CredentialStore, Credentials};

#[derive(Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),
    #[error("'Security Code' has to be exactly 16 characters long, got {length}")]
    InvalidSecurityCode { length: usize },
    #[error("could not connect to gateway: {0}")]
    Connection(String),
    #[error("{method} {path} failed with response code {code}")]
    Command {
        method: Method,
        path: String,
        code: String,
    },
    #[error("effect {effect} needs at least {required} lights, found {found}")]
    TooFewLights {
        effect: &'static str,
        required: usize,
        found: usize,
    },
    #[error("light order refers to light {index} but only {count} lights exist")]
    LightOrder { index: usize, count: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("malformed coap message: {0}")]
    Coap(String),
    #[error("dtls error: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
}

pub type Result<T> = std::result::Result<T, Error>;
