use std::io::{BufRead, Write};

use log::info;
use uuid::Uuid;

use crate::store::{CredentialRecord, CredentialStore, Credentials};
use crate::{Error, Result};

pub const SECURITY_CODE_LEN: usize = 16;

const MISSING_CODE: &str =
    "Please provide the 'Security Code' on the back of your Tradfri gateway using the -K flag.";

/// The code printed on the back of a gateway. Only ever used once, to obtain
/// a pre-shared key.
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityCode(String);

impl SecurityCode {
    pub fn new<T: AsRef<str>>(code: T) -> Result<Self> {
        let code = code.as_ref().trim();
        let length = code.chars().count();
        if length != SECURITY_CODE_LEN {
            return Err(Error::InvalidSecurityCode { length });
        }
        Ok(SecurityCode(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecurityCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecurityCode(****)")
    }
}

/// Exchanges a security code for a long-lived pre-shared key.
#[allow(async_fn_in_trait)]
pub trait KeyExchange {
    async fn generate_psk(&self, identity: &str, code: &SecurityCode) -> Result<String>;
}

/// Where the credentials for a host come from, decided before any network
/// traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Stored(CredentialRecord),
    Flag(String),
    Prompt,
}

/// Credentials ready for use, or a validated code that still has to be paired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pairing {
    Known(CredentialRecord),
    Unpaired(SecurityCode),
}

impl CredentialSource {
    /// A stored record always wins over a code given on the command line.
    pub fn select(credentials: &Credentials, host: &str, flag: Option<String>) -> Self {
        match (credentials.get(host), flag) {
            (Some(record), _) => CredentialSource::Stored(record.clone()),
            (None, Some(code)) => CredentialSource::Flag(code),
            (None, None) => CredentialSource::Prompt,
        }
    }

    /// Reads the code from `input` when prompting. A closed input means no
    /// code was ever given.
    pub fn resolve<R: BufRead, W: Write>(self, input: &mut R, output: &mut W) -> Result<Pairing> {
        match self {
            CredentialSource::Stored(record) => Ok(Pairing::Known(record)),
            CredentialSource::Flag(code) => Ok(Pairing::Unpaired(SecurityCode::new(code)?)),
            CredentialSource::Prompt => {
                write!(
                    output,
                    "Please provide the 'Security Code' on the back of your Tradfri gateway: "
                )?;
                output.flush()?;
                let mut line = String::new();
                if input.read_line(&mut line)? == 0 {
                    return Err(Error::Config(MISSING_CODE.into()));
                }
                Ok(Pairing::Unpaired(SecurityCode::new(line)?))
            }
        }
    }
}

/// A fresh client identity: 128 random bits as 32 hex characters.
pub fn generate_identity() -> String {
    Uuid::new_v4().simple().to_string()
}

pub async fn pair<K: KeyExchange>(
    store: &CredentialStore,
    host: &str,
    code: &SecurityCode,
    exchange: &K,
) -> Result<CredentialRecord> {
    let identity = generate_identity();
    let key = exchange.generate_psk(&identity, code).await?;
    info!("Generated PSK: {}", key);

    let record = CredentialRecord { identity, key };
    store.insert(host, record.clone())?;
    Ok(record)
}

/// Returns the credentials for `host`, pairing first if none are stored yet.
pub async fn bootstrap<K: KeyExchange>(
    store: &CredentialStore,
    host: &str,
    pairing: Pairing,
    exchange: &K,
) -> Result<CredentialRecord> {
    match pairing {
        Pairing::Known(record) => {
            info!("using stored identity {} for {}", record.identity, host);
            Ok(record)
        }
        Pairing::Unpaired(code) => {
            info!("pairing with {}", host);
            pair(store, host, &code, exchange).await
        }
    }
}
