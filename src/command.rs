use std::fmt::{self, Display};

use serde_json::Value;

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        })
    }
}

/// A single request to the gateway, built up front and dispatched later
/// through a [`Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub method: Method,
    pub path: Vec<String>,
    pub body: Option<Value>,
}

impl Command {
    pub fn get<P, S>(path: P) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command {
            method: Method::Get,
            path: path.into_iter().map(Into::into).collect(),
            body: None,
        }
    }

    pub fn put<P, S>(path: P, body: Value) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command {
            method: Method::Put,
            path: path.into_iter().map(Into::into).collect(),
            body: Some(body),
        }
    }

    pub fn post<P, S>(path: P, body: Value) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Command {
            method: Method::Post,
            path: path.into_iter().map(Into::into).collect(),
            body: Some(body),
        }
    }

    pub fn path_string(&self) -> String {
        self.path.join("/")
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path_string())?;
        if let Some(body) = &self.body {
            write!(f, " {}", body)?;
        }
        Ok(())
    }
}

/// Carries commands to the gateway and hands back the raw response payload.
///
/// Every call is one request and one response. Implementations do not retry.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn request(&self, command: &Command) -> Result<Vec<u8>>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use serde_json::Value;

    use super::{Command, Method, Transport};
    use crate::{Error, Result};

    /// Records every command and answers GETs from a canned path table.
    #[derive(Default)]
    pub struct RecordingTransport {
        responses: HashMap<String, Vec<u8>>,
        sent: RefCell<Vec<Command>>,
        fail_after: Option<usize>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, path: &str, body: Value) -> Self {
            self.responses
                .insert(path.to_string(), serde_json::to_vec(&body).unwrap());
            self
        }

        pub fn respond_raw(mut self, path: &str, body: &str) -> Self {
            self.responses.insert(path.to_string(), body.as_bytes().to_vec());
            self
        }

        /// Reject every command after the first `count` have succeeded.
        pub fn fail_after(mut self, count: usize) -> Self {
            self.fail_after = Some(count);
            self
        }

        pub fn sent(&self) -> Vec<Command> {
            self.sent.borrow().clone()
        }
    }

    impl Transport for RecordingTransport {
        async fn request(&self, command: &Command) -> Result<Vec<u8>> {
            let mut sent = self.sent.borrow_mut();
            if self.fail_after.map_or(false, |count| sent.len() >= count) {
                return Err(Error::Command {
                    method: command.method,
                    path: command.path_string(),
                    code: "InternalServerError".into(),
                });
            }
            sent.push(command.clone());
            match command.method {
                Method::Get => self
                    .responses
                    .get(&command.path_string())
                    .cloned()
                    .ok_or_else(|| Error::Command {
                        method: command.method,
                        path: command.path_string(),
                        code: "NotFound".into(),
                    }),
                _ => Ok(Vec::new()),
            }
        }
    }
}
