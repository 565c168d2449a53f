//! CoAP over DTLS, the way the gateway expects to be spoken to.
//!
//! The DTLS session is a blocking OpenSSL stream over a connected UDP socket,
//! so every exchange is pushed onto smol's blocking pool. A mutex keeps
//! exactly one request in flight.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType, ResponseType};
use log::{debug, info};
use openssl::error::ErrorStack;
use openssl::ssl::{SslConnector, SslMethod, SslStream, SslVerifyMode};
use serde::Deserialize;
use serde_json::json;

use crate::command::{Command, Method, Transport};
use crate::device::ROOT_GATEWAY;
use crate::pairing::{KeyExchange, SecurityCode};
use crate::{Error, Result};

pub const PORT: u16 = 5684;

const CIPHER: &str = "PSK-AES128-CCM8";
const PAIRING_IDENTITY: &str = "Client_identity";
const ATTR_AUTH: &str = "9063";
const ATTR_IDENTITY: &str = "9090";
const MAX_DATAGRAM: usize = 4096;

/// A connected UDP socket seen as a byte stream, one datagram per call.
#[derive(Debug)]
struct Datagrams(UdpSocket);

impl Read for Datagrams {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.recv(buf)
    }
}

impl Write for Datagrams {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn malformed<E: std::fmt::Debug>(e: E) -> Error {
    Error::Coap(format!("{:?}", e))
}

/// A timed out or refused datagram means the gateway is gone, not a local fault.
fn unanswered(e: io::Error) -> Error {
    Error::Connection(format!("gateway did not answer: {}", e))
}

fn request_type(method: Method) -> RequestType {
    match method {
        Method::Get => RequestType::Get,
        Method::Post => RequestType::Post,
        Method::Put => RequestType::Put,
    }
}

pub struct CoapClient {
    stream: Arc<Mutex<SslStream<Datagrams>>>,
    message_id: AtomicU16,
}

impl CoapClient {
    pub async fn connect(host: &str, identity: &str, key: &[u8], timeout: Duration) -> Result<Self> {
        let host = host.to_string();
        let identity = identity.as_bytes().to_vec();
        let key = key.to_vec();
        let stream = smol::unblock(move || handshake(&host, identity, key, timeout)).await?;
        Ok(CoapClient {
            stream: Arc::new(Mutex::new(stream)),
            message_id: AtomicU16::new(rand::random()),
        })
    }
}

fn handshake(
    host: &str,
    identity: Vec<u8>,
    key: Vec<u8>,
    timeout: Duration,
) -> Result<SslStream<Datagrams>> {
    let addr = (host, PORT)
        .to_socket_addrs()
        .map_err(|e| Error::Connection(format!("cannot resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| Error::Connection(format!("no address for {}", host)))?;
    let local: SocketAddr = if addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = UdpSocket::bind(local)?;
    socket
        .connect(addr)
        .map_err(|e| Error::Connection(format!("{}: {}", addr, e)))?;
    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))?;

    let mut builder = SslConnector::builder(SslMethod::dtls())?;
    builder.set_cipher_list(CIPHER)?;
    builder.set_verify(SslVerifyMode::NONE);
    builder.set_psk_client_callback(move |_ssl, _hint, identity_out, psk_out| {
        if identity.len() >= identity_out.len() || key.len() > psk_out.len() {
            return Err(ErrorStack::get());
        }
        identity_out[..identity.len()].copy_from_slice(&identity);
        identity_out[identity.len()] = 0;
        psk_out[..key.len()].copy_from_slice(&key);
        Ok(key.len())
    });

    let mut config = builder.build().configure()?;
    config.set_verify_hostname(false);
    config.set_use_server_name_indication(false);

    debug!("dtls handshake with {}", addr);
    config
        .connect(host, Datagrams(socket))
        .map_err(|e| Error::Connection(format!("dtls handshake with {} failed: {}", addr, e)))
}

fn acknowledge<S: Write>(stream: &mut S, message_id: u16) -> Result<()> {
    let mut ack = Packet::new();
    ack.header.set_type(MessageType::Acknowledgement);
    ack.header.code = MessageClass::Empty;
    ack.header.message_id = message_id;
    stream
        .write_all(&ack.to_bytes().map_err(malformed)?)
        .map_err(unanswered)
}

/// Sends one confirmable request and waits for the response carrying its
/// token. An empty ACK means the answer follows as a separate message.
fn exchange<S: Read + Write>(stream: &mut S, message_id: u16, command: &Command) -> Result<Vec<u8>> {
    let token: [u8; 4] = rand::random();

    let mut request = Packet::new();
    request.header.set_type(MessageType::Confirmable);
    request.header.code = MessageClass::Request(request_type(command.method));
    request.header.message_id = message_id;
    request.set_token(token.to_vec());
    for segment in &command.path {
        request.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
    }
    if let Some(body) = &command.body {
        request.payload = serde_json::to_vec(body)?;
    }
    stream
        .write_all(&request.to_bytes().map_err(malformed)?)
        .map_err(unanswered)?;

    let mut buffer = vec![0; MAX_DATAGRAM];
    loop {
        let len = stream.read(&mut buffer).map_err(unanswered)?;
        if len == 0 {
            return Err(Error::Connection("gateway closed the dtls session".into()));
        }
        let response = Packet::from_bytes(&buffer[..len]).map_err(malformed)?;
        if response.header.get_type() == MessageType::Confirmable {
            acknowledge(stream, response.header.message_id)?;
        }
        if response.header.code == MessageClass::Empty || response.get_token() != &token[..] {
            continue;
        }

        return match response.header.code {
            MessageClass::Response(
                ResponseType::Created
                | ResponseType::Deleted
                | ResponseType::Valid
                | ResponseType::Changed
                | ResponseType::Content,
            ) => Ok(response.payload),
            code => Err(Error::Command {
                method: command.method,
                path: command.path_string(),
                code: format!("{:?}", code),
            }),
        };
    }
}

impl Transport for CoapClient {
    async fn request(&self, command: &Command) -> Result<Vec<u8>> {
        let stream = Arc::clone(&self.stream);
        let message_id = self.message_id.fetch_add(1, Ordering::Relaxed);
        let command = command.clone();
        smol::unblock(move || {
            let mut stream = stream
                .lock()
                .map_err(|_| Error::Connection("dtls session lock poisoned".into()))?;
            exchange(&mut *stream, message_id, &command)
        })
        .await
    }
}

#[derive(Deserialize)]
struct PskResponse {
    #[serde(rename = "9091")]
    key: String,
}

/// Obtains a pre-shared key by authenticating with the security code itself.
#[derive(Debug, Clone)]
pub struct GatewayPairing {
    host: String,
    timeout: Duration,
}

impl GatewayPairing {
    pub fn new<T: Into<String>>(host: T, timeout: Duration) -> Self {
        GatewayPairing {
            host: host.into(),
            timeout,
        }
    }
}

impl KeyExchange for GatewayPairing {
    async fn generate_psk(&self, identity: &str, code: &SecurityCode) -> Result<String> {
        let client = CoapClient::connect(
            &self.host,
            PAIRING_IDENTITY,
            code.as_str().as_bytes(),
            self.timeout,
        )
        .await?;
        info!("registering identity {} with {}", identity, self.host);
        let payload = client
            .request(&Command::post(
                [ROOT_GATEWAY, ATTR_AUTH],
                json!({ ATTR_IDENTITY: identity }),
            ))
            .await?;
        let response: PskResponse = serde_json::from_slice(&payload)?;
        Ok(response.key)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Stands in for the DTLS stream: remembers what was written and hands out
    /// queued replies, echoing the token of the last request it saw.
    #[derive(Default)]
    struct ScriptedStream {
        written: Vec<Packet>,
        replies: VecDeque<Packet>,
    }

    impl ScriptedStream {
        fn reply(mut self, packet: Packet) -> Self {
            self.replies.push_back(packet);
            self
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.push(Packet::from_bytes(buf).unwrap());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut packet = self
                .replies
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::WouldBlock))?;
            if packet.header.code != MessageClass::Empty {
                packet.set_token(self.written[0].get_token().to_vec());
            }
            let bytes = packet.to_bytes().unwrap();
            buf[..bytes.len()].copy_from_slice(&bytes);
            Ok(bytes.len())
        }
    }

    fn response(kind: MessageType, code: ResponseType, payload: &[u8]) -> Packet {
        let mut packet = Packet::new();
        packet.header.set_type(kind);
        packet.header.code = MessageClass::Response(code);
        packet.header.message_id = 900;
        packet.payload = payload.to_vec();
        packet
    }

    #[test]
    fn methods_map_to_coap_codes() {
        assert_eq!(request_type(Method::Get), RequestType::Get);
        assert_eq!(request_type(Method::Post), RequestType::Post);
        assert_eq!(request_type(Method::Put), RequestType::Put);
    }

    #[test]
    fn psk_response_reads_key_attribute() {
        let response: PskResponse =
            serde_json::from_str(r#"{"9091": "Gpc7cH0kb2ArmR0i", "9029": "1.3.0014"}"#).unwrap();
        assert_eq!(response.key, "Gpc7cH0kb2ArmR0i");
    }

    #[test]
    fn silent_gateway_is_connection_error() {
        let mut stream = ScriptedStream::default();

        let result = exchange(&mut stream, 7, &Command::get(["15001"]));

        assert!(matches!(result, Err(Error::Connection(_))));
        assert_eq!(stream.written.len(), 1);
    }

    #[test]
    fn piggybacked_response_returns_payload() {
        let mut stream = ScriptedStream::default().reply(response(
            MessageType::Acknowledgement,
            ResponseType::Content,
            b"[65537]",
        ));

        let payload = exchange(&mut stream, 7, &Command::get(["15001"])).unwrap();

        assert_eq!(payload, b"[65537]");
        let request = &stream.written[0];
        assert_eq!(request.header.message_id, 7);
        assert_eq!(request.header.get_type(), MessageType::Confirmable);
    }

    #[test]
    fn separate_response_is_acknowledged() {
        let mut empty_ack = Packet::new();
        empty_ack.header.set_type(MessageType::Acknowledgement);
        empty_ack.header.code = MessageClass::Empty;
        let mut stream = ScriptedStream::default().reply(empty_ack).reply(response(
            MessageType::Confirmable,
            ResponseType::Changed,
            b"",
        ));

        let payload = exchange(&mut stream, 7, &Command::put(["15001", "65537"], json!({}))).unwrap();

        assert!(payload.is_empty());
        assert_eq!(stream.written.len(), 2);
        assert_eq!(stream.written[1].header.get_type(), MessageType::Acknowledgement);
        assert_eq!(stream.written[1].header.message_id, 900);
    }

    #[test]
    fn error_code_names_the_command() {
        let mut stream = ScriptedStream::default().reply(response(
            MessageType::Acknowledgement,
            ResponseType::NotFound,
            b"",
        ));

        let result = exchange(&mut stream, 7, &Command::get(["15001", "1"]));

        assert!(matches!(
            result,
            Err(Error::Command { method: Method::Get, ref path, .. }) if path == "15001/1"
        ));
    }

    #[test]
    fn unresolvable_host_is_connection_error() {
        let result = handshake(
            "gateway.invalid",
            b"id".to_vec(),
            b"key".to_vec(),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
