//! Transport and authentication message definitions
//!
//! Only the messages the relay itself speaks are modelled. Everything from
//! the connection protocol (channels, global requests) stays an opaque
//! payload that is forwarded untouched.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{ProtocolError, ProtocolResult, WireReader, WireWriteExt};

/// Message numbers handled by the transport (RFC 4250 §4.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Disconnect = 1,
    Ignore = 2,
    Unimplemented = 3,
    Debug = 4,
    ServiceRequest = 5,
    ServiceAccept = 6,
    KexInit = 20,
    NewKeys = 21,
    KexEcdhInit = 30,
    KexEcdhReply = 31,
    UserauthRequest = 50,
    UserauthFailure = 51,
    UserauthSuccess = 52,
    UserauthBanner = 53,
    UserauthPasswdChangereq = 60,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Disconnect,
            2 => Self::Ignore,
            3 => Self::Unimplemented,
            4 => Self::Debug,
            5 => Self::ServiceRequest,
            6 => Self::ServiceAccept,
            20 => Self::KexInit,
            21 => Self::NewKeys,
            30 => Self::KexEcdhInit,
            31 => Self::KexEcdhReply,
            50 => Self::UserauthRequest,
            51 => Self::UserauthFailure,
            52 => Self::UserauthSuccess,
            53 => Self::UserauthBanner,
            60 => Self::UserauthPasswdChangereq,
            _ => return None,
        })
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Message number ranges (RFC 4250 §4.1.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// 1-19: disconnect, ignore, debug, service requests
    TransportGeneric,
    /// 20-29: KEXINIT, NEWKEYS
    AlgorithmNegotiation,
    /// 30-49: key exchange method specific
    KeyExchangeMethod,
    /// 50-79: user authentication
    UserAuth,
    /// 80-255: connection protocol, reserved and local extensions
    Connection,
}

impl MessageClass {
    pub fn of(message: u8) -> Self {
        match message {
            0..=19 => Self::TransportGeneric,
            20..=29 => Self::AlgorithmNegotiation,
            30..=49 => Self::KeyExchangeMethod,
            50..=79 => Self::UserAuth,
            _ => Self::Connection,
        }
    }

    /// Whether the message belongs to a key exchange
    pub fn is_kex(self) -> bool {
        matches!(self, Self::AlgorithmNegotiation | Self::KeyExchangeMethod)
    }
}

/// Message number of a payload
pub fn message_number(payload: &[u8]) -> ProtocolResult<u8> {
    payload.first().copied().ok_or(ProtocolError::EmptyPayload)
}

fn expect_type(reader: &mut WireReader<'_>, expected: MessageType) -> ProtocolResult<()> {
    let actual = reader.read_u8("message type")?;
    if actual != expected.to_byte() {
        return Err(ProtocolError::InvalidMessageType {
            expected: expected.to_byte(),
            actual,
        });
    }
    Ok(())
}

/// Disconnect reason codes (RFC 4253 §11.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    HostNotAllowedToConnect,
    ProtocolError,
    KeyExchangeFailed,
    Reserved,
    MacError,
    CompressionError,
    ServiceNotAvailable,
    ProtocolVersionNotSupported,
    HostKeyNotVerifiable,
    ConnectionLost,
    ByApplication,
    TooManyConnections,
    AuthCancelledByUser,
    NoMoreAuthMethodsAvailable,
    IllegalUserName,
    Other(u32),
}

impl DisconnectReason {
    pub fn code(self) -> u32 {
        match self {
            Self::HostNotAllowedToConnect => 1,
            Self::ProtocolError => 2,
            Self::KeyExchangeFailed => 3,
            Self::Reserved => 4,
            Self::MacError => 5,
            Self::CompressionError => 6,
            Self::ServiceNotAvailable => 7,
            Self::ProtocolVersionNotSupported => 8,
            Self::HostKeyNotVerifiable => 9,
            Self::ConnectionLost => 10,
            Self::ByApplication => 11,
            Self::TooManyConnections => 12,
            Self::AuthCancelledByUser => 13,
            Self::NoMoreAuthMethodsAvailable => 14,
            Self::IllegalUserName => 15,
            Self::Other(code) => code,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::HostNotAllowedToConnect,
            2 => Self::ProtocolError,
            3 => Self::KeyExchangeFailed,
            4 => Self::Reserved,
            5 => Self::MacError,
            6 => Self::CompressionError,
            7 => Self::ServiceNotAvailable,
            8 => Self::ProtocolVersionNotSupported,
            9 => Self::HostKeyNotVerifiable,
            10 => Self::ConnectionLost,
            11 => Self::ByApplication,
            12 => Self::TooManyConnections,
            13 => Self::AuthCancelledByUser,
            14 => Self::NoMoreAuthMethodsAvailable,
            15 => Self::IllegalUserName,
            other => Self::Other(other),
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(code) => write!(f, "reason {}", code),
            known => write!(f, "{:?} ({})", known, known.code()),
        }
    }
}

/// SSH_MSG_DISCONNECT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: DisconnectReason,
    pub description: String,
    pub language: String,
}

impl Disconnect {
    pub fn new(reason: DisconnectReason, description: impl Into<String>) -> Self {
        Self {
            reason,
            description: description.into(),
            language: String::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Disconnect.to_byte());
        buf.put_u32(self.reason.code());
        buf.put_ssh_string(self.description.as_bytes());
        buf.put_ssh_string(self.language.as_bytes());
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut reader = WireReader::new(payload);
        expect_type(&mut reader, MessageType::Disconnect)?;
        let reason = DisconnectReason::from_code(reader.read_u32("reason code")?);
        // Peers are not trusted to send valid UTF-8 in the description
        let description = String::from_utf8_lossy(reader.read_string("description")?).into_owned();
        let language = if reader.is_empty() {
            String::new()
        } else {
            String::from_utf8_lossy(reader.read_string("language tag")?).into_owned()
        };
        Ok(Self {
            reason,
            description,
            language,
        })
    }
}

/// SSH_MSG_KEXINIT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    pub cookie: [u8; 16],
    pub kex_algorithms: Vec<String>,
    pub server_host_key_algorithms: Vec<String>,
    pub encryption_client_to_server: Vec<String>,
    pub encryption_server_to_client: Vec<String>,
    pub mac_client_to_server: Vec<String>,
    pub mac_server_to_client: Vec<String>,
    pub compression_client_to_server: Vec<String>,
    pub compression_server_to_client: Vec<String>,
    pub languages_client_to_server: Vec<String>,
    pub languages_server_to_client: Vec<String>,
    pub first_kex_packet_follows: bool,
}

impl KexInit {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(512);
        buf.put_u8(MessageType::KexInit.to_byte());
        buf.put_slice(&self.cookie);
        buf.put_name_list(&self.kex_algorithms);
        buf.put_name_list(&self.server_host_key_algorithms);
        buf.put_name_list(&self.encryption_client_to_server);
        buf.put_name_list(&self.encryption_server_to_client);
        buf.put_name_list(&self.mac_client_to_server);
        buf.put_name_list(&self.mac_server_to_client);
        buf.put_name_list(&self.compression_client_to_server);
        buf.put_name_list(&self.compression_server_to_client);
        buf.put_name_list(&self.languages_client_to_server);
        buf.put_name_list(&self.languages_server_to_client);
        buf.put_ssh_bool(self.first_kex_packet_follows);
        buf.put_u32(0);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut reader = WireReader::new(payload);
        expect_type(&mut reader, MessageType::KexInit)?;
        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(reader.read_bytes(16, "cookie")?);
        let kexinit = Self {
            cookie,
            kex_algorithms: reader.read_name_list("kex_algorithms")?,
            server_host_key_algorithms: reader.read_name_list("server_host_key_algorithms")?,
            encryption_client_to_server: reader.read_name_list("encryption_client_to_server")?,
            encryption_server_to_client: reader.read_name_list("encryption_server_to_client")?,
            mac_client_to_server: reader.read_name_list("mac_client_to_server")?,
            mac_server_to_client: reader.read_name_list("mac_server_to_client")?,
            compression_client_to_server: reader.read_name_list("compression_client_to_server")?,
            compression_server_to_client: reader.read_name_list("compression_server_to_client")?,
            languages_client_to_server: reader.read_name_list("languages_client_to_server")?,
            languages_server_to_client: reader.read_name_list("languages_server_to_client")?,
            first_kex_packet_follows: reader.read_bool("first_kex_packet_follows")?,
        };
        reader.read_u32("reserved")?;
        Ok(kexinit)
    }
}

/// SSH_MSG_KEX_ECDH_INIT (RFC 5656 §4), also used by curve25519-sha256
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexEcdhInit {
    pub client_public: Bytes,
}

impl KexEcdhInit {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.client_public.len());
        buf.put_u8(MessageType::KexEcdhInit.to_byte());
        buf.put_ssh_string(&self.client_public);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut reader = WireReader::new(payload);
        expect_type(&mut reader, MessageType::KexEcdhInit)?;
        Ok(Self {
            client_public: Bytes::copy_from_slice(reader.read_string("Q_C")?),
        })
    }
}

/// SSH_MSG_KEX_ECDH_REPLY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexEcdhReply {
    pub host_key: Bytes,
    pub server_public: Bytes,
    pub signature: Bytes,
}

impl KexEcdhReply {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            13 + self.host_key.len() + self.server_public.len() + self.signature.len(),
        );
        buf.put_u8(MessageType::KexEcdhReply.to_byte());
        buf.put_ssh_string(&self.host_key);
        buf.put_ssh_string(&self.server_public);
        buf.put_ssh_string(&self.signature);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut reader = WireReader::new(payload);
        expect_type(&mut reader, MessageType::KexEcdhReply)?;
        Ok(Self {
            host_key: Bytes::copy_from_slice(reader.read_string("K_S")?),
            server_public: Bytes::copy_from_slice(reader.read_string("Q_S")?),
            signature: Bytes::copy_from_slice(reader.read_string("signature")?),
        })
    }
}

/// Payload consisting of the message number only
pub fn encode_bare(message: MessageType) -> Bytes {
    Bytes::copy_from_slice(&[message.to_byte()])
}

/// SSH_MSG_SERVICE_REQUEST / SSH_MSG_SERVICE_ACCEPT
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub message: MessageType,
    pub name: String,
}

impl Service {
    pub fn request(name: impl Into<String>) -> Self {
        Self {
            message: MessageType::ServiceRequest,
            name: name.into(),
        }
    }

    pub fn accept(name: impl Into<String>) -> Self {
        Self {
            message: MessageType::ServiceAccept,
            name: name.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.name.len());
        buf.put_u8(self.message.to_byte());
        buf.put_ssh_string(self.name.as_bytes());
        buf.freeze()
    }

    pub fn decode(payload: &[u8], message: MessageType) -> ProtocolResult<Self> {
        let mut reader = WireReader::new(payload);
        expect_type(&mut reader, message)?;
        Ok(Self {
            message,
            name: reader.read_utf8("service name")?.to_string(),
        })
    }
}

/// Method-specific part of SSH_MSG_USERAUTH_REQUEST
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    None,
    /// Raw password bytes; RFC 4252 asks for UTF-8 but clients do not always comply
    Password { password: Bytes },
    /// Any other method, kept raw
    Other { name: String, data: Bytes },
}

impl AuthMethod {
    pub fn name(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Password { .. } => "password",
            Self::Other { name, .. } => name,
        }
    }
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Password { .. } => f.write_str("Password { .. }"),
            Self::Other { name, data } => f
                .debug_struct("Other")
                .field("name", name)
                .field("len", &data.len())
                .finish(),
        }
    }
}

/// SSH_MSG_USERAUTH_REQUEST (RFC 4252 §5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserauthRequest {
    /// User name exactly as sent
    pub username: Bytes,
    pub service: String,
    pub method: AuthMethod,
}

impl UserauthRequest {
    /// User name for log output
    pub fn username_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.username)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(MessageType::UserauthRequest.to_byte());
        buf.put_ssh_string(&self.username);
        buf.put_ssh_string(self.service.as_bytes());
        buf.put_ssh_string(self.method.name().as_bytes());
        match &self.method {
            AuthMethod::None => {}
            AuthMethod::Password { password } => {
                buf.put_ssh_bool(false);
                buf.put_ssh_string(password);
            }
            AuthMethod::Other { data, .. } => buf.put_slice(data),
        }
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut reader = WireReader::new(payload);
        expect_type(&mut reader, MessageType::UserauthRequest)?;
        let username = Bytes::copy_from_slice(reader.read_string("user name")?);
        let service = reader.read_utf8("service name")?.to_string();
        let method_name = reader.read_utf8("method name")?;
        let method = match method_name {
            "none" => AuthMethod::None,
            "password" => {
                reader.read_bool("password change flag")?;
                AuthMethod::Password {
                    password: Bytes::copy_from_slice(reader.read_string("password")?),
                }
            }
            other => AuthMethod::Other {
                name: other.to_string(),
                data: Bytes::copy_from_slice(reader.remaining()),
            },
        };
        Ok(Self {
            username,
            service,
            method,
        })
    }
}

/// SSH_MSG_USERAUTH_FAILURE
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserauthFailure {
    pub methods: Vec<String>,
    pub partial_success: bool,
}

impl UserauthFailure {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u8(MessageType::UserauthFailure.to_byte());
        buf.put_name_list(&self.methods);
        buf.put_ssh_bool(self.partial_success);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut reader = WireReader::new(payload);
        expect_type(&mut reader, MessageType::UserauthFailure)?;
        Ok(Self {
            methods: reader.read_name_list("authentications")?,
            partial_success: reader.read_bool("partial success")?,
        })
    }
}

/// SSH_MSG_USERAUTH_BANNER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserauthBanner {
    pub message: String,
}

impl UserauthBanner {
    pub fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut reader = WireReader::new(payload);
        expect_type(&mut reader, MessageType::UserauthBanner)?;
        Ok(Self {
            message: String::from_utf8_lossy(reader.read_string("message")?).into_owned(),
        })
    }
}
