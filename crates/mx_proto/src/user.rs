//! Fixed-width user and credential records.

use bytes::{Buf, BufMut};

use crate::error::ProtoError;

pub const USERNAME_SIZE: usize = 16;

pub const UNHASHED_PASSWORD_SIZE: usize = 16;

/// `id(4 LE) | connected(1) | name(16)`.
pub const USER_INFO_SIZE: usize = 4 + 1 + USERNAME_SIZE;

/// One entry of a user-discovery reply. Immutable value type; produced
/// only by decoding server fetch pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: u32,
    pub connected: bool,
    /// NUL-padded; only the leading non-NUL bytes are meaningful.
    pub name: [u8; USERNAME_SIZE],
}

impl UserInfo {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(USER_INFO_SIZE);
        buf.put_u32_le(self.id);
        buf.put_u8(self.connected as u8);
        buf.put_slice(&self.name);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        if bytes.len() != USER_INFO_SIZE {
            return Err(ProtoError::MalformedRecord(format!(
                "user record must be {USER_INFO_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = bytes;
        let id = buf.get_u32_le();
        let connected = match buf.get_u8() {
            0 => false,
            1 => true,
            other => {
                return Err(ProtoError::MalformedRecord(format!(
                    "connected byte must be 0 or 1, got {other}"
                )))
            }
        };
        let mut name = [0u8; USERNAME_SIZE];
        buf.copy_to_slice(&mut name);
        Ok(UserInfo { id, connected, name })
    }

    /// Decode a fetch page of packed records.
    pub fn decode_page(bytes: &[u8]) -> Result<Vec<Self>, ProtoError> {
        if bytes.is_empty() || bytes.len() % USER_INFO_SIZE != 0 {
            return Err(ProtoError::MalformedRecord(format!(
                "user page of {} bytes is not a multiple of {USER_INFO_SIZE}",
                bytes.len()
            )));
        }
        bytes.chunks(USER_INFO_SIZE).map(Self::decode).collect()
    }

    /// The name with trailing padding stripped, when it is valid UTF-8.
    pub fn name_str(&self) -> Option<&str> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(USERNAME_SIZE);
        std::str::from_utf8(&self.name[..end]).ok()
    }
}

/// Login/registration credentials: the LOG_IN/REGISTER wire body and the
/// locally persisted record. Never stored server-side in this form.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: [u8; USERNAME_SIZE],
    pub password: [u8; UNHASHED_PASSWORD_SIZE],
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keep passwords out of logs.
        f.debug_struct("Credentials")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Result<Self, ProtoError> {
        Ok(Credentials {
            username: pad_field(username, "username")?,
            password: pad_field(password, "password")?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(USERNAME_SIZE + UNHASHED_PASSWORD_SIZE);
        buf.put_slice(&self.username);
        buf.put_slice(&self.password);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        if bytes.len() != USERNAME_SIZE + UNHASHED_PASSWORD_SIZE {
            return Err(ProtoError::MalformedRecord(format!(
                "credentials must be {} bytes, got {}",
                USERNAME_SIZE + UNHASHED_PASSWORD_SIZE,
                bytes.len()
            )));
        }
        let mut username = [0u8; USERNAME_SIZE];
        let mut password = [0u8; UNHASHED_PASSWORD_SIZE];
        username.copy_from_slice(&bytes[..USERNAME_SIZE]);
        password.copy_from_slice(&bytes[USERNAME_SIZE..]);
        Ok(Credentials { username, password })
    }
}

fn pad_field<const N: usize>(value: &str, what: &str) -> Result<[u8; N], ProtoError> {
    let bytes = value.as_bytes();
    if bytes.is_empty() {
        return Err(ProtoError::InvalidField(format!("empty {what}")));
    }
    if bytes.len() > N {
        return Err(ProtoError::InvalidField(format!(
            "{what} of {} bytes exceeds the {N}-byte field",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}
