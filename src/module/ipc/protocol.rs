//! Companion routing protocol
//!
//! Below the module's view, every companion connection starts with a
//! short routing exchange: the connecting side writes the target module
//! index as a native-endian `i32`, and the daemon answers a single
//! [`ROUTE_ACK`] byte if it has a handler for that index. Without a
//! handler the daemon closes the connection instead. After the ack the
//! stream belongs to the module and its handler.
//!
//! The daemon runs once per ABI class; 32-bit and 64-bit processes talk
//! to different sockets and load different module libraries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte sent by the daemon once a handler accepted the connection
pub const ROUTE_ACK: u8 = 1;

/// Pointer-width class of a process and of the daemon serving it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbiClass {
    #[serde(rename = "32")]
    Bits32,
    #[serde(rename = "64")]
    Bits64,
}

impl AbiClass {
    /// Class of the running process
    pub fn current() -> Self {
        if cfg!(target_pointer_width = "64") {
            AbiClass::Bits64
        } else {
            AbiClass::Bits32
        }
    }

    /// Listening socket name of the daemon serving this class
    pub fn socket_name(self) -> &'static str {
        match self {
            AbiClass::Bits32 => "companion32.sock",
            AbiClass::Bits64 => "companion64.sock",
        }
    }

    /// File name of a module's library for this class, under `zygisk/`
    pub fn library_name(self) -> &'static str {
        let arm = cfg!(any(target_arch = "arm", target_arch = "aarch64"));
        match (self, arm) {
            (AbiClass::Bits64, true) => "arm64-v8a.so",
            (AbiClass::Bits32, true) => "armeabi-v7a.so",
            (AbiClass::Bits64, false) => "x86_64.so",
            (AbiClass::Bits32, false) => "x86.so",
        }
    }
}

impl fmt::Display for AbiClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiClass::Bits32 => write!(f, "32"),
            AbiClass::Bits64 => write!(f, "64"),
        }
    }
}

impl FromStr for AbiClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "32" => Ok(AbiClass::Bits32),
            "64" => Ok(AbiClass::Bits64),
            other => Err(format!("unknown ABI class '{}', expected 32 or 64", other)),
        }
    }
}

pub fn write_module_index<W: Write>(writer: &mut W, index: i32) -> io::Result<()> {
    writer.write_all(&index.to_ne_bytes())
}

pub fn read_module_index<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_ne_bytes(buf))
}

/// Read the daemon's answer; a closed connection means no handler
pub fn read_ack<R: Read>(reader: &mut R) -> io::Result<bool> {
    let mut buf = [0u8; 1];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(buf[0] == ROUTE_ACK),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn read_module_index_async<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).await?;
    Ok(i32::from_ne_bytes(buf))
}

pub async fn write_ack_async<W: AsyncWrite + Unpin>(writer: &mut W) -> io::Result<()> {
    writer.write_all(&[ROUTE_ACK]).await?;
    writer.flush().await
}
