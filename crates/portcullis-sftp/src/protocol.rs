//! SFTP wire protocol (draft-ietf-secsh-filexfer-02).
//!
//! The subsystem speaks version 3 of the protocol over one session
//! channel. Packets are length-framed: a u32 payload length, a type byte,
//! then the type-specific payload. This module only knows about packet
//! shapes; the serve loop lives in [`crate::subsystem`].

use bytes::{BufMut, BytesMut};

/// Protocol version negotiated with clients.
pub const SFTP_VERSION: u32 = 3;

/// Packet types, client requests and server responses.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Session initialization
    Init = 1,
    /// Version response to Init
    Version = 2,
    /// Open a file
    Open = 3,
    /// Close a handle
    Close = 4,
    /// Read from a file handle
    Read = 5,
    /// Write to a file handle
    Write = 6,
    /// Attributes by path, not following symlinks
    Lstat = 7,
    /// Attributes by handle
    Fstat = 8,
    /// Set attributes by path
    Setstat = 9,
    /// Set attributes by handle
    Fsetstat = 10,
    /// Open a directory
    Opendir = 11,
    /// Read directory entries
    Readdir = 12,
    /// Remove a file
    Remove = 13,
    /// Create a directory
    Mkdir = 14,
    /// Remove a directory
    Rmdir = 15,
    /// Canonicalize a path
    Realpath = 16,
    /// Attributes by path, following symlinks
    Stat = 17,
    /// Rename a file or directory
    Rename = 18,
    /// Read a symlink target
    Readlink = 19,
    /// Create a symlink
    Symlink = 20,
    /// Status response
    Status = 101,
    /// Handle response
    Handle = 102,
    /// Data response
    Data = 103,
    /// Name response (directory listings, realpath)
    Name = 104,
    /// Attributes response
    Attrs = 105,
    /// Extended request
    Extended = 200,
    /// Extended reply
    ExtendedReply = 201,
}

impl TryFrom<u8> for PacketType {
    type Error = crate::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let packet_type = match value {
            1 => Self::Init,
            2 => Self::Version,
            3 => Self::Open,
            4 => Self::Close,
            5 => Self::Read,
            6 => Self::Write,
            7 => Self::Lstat,
            8 => Self::Fstat,
            9 => Self::Setstat,
            10 => Self::Fsetstat,
            11 => Self::Opendir,
            12 => Self::Readdir,
            13 => Self::Remove,
            14 => Self::Mkdir,
            15 => Self::Rmdir,
            16 => Self::Realpath,
            17 => Self::Stat,
            18 => Self::Rename,
            19 => Self::Readlink,
            20 => Self::Symlink,
            101 => Self::Status,
            102 => Self::Handle,
            103 => Self::Data,
            104 => Self::Name,
            105 => Self::Attrs,
            200 => Self::Extended,
            201 => Self::ExtendedReply,
            other => {
                return Err(crate::Error::Protocol(format!(
                    "unknown packet type {other}"
                )));
            }
        };
        Ok(packet_type)
    }
}

/// Status codes carried by STATUS responses.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Success
    Ok = 0,
    /// End of file or directory
    Eof = 1,
    /// No such file or directory
    NoSuchFile = 2,
    /// Permission denied
    PermissionDenied = 3,
    /// General failure
    Failure = 4,
    /// Malformed packet
    BadMessage = 5,
    /// No connection
    NoConnection = 6,
    /// Connection lost
    ConnectionLost = 7,
    /// Operation not supported
    OpUnsupported = 8,
}

/// File open flags from OPEN requests.
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    /// Open for reading.
    pub const READ: u32 = 0x0000_0001;
    /// Open for writing.
    pub const WRITE: u32 = 0x0000_0002;
    /// Append mode.
    pub const APPEND: u32 = 0x0000_0004;
    /// Create when absent.
    pub const CREAT: u32 = 0x0000_0008;
    /// Truncate on open.
    pub const TRUNC: u32 = 0x0000_0010;
    /// Fail when the file already exists.
    pub const EXCL: u32 = 0x0000_0020;

    /// Open for reading.
    pub fn read(self) -> bool {
        self.0 & Self::READ != 0
    }

    /// Open for writing.
    pub fn write(self) -> bool {
        self.0 & Self::WRITE != 0
    }

    /// Append mode.
    pub fn append(self) -> bool {
        self.0 & Self::APPEND != 0
    }

    /// Create when absent.
    pub fn create(self) -> bool {
        self.0 & Self::CREAT != 0
    }

    /// Truncate on open.
    pub fn truncate(self) -> bool {
        self.0 & Self::TRUNC != 0
    }

    /// Fail when the file already exists.
    pub fn exclusive(self) -> bool {
        self.0 & Self::EXCL != 0
    }
}

/// File attributes as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    /// File size in bytes
    pub size: Option<u64>,
    /// Owner id
    pub uid: Option<u32>,
    /// Group id
    pub gid: Option<u32>,
    /// Permission bits
    pub permissions: Option<u32>,
    /// Access time, seconds since the epoch
    pub atime: Option<u32>,
    /// Modification time, seconds since the epoch
    pub mtime: Option<u32>,
}

impl Attributes {
    const FLAG_SIZE: u32 = 0x0000_0001;
    const FLAG_UIDGID: u32 = 0x0000_0002;
    const FLAG_PERMISSIONS: u32 = 0x0000_0004;
    const FLAG_ACMODTIME: u32 = 0x0000_0008;

    /// Builds attributes from filesystem metadata.
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32);

        Self {
            size: Some(metadata.len()),
            uid: None,
            gid: None,
            permissions: Some(if metadata.is_dir() { 0o40755 } else { 0o100644 }),
            atime: None,
            mtime,
        }
    }

    /// Encodes the attribute block.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u32;
        if self.size.is_some() {
            flags |= Self::FLAG_SIZE;
        }
        if self.uid.is_some() && self.gid.is_some() {
            flags |= Self::FLAG_UIDGID;
        }
        if self.permissions.is_some() {
            flags |= Self::FLAG_PERMISSIONS;
        }
        if self.atime.is_some() && self.mtime.is_some() {
            flags |= Self::FLAG_ACMODTIME;
        }
        buf.put_u32(flags);

        if let Some(size) = self.size {
            buf.put_u64(size);
        }
        if let (Some(uid), Some(gid)) = (self.uid, self.gid) {
            buf.put_u32(uid);
            buf.put_u32(gid);
        }
        if let Some(permissions) = self.permissions {
            buf.put_u32(permissions);
        }
        if let (Some(atime), Some(mtime)) = (self.atime, self.mtime) {
            buf.put_u32(atime);
            buf.put_u32(mtime);
        }
    }

    /// Decodes an attribute block.
    ///
    /// # Errors
    ///
    /// Fails when the block is truncated.
    pub fn decode(buf: &mut &[u8]) -> crate::Result<Self> {
        let flags = codec::get_u32(buf)?;
        let mut attrs = Self::default();

        if flags & Self::FLAG_SIZE != 0 {
            attrs.size = Some(codec::get_u64(buf)?);
        }
        if flags & Self::FLAG_UIDGID != 0 {
            attrs.uid = Some(codec::get_u32(buf)?);
            attrs.gid = Some(codec::get_u32(buf)?);
        }
        if flags & Self::FLAG_PERMISSIONS != 0 {
            attrs.permissions = Some(codec::get_u32(buf)?);
        }
        if flags & Self::FLAG_ACMODTIME != 0 {
            attrs.atime = Some(codec::get_u32(buf)?);
            attrs.mtime = Some(codec::get_u32(buf)?);
        }

        Ok(attrs)
    }
}

/// Field-level encoding helpers shared by the request and response paths.
pub mod codec {
    use bytes::{Buf, BufMut, BytesMut};

    fn short(field: &str) -> crate::Error {
        crate::Error::Protocol(format!("packet truncated reading {field}"))
    }

    /// Reads a big-endian u32.
    ///
    /// # Errors
    ///
    /// Fails on truncated input.
    pub fn get_u32(buf: &mut &[u8]) -> crate::Result<u32> {
        if buf.remaining() < 4 {
            return Err(short("u32"));
        }
        Ok(buf.get_u32())
    }

    /// Reads a big-endian u64.
    ///
    /// # Errors
    ///
    /// Fails on truncated input.
    pub fn get_u64(buf: &mut &[u8]) -> crate::Result<u64> {
        if buf.remaining() < 8 {
            return Err(short("u64"));
        }
        Ok(buf.get_u64())
    }

    /// Reads a length-prefixed byte string.
    ///
    /// # Errors
    ///
    /// Fails on truncated input.
    pub fn get_bytes(buf: &mut &[u8]) -> crate::Result<Vec<u8>> {
        let len = get_u32(buf)? as usize;
        if buf.remaining() < len {
            return Err(short("bytes"));
        }
        let bytes = buf[..len].to_vec();
        buf.advance(len);
        Ok(bytes)
    }

    /// Reads a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Fails on truncated or non-UTF-8 input.
    pub fn get_string(buf: &mut &[u8]) -> crate::Result<String> {
        let bytes = get_bytes(buf)?;
        String::from_utf8(bytes)
            .map_err(|e| crate::Error::Protocol(format!("string is not UTF-8: {e}")))
    }

    /// Writes a length-prefixed byte string.
    pub fn put_bytes(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u32(data.len() as u32);
        buf.put_slice(data);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn put_string(buf: &mut BytesMut, s: &str) {
        put_bytes(buf, s.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_type_round_trips() {
        for value in [1u8, 2, 3, 6, 12, 18, 101, 105, 200] {
            let packet_type = PacketType::try_from(value).unwrap();
            assert_eq!(packet_type as u8, value);
        }
        assert!(PacketType::try_from(99).is_err());
    }

    #[test]
    fn strings_and_bytes_round_trip() {
        let mut buf = BytesMut::new();
        codec::put_string(&mut buf, "reports/2024.txt");
        codec::put_bytes(&mut buf, &[0xde, 0xad]);

        let mut input: &[u8] = &buf;
        assert_eq!(codec::get_string(&mut input).unwrap(), "reports/2024.txt");
        assert_eq!(codec::get_bytes(&mut input).unwrap(), vec![0xde, 0xad]);
        assert!(input.is_empty());
    }

    #[test]
    fn truncated_fields_are_protocol_errors() {
        let mut input: &[u8] = &[0, 0];
        assert!(codec::get_u32(&mut input).is_err());

        // Declared length longer than the remaining payload.
        let mut input: &[u8] = &[0, 0, 0, 9, b'a', b'b'];
        assert!(codec::get_bytes(&mut input).is_err());
    }

    #[test]
    fn attributes_encode_only_present_fields() {
        let attrs = Attributes {
            size: Some(42),
            permissions: Some(0o100644),
            ..Attributes::default()
        };

        let mut buf = BytesMut::new();
        attrs.encode(&mut buf);

        let mut input: &[u8] = &buf;
        let decoded = Attributes::decode(&mut input).unwrap();
        assert_eq!(decoded, attrs);
        assert!(input.is_empty());
    }

    #[test]
    fn truncated_attributes_are_rejected() {
        // Flags claim a size field that never arrives.
        let mut input: &[u8] = &[0, 0, 0, 1];
        assert!(Attributes::decode(&mut input).is_err());
    }
}
