//! Session subsystem services.
//!
//! A subsystem is handed the byte stream of one accepted session channel
//! plus the shared filesystem, and drives it until the peer is done. The
//! concrete service here is the SFTP data plane; the dispatcher only knows
//! the [`SubsystemService`] trait, so the service is replaceable.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::fs::LocalFs;
use crate::protocol::{Attributes, OpenFlags, PacketType, SFTP_VERSION, Status, codec};
use crate::{Error, Result};

/// Hard ceiling on one framed packet.
const MAX_PACKET_LEN: usize = 256 * 1024;

/// Ceiling on open handles per session.
const MAX_OPEN_HANDLES: usize = 1024;

/// Directory entries returned per READDIR round trip.
const READDIR_BATCH: usize = 100;

/// Deadline for a single disk read or write.
const FILE_OP_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte stream of one logical channel.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Owned channel byte stream handed to a subsystem.
pub type BoxedByteStream = Box<dyn ByteStream>;

/// A service bound to accepted session channels.
#[async_trait]
pub trait SubsystemService: Send + Sync {
    /// Subsystem name matched during channel negotiation.
    fn name(&self) -> &'static str;

    /// Drives the service over the channel byte stream.
    ///
    /// # Errors
    ///
    /// A clean end of stream is `Ok`; any other return is the abnormal
    /// termination the caller logs. Errors never outlive the channel.
    async fn serve(&self, stream: BoxedByteStream, fs: Arc<LocalFs>) -> Result<()>;
}

/// SFTP (protocol version 3) file-transfer service.
#[derive(Debug, Default)]
pub struct SftpSubsystem;

impl SftpSubsystem {
    /// Creates the service.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SubsystemService for SftpSubsystem {
    fn name(&self) -> &'static str {
        "sftp"
    }

    async fn serve(&self, mut stream: BoxedByteStream, fs: Arc<LocalFs>) -> Result<()> {
        let mut session = SftpSession::new(fs);
        let mut len_buf = [0u8; 4];

        loop {
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                // End of stream between packets is the normal way out.
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(err) => return Err(err.into()),
            }

            let len = u32::from_be_bytes(len_buf) as usize;
            if len == 0 || len > MAX_PACKET_LEN {
                return Err(Error::Protocol(format!("unreasonable packet length {len}")));
            }

            let mut packet = vec![0u8; len];
            stream.read_exact(&mut packet).await?;

            let response = session.handle_packet(&packet).await?;
            if !response.is_empty() {
                let mut framed = BytesMut::with_capacity(response.len() + 4);
                framed.put_u32(response.len() as u32);
                framed.put_slice(&response);
                stream.write_all(&framed).await?;
                stream.flush().await?;
            }
        }
    }
}

/// Open handle owned by one session.
enum SessionHandle {
    File(fs::File, PathBuf),
    Dir {
        entries: Vec<(String, Attributes)>,
        cursor: usize,
    },
}

/// Per-channel SFTP session state.
struct SftpSession {
    fs: Arc<LocalFs>,
    handles: HashMap<u32, SessionHandle>,
    next_handle: u32,
    initialized: bool,
}

impl SftpSession {
    fn new(fs: Arc<LocalFs>) -> Self {
        Self {
            fs,
            handles: HashMap::new(),
            next_handle: 0,
            initialized: false,
        }
    }

    async fn handle_packet(&mut self, packet: &[u8]) -> Result<Vec<u8>> {
        let Some((&type_byte, mut payload)) = packet.split_first() else {
            return Err(Error::Protocol("empty packet".to_string()));
        };
        let packet_type = PacketType::try_from(type_byte)?;
        let payload = &mut payload;

        if !self.initialized && packet_type != PacketType::Init {
            return Err(Error::Protocol(format!(
                "{packet_type:?} before initialization"
            )));
        }

        match packet_type {
            PacketType::Init => self.handle_init(payload),
            PacketType::Open => self.handle_open(payload).await,
            PacketType::Close => self.handle_close(payload),
            PacketType::Read => self.handle_read(payload).await,
            PacketType::Write => self.handle_write(payload).await,
            PacketType::Stat | PacketType::Lstat => {
                self.handle_stat(payload, packet_type == PacketType::Lstat).await
            }
            PacketType::Fstat => self.handle_fstat(payload).await,
            PacketType::Opendir => self.handle_opendir(payload).await,
            PacketType::Readdir => self.handle_readdir(payload),
            PacketType::Remove => self.handle_remove(payload).await,
            PacketType::Mkdir => self.handle_mkdir(payload).await,
            PacketType::Rmdir => self.handle_rmdir(payload).await,
            PacketType::Realpath => self.handle_realpath(payload),
            PacketType::Rename => self.handle_rename(payload).await,
            PacketType::Setstat
            | PacketType::Fsetstat
            | PacketType::Readlink
            | PacketType::Symlink
            | PacketType::Extended => self.handle_unsupported(payload, packet_type),
            PacketType::Version
            | PacketType::Status
            | PacketType::Handle
            | PacketType::Data
            | PacketType::Name
            | PacketType::Attrs
            | PacketType::ExtendedReply => Err(Error::Protocol(format!(
                "{packet_type:?} is a response type, not a request"
            ))),
        }
    }

    fn handle_init(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let client_version = codec::get_u32(buf)?;
        debug!(client_version, "session initialized");
        self.initialized = true;

        let mut response = BytesMut::new();
        response.put_u8(PacketType::Version as u8);
        response.put_u32(SFTP_VERSION);
        Ok(response.to_vec())
    }

    async fn handle_open(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let filename = codec::get_string(buf)?;
        let flags = OpenFlags(codec::get_u32(buf)?);
        let _attrs = Attributes::decode(buf)?;

        let path = match self.fs.resolve(&filename) {
            Ok(path) => path,
            Err(err) => return Ok(error_response(request_id, &err)),
        };

        if self.handles.len() >= MAX_OPEN_HANDLES {
            warn!("session handle table is full");
            return Ok(status_response(
                request_id,
                Status::Failure,
                "too many open handles",
            ));
        }

        let mut options = fs::OpenOptions::new();
        if flags.read() {
            options.read(true);
        }
        if flags.write() {
            options.write(true);
        }
        if flags.append() {
            options.append(true);
        }
        if flags.create() {
            options.create(true);
        }
        if flags.truncate() {
            options.truncate(true);
        }
        if flags.exclusive() {
            options.create_new(true);
        }

        match options.open(&path).await {
            Ok(file) => {
                let handle = self.allocate(SessionHandle::File(file, path));
                Ok(handle_response(request_id, handle))
            }
            Err(err) => {
                debug!(file = %filename, error = %err, "open failed");
                Ok(error_response(request_id, &io_error(err, &filename)))
            }
        }
    }

    fn handle_close(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let Some(handle) = parse_handle(&codec::get_bytes(buf)?) else {
            return Ok(invalid_handle(request_id));
        };

        match self.handles.remove(&handle) {
            Some(SessionHandle::File(_, path)) => debug!(?path, "file handle closed"),
            Some(SessionHandle::Dir { .. }) => debug!("directory handle closed"),
            None => return Ok(invalid_handle(request_id)),
        }
        Ok(status_response(request_id, Status::Ok, "success"))
    }

    async fn handle_read(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let handle = parse_handle(&codec::get_bytes(buf)?);
        let offset = codec::get_u64(buf)?;
        let len = codec::get_u32(buf)? as usize;

        let Some(SessionHandle::File(file, _)) = handle.and_then(|h| self.handles.get_mut(&h))
        else {
            return Ok(invalid_handle(request_id));
        };

        if let Err(err) = file.seek(std::io::SeekFrom::Start(offset)).await {
            return Ok(error_response(request_id, &Error::Io(err)));
        }

        let mut buffer = vec![0u8; len.min(MAX_PACKET_LEN)];
        match timeout(FILE_OP_TIMEOUT, file.read(&mut buffer)).await {
            Ok(Ok(0)) => Ok(status_response(request_id, Status::Eof, "end of file")),
            Ok(Ok(read)) => {
                buffer.truncate(read);
                Ok(data_response(request_id, &buffer))
            }
            Ok(Err(err)) => Ok(error_response(request_id, &Error::Io(err))),
            Err(_) => Ok(status_response(
                request_id,
                Status::Failure,
                "read timed out",
            )),
        }
    }

    async fn handle_write(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let handle = parse_handle(&codec::get_bytes(buf)?);
        let offset = codec::get_u64(buf)?;
        let data = codec::get_bytes(buf)?;

        let Some(SessionHandle::File(file, _)) = handle.and_then(|h| self.handles.get_mut(&h))
        else {
            return Ok(invalid_handle(request_id));
        };

        if let Err(err) = file.seek(std::io::SeekFrom::Start(offset)).await {
            return Ok(error_response(request_id, &Error::Io(err)));
        }

        match timeout(FILE_OP_TIMEOUT, file.write_all(&data)).await {
            Ok(Ok(())) => Ok(status_response(request_id, Status::Ok, "success")),
            Ok(Err(err)) => Ok(error_response(request_id, &Error::Io(err))),
            Err(_) => Ok(status_response(
                request_id,
                Status::Failure,
                "write timed out",
            )),
        }
    }

    async fn handle_stat(&mut self, buf: &mut &[u8], no_follow: bool) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;

        let resolved = match self.fs.resolve(&path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(error_response(request_id, &err)),
        };

        let metadata = if no_follow {
            fs::symlink_metadata(&resolved).await
        } else {
            fs::metadata(&resolved).await
        };

        match metadata {
            Ok(metadata) => Ok(attrs_response(
                request_id,
                &Attributes::from_metadata(&metadata),
            )),
            Err(err) => {
                debug!(path = %path, error = %err, "stat failed");
                Ok(error_response(request_id, &io_error(err, &path)))
            }
        }
    }

    async fn handle_fstat(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let handle = parse_handle(&codec::get_bytes(buf)?);

        let Some(SessionHandle::File(file, _)) = handle.and_then(|h| self.handles.get(&h)) else {
            return Ok(invalid_handle(request_id));
        };

        match file.metadata().await {
            Ok(metadata) => Ok(attrs_response(
                request_id,
                &Attributes::from_metadata(&metadata),
            )),
            Err(err) => Ok(error_response(request_id, &Error::Io(err))),
        }
    }

    async fn handle_opendir(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;

        let resolved = match self.fs.resolve(&path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(error_response(request_id, &err)),
        };

        if self.handles.len() >= MAX_OPEN_HANDLES {
            warn!("session handle table is full");
            return Ok(status_response(
                request_id,
                Status::Failure,
                "too many open handles",
            ));
        }

        let mut read_dir = match fs::read_dir(&resolved).await {
            Ok(read_dir) => read_dir,
            Err(err) => {
                debug!(path = %path, error = %err, "opendir failed");
                return Ok(error_response(request_id, &io_error(err, &path)));
            }
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            if let Ok(metadata) = entry.metadata().await {
                entries.push((
                    entry.file_name().to_string_lossy().to_string(),
                    Attributes::from_metadata(&metadata),
                ));
            }
        }

        let handle = self.allocate(SessionHandle::Dir { entries, cursor: 0 });
        Ok(handle_response(request_id, handle))
    }

    fn handle_readdir(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let handle = parse_handle(&codec::get_bytes(buf)?);

        let Some(SessionHandle::Dir { entries, cursor }) =
            handle.and_then(|h| self.handles.get_mut(&h))
        else {
            return Ok(invalid_handle(request_id));
        };

        if *cursor >= entries.len() {
            return Ok(status_response(request_id, Status::Eof, "end of directory"));
        }

        let end = (*cursor + READDIR_BATCH).min(entries.len());
        let batch = &entries[*cursor..end];
        let response = name_response(request_id, batch);
        *cursor = end;
        Ok(response)
    }

    async fn handle_remove(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;

        let resolved = match self.fs.resolve(&path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(error_response(request_id, &err)),
        };

        match fs::remove_file(&resolved).await {
            Ok(()) => Ok(status_response(request_id, Status::Ok, "success")),
            Err(err) => {
                debug!(path = %path, error = %err, "remove failed");
                Ok(error_response(request_id, &io_error(err, &path)))
            }
        }
    }

    async fn handle_mkdir(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;
        let _attrs = Attributes::decode(buf)?;

        let resolved = match self.fs.resolve(&path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(error_response(request_id, &err)),
        };

        match fs::create_dir(&resolved).await {
            Ok(()) => Ok(status_response(request_id, Status::Ok, "success")),
            Err(err) => {
                debug!(path = %path, error = %err, "mkdir failed");
                Ok(error_response(request_id, &io_error(err, &path)))
            }
        }
    }

    async fn handle_rmdir(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;

        let resolved = match self.fs.resolve(&path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(error_response(request_id, &err)),
        };

        match fs::remove_dir(&resolved).await {
            Ok(()) => Ok(status_response(request_id, Status::Ok, "success")),
            Err(err) => {
                debug!(path = %path, error = %err, "rmdir failed");
                Ok(error_response(request_id, &io_error(err, &path)))
            }
        }
    }

    fn handle_realpath(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let path = codec::get_string(buf)?;

        // The client-visible namespace is rooted at "/".
        let resolved = if path.is_empty() || path == "." {
            "/".to_string()
        } else if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };

        Ok(name_response(
            request_id,
            &[(resolved, Attributes::default())],
        ))
    }

    async fn handle_rename(&mut self, buf: &mut &[u8]) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        let old_path = codec::get_string(buf)?;
        let new_path = codec::get_string(buf)?;

        let old_resolved = match self.fs.resolve(&old_path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(error_response(request_id, &err)),
        };
        let new_resolved = match self.fs.resolve(&new_path) {
            Ok(resolved) => resolved,
            Err(err) => return Ok(error_response(request_id, &err)),
        };

        match fs::rename(&old_resolved, &new_resolved).await {
            Ok(()) => Ok(status_response(request_id, Status::Ok, "success")),
            Err(err) => {
                debug!(from = %old_path, to = %new_path, error = %err, "rename failed");
                Ok(error_response(request_id, &io_error(err, &old_path)))
            }
        }
    }

    fn handle_unsupported(&mut self, buf: &mut &[u8], packet_type: PacketType) -> Result<Vec<u8>> {
        let request_id = codec::get_u32(buf)?;
        debug!(packet_type = ?packet_type, "unsupported operation");
        Ok(status_response(
            request_id,
            Status::OpUnsupported,
            "operation not supported",
        ))
    }

    fn allocate(&mut self, handle: SessionHandle) -> u32 {
        let id = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);
        self.handles.insert(id, handle);
        id
    }
}

/// Wire handles are the 4-byte big-endian session handle id.
fn parse_handle(bytes: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

fn io_error(err: std::io::Error, path: &str) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound(path.to_string()),
        std::io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_string()),
        _ => Error::Io(err),
    }
}

fn status_response(request_id: u32, status: Status, message: &str) -> Vec<u8> {
    status_with_code(request_id, status as u32, message)
}

fn error_response(request_id: u32, err: &Error) -> Vec<u8> {
    status_with_code(request_id, err.to_status_code(), &err.client_message())
}

fn invalid_handle(request_id: u32) -> Vec<u8> {
    error_response(
        request_id,
        &Error::InvalidHandle("handle does not exist or is closed".to_string()),
    )
}

fn status_with_code(request_id: u32, code: u32, message: &str) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(PacketType::Status as u8);
    response.put_u32(request_id);
    response.put_u32(code);
    codec::put_string(&mut response, message);
    codec::put_string(&mut response, "en"); // language tag
    response.to_vec()
}

fn handle_response(request_id: u32, handle: u32) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(PacketType::Handle as u8);
    response.put_u32(request_id);
    codec::put_bytes(&mut response, &handle.to_be_bytes());
    response.to_vec()
}

fn data_response(request_id: u32, data: &[u8]) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(PacketType::Data as u8);
    response.put_u32(request_id);
    codec::put_bytes(&mut response, data);
    response.to_vec()
}

fn attrs_response(request_id: u32, attrs: &Attributes) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(PacketType::Attrs as u8);
    response.put_u32(request_id);
    attrs.encode(&mut response);
    response.to_vec()
}

fn name_response(request_id: u32, entries: &[(String, Attributes)]) -> Vec<u8> {
    let mut response = BytesMut::new();
    response.put_u8(PacketType::Name as u8);
    response.put_u32(request_id);
    response.put_u32(entries.len() as u32);
    for (name, attrs) in entries {
        codec::put_string(&mut response, name);
        codec::put_string(&mut response, name); // longname
        attrs.encode(&mut response);
    }
    response.to_vec()
}
