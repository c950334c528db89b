use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::UnixListener;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::port::DuplexPort;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Listening side of a [`DuplexPort`].
///
/// A supervisor binds one of these, hands the path to a child through the
/// bootstrap message, and accepts the child's connection. The socket file is
/// removed on drop if it is still the one this listener created.
pub struct PortListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl PortListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind a filesystem-path socket.
    ///
    /// An existing socket at `path` is treated as stale and removed; any other
    /// kind of file is left alone and the bind fails.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind on a fresh path under the system temp directory.
    pub fn bind_temp() -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!("replyport-{}-{nanos:x}-{seq}.sock", std::process::id());
        Self::bind(std::env::temp_dir().join(name))
    }

    /// Bind with an explicit permission mode.
    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |path: &Path, source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(|e| bind_err(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "listening for duplex port");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
        })
    }

    /// Accept one connection.
    pub async fn accept(&self) -> Result<DuplexPort> {
        let (stream, _addr) = self.listener.accept().await.map_err(TransportError::Accept)?;
        debug!(path = ?self.path, "accepted duplex port connection");
        Ok(DuplexPort::from_stream(stream))
    }

    /// Accept one connection, giving up after `timeout`.
    pub async fn accept_timeout(&self, timeout: Duration) -> Result<DuplexPort> {
        tokio::time::timeout(timeout, self.accept())
            .await
            .map_err(|_| TransportError::AcceptTimeout(timeout))?
    }

    /// Dial a listening port. Same as [`DuplexPort::connect`].
    pub async fn connect(path: impl AsRef<Path>) -> Result<DuplexPort> {
        DuplexPort::connect(path).await
    }

    /// The path this listener is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PortListener {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}
