//! Per-connection traffic logs.
//!
//! Every accepted connection gets `<root>/<peer-ip>/cli_<N>.txt`, where `N`
//! is the connection's arrival index. The event loop is the only writer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Append-only log of one connection's inbound chat bytes.
#[derive(Debug)]
pub struct ClientLog {
    file: File,
    path: PathBuf,
    written: u64,
}

impl ClientLog {
    /// Create the log for connection `sequence` from `ip`, creating the
    /// peer directory if needed.
    pub fn create(root: &Path, ip: IpAddr, sequence: usize) -> io::Result<Self> {
        let dir = root.join(ip.to_string());
        fs::create_dir_all(&dir)?;

        let path = dir.join(format!("cli_{}.txt", sequence));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            file,
            path,
            written: 0,
        })
    }

    /// Append raw bytes exactly as received.
    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total bytes appended through this handle.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and close the log.
    pub fn close(mut self) -> io::Result<()> {
        self.file.flush()?;
        self.file.sync_data()
    }
}
