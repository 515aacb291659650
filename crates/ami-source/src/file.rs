//! File-backed data source.
//!
//! Selecting records a path base; the file `<base>_file.dat` is opened
//! lazily on the first produce after selection and at most once until the
//! source is closed.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{SourceError, SourceResult};
use crate::frame::{RECORD_LEN, TelemetryFrame};
use crate::source::SourceState;

#[derive(Debug, Default)]
pub struct FileDataSource {
    state: SourceState,
    path_base: Option<String>,
    reader: Option<BufReader<File>>,
    opens: u32,
}

impl FileDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data file derived from a path base.
    pub fn file_name(base: &str) -> PathBuf {
        PathBuf::from(format!("{base}_file.dat"))
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path_base.as_deref().map(Self::file_name)
    }

    /// Number of times the file has been opened.
    pub fn open_count(&self) -> u32 {
        self.opens
    }

    pub fn select(&mut self, path_base: &str) -> SourceResult<()> {
        match self.state {
            SourceState::Open | SourceState::Failed => Err(SourceError::AlreadyOpen(
                self.path_base.clone().unwrap_or_default(),
            )),
            SourceState::Unselected | SourceState::Selected => {
                self.path_base = Some(path_base.to_string());
                self.state = SourceState::Selected;
                debug!(path = ?Self::file_name(path_base), "file data source selected");
                Ok(())
            }
        }
    }

    pub fn open(&mut self) -> SourceResult<()> {
        match self.state {
            SourceState::Unselected => Err(SourceError::NotSelected),
            SourceState::Open => Ok(()),
            SourceState::Failed => Err(SourceError::Failed(
                self.path().map(|p| p.display().to_string()).unwrap_or_default(),
            )),
            SourceState::Selected => {
                let path = self.path().ok_or(SourceError::NotSelected)?;
                match File::open(&path) {
                    Ok(file) => {
                        self.reader = Some(BufReader::new(file));
                        self.state = SourceState::Open;
                        self.opens += 1;
                        info!(?path, "file data source opened");
                        Ok(())
                    }
                    Err(source) => {
                        self.state = SourceState::Failed;
                        warn!(?path, error = %source, "file data source unavailable");
                        Err(SourceError::Unavailable { path, source })
                    }
                }
            }
        }
    }

    /// Return to `Selected`, keeping the path base.
    pub fn close(&mut self) {
        if matches!(self.state, SourceState::Open | SourceState::Failed) {
            self.reader = None;
            self.state = SourceState::Selected;
            debug!("file data source closed");
        }
    }

    fn locator(&self) -> String {
        self.path().map(|p| p.display().to_string()).unwrap_or_default()
    }

    /// Whether unread bytes are waiting. Only meaningful once open.
    pub fn has_pending_data(&mut self) -> SourceResult<bool> {
        let locator = self.locator();
        let reader = self.reader.as_mut().ok_or(SourceError::NotSelected)?;
        let buf = reader
            .fill_buf()
            .map_err(|source| SourceError::Read { locator, source })?;
        Ok(!buf.is_empty())
    }

    /// Read the next frame, opening the file first if needed.
    ///
    /// `Ok(None)` means open with no complete record available; more data
    /// appended to the file later is picked up by subsequent calls. A
    /// partially written record is left unread until its remaining bytes
    /// arrive.
    pub fn produce_frame(&mut self) -> SourceResult<Option<TelemetryFrame>> {
        self.open()?;
        let locator = self.locator();
        let reader = self.reader.as_mut().ok_or(SourceError::NotSelected)?;

        let mut buf = [0u8; RECORD_LEN];
        let mut filled = 0;
        while filled < RECORD_LEN {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => return Err(SourceError::Read { locator, source }),
            }
        }

        match filled {
            0 => Ok(None),
            RECORD_LEN => Ok(Some(TelemetryFrame::decode(&buf))),
            partial => {
                reader
                    .seek_relative(-(partial as i64))
                    .map_err(|source| SourceError::Read { locator, source })?;
                debug!(partial, "incomplete record, waiting for the rest");
                Ok(None)
            }
        }
    }
}
