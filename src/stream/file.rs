//! Newline-delimited JSON feed with a sidecar checkpoint.
//!
//! The checkpoint (`<feed>.offset`) holds the number of lines whose effect is
//! committed. It is rewritten through a temp file and a rename so a crash
//! leaves either the old or the new value.

use super::{ChangeStream, Next, Position, StreamRecord};
use crate::{Error, EventFormat, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub struct FileStream {
    path: PathBuf,
    checkpoint: PathBuf,
    reader: BufReader<File>,
    lines_read: u64,
    pending: Vec<u8>,
    follow: bool,
    format: EventFormat,
}

impl FileStream {
    /// Opens `path` and skips the lines already committed by a previous run.
    /// With `follow`, reaching the end of the file waits for more lines
    /// instead of closing the stream.
    pub fn open(path: &Path, format: EventFormat, follow: bool) -> Result<Self> {
        let checkpoint = checkpoint_path(path);
        let committed = read_checkpoint(&checkpoint)?;
        let mut reader = BufReader::new(File::open(path)?);
        let mut skipped = 0;
        let mut buf = Vec::new();
        while skipped < committed {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Err(Error::Config(format!(
                    "{} has {skipped} lines but checkpoint says {committed} were applied",
                    path.display()
                )));
            }
            skipped += 1;
        }
        if committed > 0 {
            info!(feed = %path.display(), committed, "resuming feed after checkpoint");
        }
        Ok(Self {
            path: path.to_path_buf(),
            checkpoint,
            reader,
            lines_read: committed,
            pending: Vec::new(),
            follow,
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines committed so far, as persisted in the checkpoint.
    pub fn committed(&self) -> Result<u64> {
        read_checkpoint(&self.checkpoint)
    }
}

impl ChangeStream for FileStream {
    /// Lines are passed through as raw bytes; one that is not valid JSON
    /// (or not even UTF-8) is left for the decoder to reject.
    fn poll(&mut self, timeout: Duration) -> Result<Next> {
        loop {
            let mut buf = Vec::new();
            let n = self.reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                if self.follow {
                    // A partial trailing line stays in `pending` until its newline lands.
                    std::thread::sleep(timeout);
                    return Ok(Next::Idle);
                }
                if self.pending.is_empty() {
                    return Ok(Next::Closed);
                }
            } else {
                self.pending.extend_from_slice(&buf);
                if self.pending.last() != Some(&b'\n') {
                    continue;
                }
            }
            self.lines_read += 1;
            let line = std::mem::take(&mut self.pending);
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            return Ok(Next::Record(StreamRecord {
                position: Position::Line(self.lines_read),
                payload: line.to_vec(),
            }));
        }
    }

    fn commit(&mut self, position: &Position) -> Result<()> {
        let Position::Line(lines) = position else {
            return Err(Error::Config(format!(
                "{position} does not belong to feed {}",
                self.path.display()
            )));
        };
        let tmp = self.checkpoint.with_extension("offset.tmp");
        {
            let mut file = File::create(&tmp)?;
            writeln!(file, "{lines}")?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.checkpoint)?;
        Ok(())
    }

    fn format(&self) -> EventFormat {
        self.format
    }
}

fn checkpoint_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".offset");
    PathBuf::from(name)
}

fn read_checkpoint(path: &Path) -> Result<u64> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("corrupt checkpoint {}", path.display()))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err.into()),
    }
}
