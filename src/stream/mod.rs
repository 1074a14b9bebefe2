//! Ordered, replayable change feeds.
//!
//! A stream hands out records in order and only moves its durable position
//! when the consumer calls [`ChangeStream::commit`], so a restart re-delivers
//! whatever was received but not yet committed.

pub mod file;
pub mod lsn;
pub mod slot;

pub use file::FileStream;
pub use lsn::Lsn;
pub use slot::{Slot, SlotStream};

use crate::{EventFormat, Result};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Position {
    /// Number of feed lines consumed once this record is committed.
    Line(u64),
    /// WAL location of a decoded change; the slot only advances on records
    /// that close a transaction.
    Wal { lsn: Lsn, closes_transaction: bool },
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Line(n) => write!(f, "line {n}"),
            Position::Wal { lsn, .. } => write!(f, "lsn {lsn}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub position: Position,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    Record(StreamRecord),
    /// Nothing arrived within the poll timeout.
    Idle,
    /// The feed is finite and fully read.
    Closed,
}

pub trait ChangeStream: Send {
    /// Waits up to `timeout` for the next record.
    fn poll(&mut self, timeout: Duration) -> Result<Next>;

    /// Durably records that everything up to `position` has been applied.
    fn commit(&mut self, position: &Position) -> Result<()>;

    fn format(&self) -> EventFormat;
}

impl<S: ChangeStream + ?Sized> ChangeStream for Box<S> {
    fn poll(&mut self, timeout: Duration) -> Result<Next> {
        (**self).poll(timeout)
    }

    fn commit(&mut self, position: &Position) -> Result<()> {
        (**self).commit(position)
    }

    fn format(&self) -> EventFormat {
        (**self).format()
    }
}
