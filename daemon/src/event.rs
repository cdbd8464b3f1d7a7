use std::fmt;

use chrono::{DateTime, Local};

use crate::gamelist::Game;
use crate::system::SystemInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// An emulator process running a game appeared.
    Start,
    /// The tracked emulator process exited.
    Stop,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Start => "START",
            Op::Stop => "STOP",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A game lifecycle transition. A `Stop` carries the same system and game as
/// the `Start` it closes.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub op: Op,
    pub time: DateTime<Local>,
    pub system: SystemInfo,
    pub game: Game,
}

impl Event {
    /// The matching `Stop` for this event, stamped `time`.
    pub fn stopped_at(&self, time: DateTime<Local>) -> Self {
        Self {
            op: Op::Stop,
            time,
            ..self.clone()
        }
    }
}
