//! Run-window gate - limits processing to a configured band of hours.

use chrono::Timelike;

use crate::error::{IntakeError, Result};

/// Source of the current local hour, injectable for tests.
pub trait Clock: Send {
    /// Current local hour in 0-23.
    fn current_hour(&self) -> u32;
}

/// Wall-clock hours via chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}

/// Active band of hours during which the loop keeps processing.
///
/// The band is `[start, end)` and may cross midnight (e.g. "22,6" runs from
/// 22:00 to 06:00). Equal bounds make the band empty, so the gate is always
/// closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    pub start: u32,
    pub end: u32,
}

impl RunWindow {
    /// Build a window, validating both bounds are in 0-23.
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > 23 || end > 23 {
            return Err(IntakeError::Config(format!("run hours must be 0-23, got {},{}", start, end)));
        }
        Ok(Self { start, end })
    }

    /// Parse a window from "startHour,endHour".
    pub fn parse(hours: &str) -> Result<Self> {
        let parts: Vec<&str> = hours.split(',').map(str::trim).collect();
        let (start, end) = match parts.as_slice() {
            [start, end] => (*start, *end),
            _ => {
                return Err(IntakeError::Config(format!(
                    "run hours must be two comma-separated integers, got '{}'",
                    hours
                )));
            }
        };
        let start: u32 = start
            .parse()
            .map_err(|_| IntakeError::Config(format!("invalid start hour '{}'", start)))?;
        let end: u32 = end
            .parse()
            .map_err(|_| IntakeError::Config(format!("invalid end hour '{}'", end)))?;
        Self::new(start, end)
    }

    /// Whether the gate is closed at `hour`, i.e. the hour falls in the
    /// inactive band outside `[start, end)`.
    ///
    /// For a midnight-crossing window (start > end) this is exactly
    /// `hour >= end && hour < start`.
    pub fn is_closed(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour < self.start || hour >= self.end
        } else {
            hour >= self.end && hour < self.start
        }
    }
}
