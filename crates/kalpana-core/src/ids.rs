use std::fmt;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const COUNTER_WIDTH: usize = 6;

/// Issues `REQ-<YYYYMMDDHHMMSS>-<counter>` identifiers.
///
/// The timestamp part is clamped so it never goes backwards, which keeps the
/// identifiers strictly increasing even if the wall clock is stepped back.
/// When the counter outgrows its padding the timestamp moves forward a second
/// so the longer identifier still sorts after the shorter ones.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: u64,
    last_stamp: Option<OffsetDateTime>,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, now: OffsetDateTime) -> RequestId {
        let now = now.to_offset(time::UtcOffset::UTC);
        let previous = self.counter;
        self.counter = self.counter.saturating_add(1);
        let mut stamp = match self.last_stamp {
            Some(last) if last > now => last,
            _ => now,
        };
        if counter_width(self.counter) > counter_width(previous) {
            if let Some(last) = self.last_stamp {
                if stamp < last + time::Duration::SECOND {
                    stamp = last + time::Duration::SECOND;
                }
            }
        }
        self.last_stamp = Some(stamp);

        let format = format_description!("[year][month][day][hour][minute][second]");
        let rendered = stamp
            .format(&format)
            .unwrap_or_else(|_| "00000000000000".to_string());
        RequestId(format!("REQ-{rendered}-{:0width$}", self.counter, width = COUNTER_WIDTH))
    }

    /// Number of identifiers handed out so far.
    pub fn issued(&self) -> u64 {
        self.counter
    }
}

fn counter_width(counter: u64) -> usize {
    counter.to_string().len().max(COUNTER_WIDTH)
}
