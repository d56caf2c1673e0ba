//! Ticket material and its lifetime.

use std::fmt;

use crate::authority::{CredsData, Timestamp};
use crate::context::AuthContext;
use crate::error::Result;

/// Where a ticket stands against the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    /// Still valid.
    Fresh,
    /// Expired, but can be renewed.
    Renewable,
    /// Expired and past its renewal limit. Needs new credentials from the keytab.
    MustReinit,
}

impl TicketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Renewable => "renewable",
            Self::MustReinit => "must reinit",
        }
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials issued, renewed or read back from a cache.
#[derive(Debug)]
pub struct Creds {
    context: AuthContext,
    data: CredsData,
}

impl Creds {
    pub fn new(context: &AuthContext, data: CredsData) -> Self {
        Self {
            context: context.clone(),
            data,
        }
    }

    pub fn data(&self) -> &CredsData {
        &self.data
    }

    pub fn start_time(&self) -> Timestamp {
        self.data.times.start_time
    }

    pub fn end_time(&self) -> Timestamp {
        self.data.times.end_time
    }

    pub fn renew_till(&self) -> Timestamp {
        self.data.times.renew_till
    }

    /// Current state, against the library clock read right now.
    pub fn state(&self) -> Result<TicketState> {
        let now = self.now()?;
        Ok(self.state_at(now))
    }

    pub fn state_at(&self, now: Timestamp) -> TicketState {
        if now < self.end_time() {
            TicketState::Fresh
        } else if now < self.renew_till() {
            TicketState::Renewable
        } else {
            TicketState::MustReinit
        }
    }

    /// Seconds of validity left at `now`, zero once expired.
    pub fn remaining_at(&self, now: Timestamp) -> u64 {
        (self.end_time() - now).max(0) as u64
    }

    /// Ticket window for diagnostics, one field per line.
    pub fn times_info(&self) -> String {
        let now = self
            .context
            .session()
            .timeofday()
            .map(|now| self.format(now))
            .unwrap_or_else(|_| "unknown".to_string());

        format!(
            "now: {}\nstart time: {}\nend time: {}\nrenew until: {}",
            now,
            self.format(self.start_time()),
            self.format(self.end_time()),
            self.format(self.renew_till()),
        )
    }

    fn now(&self) -> Result<Timestamp> {
        self.context
            .check(self.context.session().timeofday(), "krb5_timeofday")
    }

    fn format(&self, timestamp: Timestamp) -> String {
        self.context
            .session()
            .timestamp_to_string(timestamp)
            .unwrap_or_else(|_| timestamp.to_string())
    }
}
