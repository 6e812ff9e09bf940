use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identity of an author, committer, or tagger, with its timestamp.
///
/// The canonical text form is the one embedded in commit and tag objects:
/// `Name <email> <unix-seconds> <+|->HHMM`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonIdent {
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub when: i64,
    /// Timezone offset in minutes east of UTC.
    pub tz_offset: i32,
}

impl PersonIdent {
    pub fn new(name: impl Into<String>, email: impl Into<String>, when: i64, tz_offset: i32) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            when,
            tz_offset,
        }
    }

    /// Parse the canonical text form.
    pub fn parse(line: &str) -> Result<Self, TypeError> {
        let open = line
            .find('<')
            .ok_or_else(|| TypeError::MalformedIdent(line.to_string()))?;
        let close = line
            .find('>')
            .filter(|&c| c > open)
            .ok_or_else(|| TypeError::MalformedIdent(line.to_string()))?;

        let name = line[..open].trim_end().to_string();
        let email = line[open + 1..close].to_string();

        let rest = line[close + 1..].trim();
        let mut parts = rest.split_whitespace();
        let when: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| TypeError::MalformedIdent(line.to_string()))?;
        let tz = parts
            .next()
            .ok_or_else(|| TypeError::MalformedIdent(line.to_string()))?;
        if tz.len() != 5 || (!tz.starts_with('+') && !tz.starts_with('-')) {
            return Err(TypeError::MalformedIdent(line.to_string()));
        }
        let hours: i32 = tz[1..3]
            .parse()
            .map_err(|_| TypeError::MalformedIdent(line.to_string()))?;
        let minutes: i32 = tz[3..5]
            .parse()
            .map_err(|_| TypeError::MalformedIdent(line.to_string()))?;
        let mut tz_offset = hours * 60 + minutes;
        if tz.starts_with('-') {
            tz_offset = -tz_offset;
        }

        Ok(Self {
            name,
            email,
            when,
            tz_offset,
        })
    }
}

impl fmt::Display for PersonIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.tz_offset < 0 { '-' } else { '+' };
        let abs = self.tz_offset.abs();
        write!(
            f,
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.when,
            sign,
            abs / 60,
            abs % 60
        )
    }
}
