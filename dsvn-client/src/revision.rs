//! Revision specifiers and ranges

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

use crate::error::{ClientError, Result};

/// Which version of a node an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Revision {
    #[default]
    Unspecified,
    Head,
    Base,
    Working,
    Committed,
    Previous,
    Number(u64),
    Date(DateTime<Utc>),
}

impl Revision {
    pub fn is_specified(&self) -> bool {
        !matches!(self, Revision::Unspecified)
    }

    /// Kinds that can only be answered from a working copy
    pub fn requires_working_copy(&self) -> bool {
        matches!(
            self,
            Revision::Base | Revision::Working | Revision::Committed | Revision::Previous
        )
    }

    /// Parse `HEAD`, `BASE`, `WORKING`, `COMMITTED`, `PREV`, a number, or `{date}`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.to_ascii_uppercase().as_str() {
            "HEAD" => return Ok(Revision::Head),
            "BASE" => return Ok(Revision::Base),
            "WORKING" => return Ok(Revision::Working),
            "COMMITTED" => return Ok(Revision::Committed),
            "PREV" => return Ok(Revision::Previous),
            _ => {}
        }
        if let Some(date) = s.strip_prefix('{').and_then(|d| d.strip_suffix('}')) {
            return parse_date(date).map(Revision::Date);
        }
        let digits = s.strip_prefix('r').unwrap_or(s);
        digits
            .parse::<u64>()
            .map(Revision::Number)
            .map_err(|_| ClientError::BadRevision(format!("Syntax error in revision argument '{}'", s)))
    }
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt.and_utc());
    }
    if let Some(dt) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(dt.and_utc());
    }
    Err(ClientError::BadRevision(format!("Invalid date '{}'", s)))
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Unspecified => f.write_str("unspecified"),
            Revision::Head => f.write_str("HEAD"),
            Revision::Base => f.write_str("BASE"),
            Revision::Working => f.write_str("WORKING"),
            Revision::Committed => f.write_str("COMMITTED"),
            Revision::Previous => f.write_str("PREV"),
            Revision::Number(n) => write!(f, "{}", n),
            Revision::Date(d) => write!(f, "{{{}}}", d.to_rfc3339()),
        }
    }
}

impl From<u64> for Revision {
    fn from(n: u64) -> Self {
        Revision::Number(n)
    }
}

/// A start/end pair; the traversal direction follows the pair's order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RevisionRange {
    pub start: Revision,
    pub end: Revision,
}

impl RevisionRange {
    pub fn new(start: impl Into<Revision>, end: impl Into<Revision>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Parse `N`, `N:M` or symbolic forms such as `HEAD:0`
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((start, end)) => Ok(Self::new(Revision::parse(start)?, Revision::parse(end)?)),
            None => {
                let rev = Revision::parse(s)?;
                Ok(Self::new(rev, rev))
            }
        }
    }
}

impl fmt::Display for RevisionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}
