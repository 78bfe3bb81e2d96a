use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Academic term within a year. There is no stored summer term: dates that
/// fall into the summer break resolve to the spring term of the same
/// academic year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Term {
    First,
    Second,
}

impl Term {
    pub fn as_str(&self) -> &'static str {
        match self {
            Term::First => "HK1",
            Term::Second => "HK2",
        }
    }
}

/// An academic period token scoping registrations and transfer requests,
/// e.g. `HK1-2025` for the fall term of the academic year starting 2025.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Semester {
    pub term: Term,
    pub year: i32,
}

impl Semester {
    pub fn new(term: Term, year: i32) -> Self {
        Self { term, year }
    }

    /// Resolves the semester a calendar date belongs to. The academic year
    /// starts in September; January still belongs to the previous fall
    /// term, and July/August fall back to the spring term.
    pub fn for_date(date: NaiveDate) -> Self {
        let year = date.year();
        match date.month() {
            9..=12 => Semester::new(Term::First, year),
            1 => Semester::new(Term::First, year - 1),
            2..=6 => Semester::new(Term::Second, year - 1),
            _ => Semester::new(Term::Second, year - 1),
        }
    }

    /// The semester that follows this one, used when extending a contract.
    pub fn next(&self) -> Self {
        match self.term {
            Term::First => Semester::new(Term::Second, self.year),
            Term::Second => Semester::new(Term::First, self.year + 1),
        }
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.term.as_str(), self.year)
    }
}

impl FromStr for Semester {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (term, year) = s
            .split_once('-')
            .ok_or_else(|| format!("malformed semester token '{s}'"))?;
        let term = match term {
            "HK1" => Term::First,
            "HK2" => Term::Second,
            other => return Err(format!("unknown term '{other}'")),
        };
        let year = year
            .parse::<i32>()
            .map_err(|_| format!("malformed semester year in '{s}'"))?;
        Ok(Semester::new(term, year))
    }
}

impl From<Semester> for String {
    fn from(value: Semester) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Semester {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
