//! Synthetic record model and its tab-delimited wire form.
//!
//! Every field except `created_at` is a pure function of the record index.
//! Categorical fields are drawn from small closed sets, so no value ever
//! contains a tab or a newline and the text COPY format needs no escaping.
//!
//! ```text
//! user_name_0\tuser0@example.com\t20\tNew York\tUSA\t30000.00\tEngineering\t2020-01-01\ttrue\t2024-01-01T00:00:00.000Z\n
//! ```

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

/// Column order of the delimited line and of the COPY column list.
pub const COLUMNS: [&str; 10] = [
    "name",
    "email",
    "age",
    "city",
    "country",
    "salary",
    "department",
    "hire_date",
    "is_active",
    "created_at",
];

/// Field separator of the delimited line.
pub const FIELD_DELIMITER: char = '\t';

/// Cities, indexed by `i % 5`.
pub const CITIES: [&str; 5] = ["New York", "London", "Tokyo", "Berlin", "Sydney"];

/// Countries, indexed by `i % 5`.
pub const COUNTRIES: [&str; 5] = ["USA", "UK", "Japan", "Germany", "Australia"];

/// Departments, indexed by `i % 5`.
pub const DEPARTMENTS: [&str; 5] = ["Engineering", "Sales", "Marketing", "HR", "Finance"];

/// First hire year; hire years cycle through four years from here.
pub const BASE_HIRE_YEAR: i32 = 2020;

/// One synthetic row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Position in the produced sequence.
    pub index: u64,
    /// `user_name_{i}`.
    pub name: String,
    /// `user{i}@example.com`.
    pub email: String,
    /// `20 + i % 50`.
    pub age: u32,
    /// Closed-set city.
    pub city: &'static str,
    /// Closed-set country.
    pub country: &'static str,
    /// Whole currency units, `30000 + i % 70000`.
    pub salary: u32,
    /// Closed-set department.
    pub department: &'static str,
    /// Derived calendar date, no time component.
    pub hire_date: NaiveDate,
    /// `i % 2 == 0`.
    pub is_active: bool,
    /// Generation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Record {
    /// Derives the record at `index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // all moduli fit in u32
    pub fn at(index: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            index,
            name: format!("user_name_{index}"),
            email: format!("user{index}@example.com"),
            age: 20 + (index % 50) as u32,
            city: pick(&CITIES, index),
            country: pick(&COUNTRIES, index),
            salary: 30_000 + (index % 70_000) as u32,
            department: pick(&DEPARTMENTS, index),
            hire_date: hire_date(index),
            is_active: index % 2 == 0,
            created_at,
        }
    }

    /// Salary rendered with two fixed decimals.
    #[must_use]
    pub fn salary_text(&self) -> String {
        format!("{:.2}", f64::from(self.salary))
    }

    /// Renders the delimited line, including the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for Record {
    /// Writes the ten fields joined by tabs, without the line terminator.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.name,
            self.email,
            self.age,
            self.city,
            self.country,
            self.salary_text(),
            self.department,
            self.hire_date.format("%Y-%m-%d"),
            self.is_active,
            self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

/// Hire date for `index`: year `2020 + i % 4`, month `1 + i % 12`, day `1 + i % 28`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn hire_date(index: u64) -> NaiveDate {
    let year = BASE_HIRE_YEAR + (index % 4) as i32;
    let month = 1 + (index % 12) as u32;
    let day = 1 + (index % 28) as u32;
    // Day never exceeds 28, so every triple is a valid date.
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

#[allow(clippy::cast_possible_truncation)]
fn pick(table: &[&'static str], index: u64) -> &'static str {
    table[(index % table.len() as u64) as usize]
}
