use std::time::{SystemTime, UNIX_EPOCH};

const SECONDS_PER_DAY: i64 = 86400;
const MIN_DOS_YEAR: u16 = 1980;
const MAX_DOS_YEAR: u16 = 2107;

/// An MS-DOS timestamp with 2-second precision.
///
/// MS-DOS timestamps are stored as packed 16-bit values for date and time,
/// limited to the years 1980 through 2107. Timestamps are interpreted as
/// UTC when converted to and from [`SystemTime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DosDateTime {
    // date first so the derived ordering is chronological
    date: u16,
    time: u16,
}

impl DosDateTime {
    /// The earliest representable timestamp, 1980-01-01 00:00:00.
    pub const MIN: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// Creates a timestamp from packed time and date values.
    #[must_use]
    pub const fn new(time: u16, date: u16) -> Self {
        Self { time, date }
    }

    /// Creates a timestamp from broken down components, saturating the year
    /// to the DOS range.
    #[must_use]
    pub fn from_components(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        if year < MIN_DOS_YEAR {
            return Self::MIN;
        }

        if year > MAX_DOS_YEAR {
            return Self::from_components(MAX_DOS_YEAR, 12, 31, 23, 59, 58);
        }

        let date = ((year - MIN_DOS_YEAR) << 9) | (u16::from(month) << 5) | u16::from(day);
        let time = (u16::from(hour) << 11) | (u16::from(minute) << 5) | (u16::from(second) / 2);
        Self { time, date }
    }

    /// Converts seconds since the Unix epoch, clamping to the DOS range.
    #[must_use]
    pub fn from_unix(seconds: i64) -> Self {
        let (year, month, day, hour, minute, second) = unix_timestamp_to_components(seconds);
        Self::from_components(year, month, day, hour, minute, second)
    }

    /// Converts a system time, clamping to the DOS range.
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::from_unix(i64::try_from(d.as_secs()).unwrap_or(i64::MAX)),
            Err(_) => Self::MIN,
        }
    }

    /// Returns the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Returns the year (1980-2107).
    #[must_use]
    pub fn year(&self) -> u16 {
        ((self.date >> 9) & 0x7f) + MIN_DOS_YEAR
    }

    /// Returns the month (1-12).
    #[must_use]
    pub fn month(&self) -> u8 {
        (((self.date >> 5) & 0x0f) as u8).clamp(1, 12)
    }

    /// Returns the day of the month (1-31).
    #[must_use]
    pub fn day(&self) -> u8 {
        ((self.date & 0x1f) as u8).clamp(1, last_day_of_month(self.year(), self.month()))
    }

    #[must_use]
    pub fn hour(&self) -> u8 {
        (((self.time >> 11) & 0x1f) as u8).min(23)
    }

    #[must_use]
    pub fn minute(&self) -> u8 {
        (((self.time >> 5) & 0x3f) as u8).min(59)
    }

    /// Returns the second (0-58, always even).
    #[must_use]
    pub fn second(&self) -> u8 {
        (((self.time & 0x1f) * 2) as u8).min(58)
    }

    /// Returns the packed time and date components as (time, date).
    #[must_use]
    pub const fn into_parts(self) -> (u16, u16) {
        (self.time, self.date)
    }

    /// Seconds since the Unix epoch.
    #[must_use]
    pub fn to_unix(&self) -> i64 {
        let days = days_from_civil(self.year(), self.month(), self.day());
        days * SECONDS_PER_DAY
            + i64::from(self.hour()) * 3600
            + i64::from(self.minute()) * 60
            + i64::from(self.second())
    }

    #[must_use]
    pub fn to_system_time(&self) -> SystemTime {
        // the DOS range starts after the epoch
        UNIX_EPOCH + std::time::Duration::from_secs(self.to_unix().max(0) as u64)
    }
}

/// Convert Unix timestamp to broken down date/time components
///
/// Based on Howard Hinnant's `civil_from_days`:
///
/// <https://howardhinnant.github.io/date_algorithms.html#civil_from_days>
fn unix_timestamp_to_components(timestamp: i64) -> (u16, u8, u8, u8, u8, u8) {
    let total_days = timestamp.div_euclid(SECONDS_PER_DAY);
    let seconds_in_day = timestamp.rem_euclid(SECONDS_PER_DAY);

    let hour = (seconds_in_day / 3600) as u8;
    let minute = ((seconds_in_day % 3600) / 60) as u8;
    let second = (seconds_in_day % 60) as u8;

    // Shift epoch from 1970-01-01 to 0000-03-01
    let z = total_days + 719468;
    let era = z.div_euclid(146097);
    let doe = z.rem_euclid(146097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = era * 400 + yoe + i64::from(month <= 2);

    let year = year.clamp(0, i64::from(u16::MAX)) as u16;
    (year, month, day, hour, minute, second)
}

/// Inverse of [`unix_timestamp_to_components`] for the date part.
fn days_from_civil(year: u16, month: u8, day: u8) -> i64 {
    let y = i64::from(year) - i64::from(month <= 2);
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let m = i64::from(month);
    let mp = if m > 2 { m - 3 } else { m + 9 };
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

const fn is_leap(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

const fn last_day_of_month(year: u16, month: u8) -> u8 {
    if month == 2 && is_leap(year) {
        29
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31][(month - 1) as usize]
    }
}
