use std::{fmt, io::BufRead, str::FromStr};

use clap::ArgMatches;
use log::LevelFilter;

/// LogLevel
///
/// Represents minimum level of messages that will be logged
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLevel {
    pub level: usize,
}

impl FromStr for LogLevel {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel { level: 0 }),
            "warn" => Ok(LogLevel { level: 1 }),
            "info" => Ok(LogLevel { level: 2 }),
            "debug" => Ok(LogLevel { level: 3 }),
            "trace" => Ok(LogLevel { level: 4 }),
            "none" => Ok(LogLevel { level: 5 }),
            _ => Err("no match"),
        }
    }
}

impl LogLevel {
    pub fn is_none(&self) -> bool {
        self.level > 4
    }
    /// Verbosity as understood by stderrlog; 0 when logging is off
    pub fn get_level(&self) -> usize {
        if self.is_none() {
            0
        } else {
            self.level
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self.level {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            4 => "trace",
            5 => "none",
            _ => "unknown",
        };
        f.write_str(s)
    }
}

/// Initialize logging from command line arguments
pub fn init_log(m: &ArgMatches) -> anyhow::Result<()> {
    let verbose = m
        .get_one::<LogLevel>("loglevel")
        .copied()
        .unwrap_or(LogLevel { level: 2 });
    let quiet = verbose.is_none() || m.get_flag("quiet");
    let ts = m
        .get_one::<stderrlog::Timestamp>("timestamp")
        .copied()
        .unwrap_or(stderrlog::Timestamp::Off);

    stderrlog::new()
        .quiet(quiet)
        .verbosity(verbose.get_level())
        .timestamp(ts)
        .init()?;
    Ok(())
}

/// Caps the global log level while alive, restoring the previous level on drop
pub struct MaxLevelGuard {
    previous: LevelFilter,
}

impl MaxLevelGuard {
    pub fn cap(level: LevelFilter) -> Self {
        let previous = log::max_level();
        log::set_max_level(previous.min(level));
        Self { previous }
    }
}

impl Drop for MaxLevelGuard {
    fn drop(&mut self) {
        log::set_max_level(self.previous)
    }
}

/// Read in next line and split on tabs after trimming white space
pub fn get_next_line<'a, R: BufRead>(
    rdr: &mut R,
    buf: &'a mut String,
) -> anyhow::Result<Option<Vec<&'a str>>> {
    buf.clear();
    Ok(match rdr.read_line(buf)? {
        0 => None,
        _ => Some(buf.trim().split('\t').collect()),
    })
}

/// Round x to the given number of decimal places
pub fn round_to(x: f64, digits: u32) -> f64 {
    let m = 10f64.powi(digits as i32);
    (x * m).round() / m
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn log_level_names() {
        assert_eq!(LogLevel::from_str("WARN").unwrap().level, 1);
        assert!(LogLevel::from_str("none").unwrap().is_none());
        assert_eq!(LogLevel::from_str("none").unwrap().get_level(), 0);
        assert!(LogLevel::from_str("loud").is_err());
        assert_eq!(LogLevel { level: 3 }.to_string(), "debug");
        for s in ["error", "warn", "info", "debug", "trace", "none"] {
            assert_eq!(LogLevel::from_str(s).unwrap().to_string(), s);
        }
        assert_eq!(LogLevel { level: 9 }.to_string(), "unknown");
        assert_eq!(LogLevel { level: 9 }.get_level(), 0);
    }

    #[test]
    fn next_line_splits_on_tabs() {
        let mut rdr = Cursor::new("a.bam\textra\n\n  b.bam  \n");
        let mut buf = String::new();
        assert_eq!(
            get_next_line(&mut rdr, &mut buf).unwrap(),
            Some(vec!["a.bam", "extra"])
        );
        assert_eq!(get_next_line(&mut rdr, &mut buf).unwrap(), Some(vec![""]));
        assert_eq!(get_next_line(&mut rdr, &mut buf).unwrap(), Some(vec!["b.bam"]));
        assert_eq!(get_next_line(&mut rdr, &mut buf).unwrap(), None);
    }

    #[test]
    fn level_cap_restored() {
        log::set_max_level(LevelFilter::Debug);
        {
            let _quiet = MaxLevelGuard::cap(LevelFilter::Warn);
            assert_eq!(log::max_level(), LevelFilter::Warn);
        }
        assert_eq!(log::max_level(), LevelFilter::Debug);
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(3.14159, 2), 3.14);
        assert_eq!(round_to(2.675, 0), 3.0);
        assert_eq!(round_to(-1.005, 1), -1.0);
    }
}
