//! Logger initialization for the CLI

use std::{fmt::Write, io::IsTerminal, str::FromStr};

use jiff::{Zoned, tz::TimeZone};
use logforth::{append::Stderr, filter::EnvFilter, layout::Layout};

/// Plain-text layout with UTC timestamps
#[derive(Debug)]
struct UtcLayout {
    no_color: bool,
}

impl Layout for UtcLayout {
    fn format(
        &self,
        record: &log::Record<'_>,
        _diagnostics: &[Box<dyn logforth::diagnostic::Diagnostic>],
    ) -> anyhow::Result<Vec<u8>> {
        let mut output = String::new();
        let now = Zoned::now().with_time_zone(TimeZone::UTC);

        write!(output, "{} ", now.strftime("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = if self.no_color {
            format!("{:>5}", record.level())
        } else {
            let color = match record.level() {
                log::Level::Error => 31,
                log::Level::Warn => 33,
                log::Level::Info => 32,
                log::Level::Debug => 34,
                log::Level::Trace => 35,
            };

            format!("\x1b[{color}m{:>5}\x1b[0m", record.level())
        };

        write!(output, "{level}  {}", record.args())?;

        Ok(output.into_bytes())
    }
}

/// Install the stderr logger.
///
/// `filter` is a string like "info" or "llm=debug"; an invalid filter falls
/// back to "warn".
pub fn init(filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::from_str(filter).or_else(|_| EnvFilter::from_str("warn"))?;

    let layout = UtcLayout {
        no_color: !std::io::stderr().is_terminal(),
    };

    logforth::builder()
        .dispatch(move |d| d.filter(filter).append(Stderr::default().with_layout(layout)))
        .apply();

    Ok(())
}
