use console::style;
use log::{Level, LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;

use crate::env;

#[derive(Debug)]
struct Logger {
    level: LevelFilter,
}

static LOGGER: OnceCell<Logger> = OnceCell::new();

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        eprintln!("{} {}", prefix(record.level()), record.args());
    }

    fn flush(&self) {}
}

fn prefix(level: Level) -> String {
    let name = style("cirun").magenta().bold();
    match level {
        Level::Error => format!("{name} {}", style("ERROR").red().bold()),
        Level::Warn => format!("{name} {}", style("WARN").yellow().bold()),
        Level::Info => format!("{name}"),
        Level::Debug => format!("{name} {}", style("DEBUG").blue()),
        Level::Trace => format!("{name} {}", style("TRACE").dim()),
    }
}

/// Installs the stderr logger. `level` overrides `CIRUN_LOG`.
pub fn init(level: Option<LevelFilter>) {
    let level = level.unwrap_or(*env::CIRUN_LOG);
    let logger = LOGGER.get_or_init(|| Logger { level });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(logger.level);
    }
}
