//! Run-scoped logger: colored console output and a timestamped log file within the output directory.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};
use fern::{
    Dispatch,
    colors::{Color, ColoredLevelConfig},
};
use crate::{
    Error,
    err::add_path,
    ext,
};

static ACTIVE: AtomicBool = AtomicBool::new(false);

lazy_static::lazy_static! {
    static ref ANSI_ESCAPE: regex::Regex = regex::Regex::new("\x1b\\[[0-9;]*m").unwrap();
}

/// Removes terminal color codes from the message.
fn strip_colors(s: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(s, "")
}

/// Returns true if the logger was installed.
pub(super) fn is_active() -> bool {
    ACTIVE.load(Ordering::Acquire)
}

/// Flushes all log destinations.
pub(super) fn flush() {
    log::logger().flush();
}

/// Log file name: `<group>_<date>_<time>.log`.
pub(super) fn log_filename(group: &str, now: &chrono::DateTime<chrono::Local>) -> String {
    format!("{}_{}.log", group, now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Handle of the installed logger. Flushes all destinations when dropped.
pub(super) struct RunLogger {
    filename: PathBuf,
}

impl RunLogger {
    /// Installs the logger: console (info and above) and `logs_dir/<group>_<timestamp>.log` (debug and above).
    /// Can be called only once per process.
    pub fn init(logs_dir: &Path, group: &str, debug: bool) -> Result<Self, Error> {
        ext::sys::mkdir(logs_dir)?;
        let filename = logs_dir.join(log_filename(group, &chrono::Local::now()));
        let file = fern::log_file(&filename).map_err(add_path!(filename))?;

        let colors = ColoredLevelConfig::default()
            .info(Color::Green)
            .debug(Color::Cyan);
        let console = Dispatch::new()
            .format(move |out, message, record| {
                out.finish(format_args!(
                    "[{} {:>5}] {}",
                    chrono::Local::now().format("%H:%M:%S"),
                    colors.color(record.level()),
                    message
                ))
            })
            .level(if debug { log::LevelFilter::Debug } else { log::LevelFilter::Info })
            .chain(std::io::stderr());
        let log_file = Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{} {:>5}  {}",
                    chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                    record.level(),
                    strip_colors(&message.to_string()),
                ))
            })
            .level(log::LevelFilter::Debug)
            .chain(file);
        Dispatch::new()
            .level(log::LevelFilter::Debug)
            .chain(console)
            .chain(log_file)
            .apply()
            .map_err(|e| Error::RuntimeError(format!("Cannot install logger: {}", e)))?;
        ACTIVE.store(true, Ordering::Release);
        Ok(Self { filename })
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }
}

impl Drop for RunLogger {
    fn drop(&mut self) {
        flush();
    }
}
