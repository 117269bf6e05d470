use slog::Drain;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;

/// Logger that appends to `path`. The file and its parent directories are created if missing.
pub fn file_logger<P: AsRef<Path>>(path: P) -> io::Result<slog::Logger> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Ok(slog::Logger::root(drain, slog::o!()))
}

/// Logger for interactive tools. Writes to stderr so stdout stays clean.
pub fn terminal_logger(level: slog::Level) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!())
}
