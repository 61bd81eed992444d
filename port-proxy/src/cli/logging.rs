use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

/// `--log` value that keeps logs on standard output
pub const STDOUT: &str = "stdout";

/// Install the global subscriber. `RUST_LOG` overrides the level chosen by
/// `verbose`.
pub fn init(log: &str, verbose: bool) -> eyre::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if log == STDOUT {
        builder.with_writer(std::io::stdout).try_init()
    } else {
        let file = open_log_file(Path::new(log))?;
        builder
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init()
    };
    installed.map_err(|e| eyre::eyre!("failed to install logger: {e}"))
}

/// Open `path` for appending, creating it if needed.
pub fn open_log_file(path: &Path) -> eyre::Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .wrap_err_with(|| format!("fail to open file '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port-proxy.log");

        writeln!(open_log_file(&path).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path).unwrap(), "second").unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[test]
    fn test_log_file_in_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_log_file(&dir.path().join("missing").join("x.log")).unwrap_err();
        assert!(err.to_string().contains("fail to open file"));
    }
}
