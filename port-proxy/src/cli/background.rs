//! Detaching the daemon from the launching terminal.
//!
//! The current executable is started again with `-f` and the same settings.
//! Its logs go to `<exe>.log` and its process id to `<exe>.pid`.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use eyre::WrapErr;
use port_proxy::ProxyConfig;
use port_proxy_token::{Token, TokenHash};

/// `<exe><suffix>`, e.g. `/usr/bin/port-proxy.log`
pub fn sibling_path(exe: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(exe.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn duration_arg(duration: Duration) -> String {
    format!("{}ns", duration.as_nanos())
}

/// Flags for the foreground child.
pub fn child_args(
    config: &ProxyConfig,
    log_path: &Path,
    token_hash: Option<&TokenHash>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-f".into(),
        format!("--ip={}", config.listen_ip).into(),
        "--log".into(),
        log_path.as_os_str().to_owned(),
        "--srt".into(),
        duration_arg(config.timeouts.read).into(),
        "--swt".into(),
        duration_arg(config.timeouts.write).into(),
    ];
    for port in &config.forward_ports {
        args.push("-p".into());
        args.push(port.to_string().into());
    }
    if let Some(hash) = token_hash {
        args.push("--token-hash".into());
        args.push(hash.to_string().into());
    }
    if config.verbose {
        args.push("-v".into());
    }
    args
}

pub fn write_pid_file(path: &Path, pid: u32) -> eyre::Result<()> {
    std::fs::write(path, pid.to_string())
        .wrap_err_with(|| format!("failed to write pid file '{}'", path.display()))
}

/// Start the daemon in the background and return its process id.
///
/// A verified token is handed to the child on its standard input so it can
/// check it again before serving.
pub fn start(
    config: &ProxyConfig,
    token_hash: Option<&TokenHash>,
    token: Option<&Token>,
) -> eyre::Result<u32> {
    let exe = std::env::current_exe().wrap_err("failed to locate current executable")?;
    let args = child_args(config, &sibling_path(&exe, ".log"), token_hash);

    let mut command = Command::new(&exe);
    command
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    println!("Run cmd: {} {}", exe.display(), display_args(&args));

    let mut child = command
        .spawn()
        .wrap_err_with(|| format!("failed to start '{}'", exe.display()))?;
    if let Some(mut stdin) = child.stdin.take() {
        if let Some(token) = token {
            writeln!(stdin, "{token}").wrap_err("failed to pass token to daemon")?;
        }
    }

    let pid = child.id();
    println!("Daemon process ID is: {pid}");
    write_pid_file(&sibling_path(&exe, ".pid"), pid)?;
    println!("Proxy started in background.");
    Ok(pid)
}

fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use port_proxy::{ForwardPort, Timeouts};

    #[test]
    fn test_sibling_path() {
        let exe = Path::new("/opt/bin/port-proxy");
        assert_eq!(sibling_path(exe, ".log"), Path::new("/opt/bin/port-proxy.log"));
        assert_eq!(sibling_path(exe, ".pid"), Path::new("/opt/bin/port-proxy.pid"));
    }

    #[test]
    fn test_child_args_round_trip_settings() {
        let config = ProxyConfig::new(
            "",
            vec![ForwardPort::new(80, 8080), ForwardPort::new(443, 8443)],
        )
        .with_timeouts(Timeouts::new(
            Duration::from_secs(30),
            Duration::from_millis(1500),
        ))
        .with_verbose(true);

        let args = child_args(&config, Path::new("/tmp/pp.log"), None);
        let args: Vec<String> = args
            .into_iter()
            .map(|arg| arg.into_string().unwrap())
            .collect();
        assert_eq!(
            args,
            [
                "-f",
                "--ip=",
                "--log",
                "/tmp/pp.log",
                "--srt",
                "30000000000ns",
                "--swt",
                "1500000000ns",
                "-p",
                "80:8080",
                "-p",
                "443:8443",
                "-v",
            ]
        );
        assert_eq!(
            port_proxy::parse_duration(&args[7]).unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_child_args_pass_token_hash() {
        let hash = TokenHash::derive(&Token::generate());
        let config = ProxyConfig::new("127.0.0.1", vec![ForwardPort::new(1, 2)]);
        let args = child_args(&config, Path::new("x.log"), Some(&hash));
        let position = args.iter().position(|arg| arg == "--token-hash").unwrap();
        assert_eq!(args[position + 1], OsString::from(hash.to_string()));
        assert!(!args.iter().any(|arg| arg == "-v"));
    }

    #[test]
    fn test_write_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port-proxy.pid");
        write_pid_file(&path, 4242).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242");
    }
}
