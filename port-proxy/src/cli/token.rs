use std::io::BufRead;

use eyre::WrapErr;
use port_proxy_token::{Token, TokenHash};

/// Print a fresh token together with the hash to provision for it.
pub fn print_generated() {
    let token = Token::generate();
    let hash = TokenHash::derive(&token);
    println!("Token: {token}");
    println!("Hash: {hash}");
}

/// Read the token and check it against `hash`.
///
/// On a terminal the token is prompted for without echo; otherwise the first
/// line of standard input is used.
pub fn obtain_verified(hash: &TokenHash) -> eyre::Result<Token> {
    let token = if atty::is(atty::Stream::Stdin) {
        prompt("Enter token: ")?
    } else {
        read_token(std::io::stdin().lock())?
    };
    hash.verify(&token).wrap_err("token verification failed")?;
    Ok(token)
}

/// Parse the first line of `reader` as a token.
pub fn read_token(mut reader: impl BufRead) -> eyre::Result<Token> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .wrap_err("failed to read token")?;
    parse(&line)
}

fn parse(text: &str) -> eyre::Result<Token> {
    text.trim().parse().wrap_err("invalid token")
}

#[cfg(unix)]
fn prompt(request: &str) -> eyre::Result<Token> {
    use std::io::Write;
    use termion::input::TermRead;

    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{request}")?;
    stdout.flush()?;

    let password = std::io::stdin()
        .lock()
        .read_passwd(&mut stdout)
        .wrap_err("failed to read token")?;
    writeln!(stdout)?;

    match password {
        Some(password) => parse(&password),
        None => eyre::bail!("no token entered"),
    }
}

#[cfg(not(unix))]
fn prompt(request: &str) -> eyre::Result<Token> {
    eprint!("{request}");
    read_token(std::io::stdin().lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_token_line() {
        let token = Token::generate();
        let input = format!("  {token}  \nignored\n");
        let read = read_token(input.as_bytes()).unwrap();
        assert_eq!(read, token);
        assert!(TokenHash::derive(&token).verify(&read).is_ok());
    }

    #[test]
    fn test_read_token_rejects_garbage() {
        assert!(read_token("not a token\n".as_bytes()).is_err());
        assert!(read_token("".as_bytes()).is_err());
    }
}
