/* 📖 # Why does the library ship an HTTP client for tests?

Both the server's own tests and the end-to-end tests of the analysis endpoints need to
talk to a real listening socket. The requests are always the same shape, a single
`GET` with `Connection: close`, so one small raw-TCP client serves every suite instead
of each test module writing its own.
*/

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

use crate::{RabbitResult, ResultExt, err};

/// Send `GET <target>` to `address` and return the status code and body.
pub fn http_get(address: SocketAddr, target: &str) -> RabbitResult<(u16, String)> {
    let mut stream =
        TcpStream::connect(address).with_context(|| format!("connecting to {}", address))?;
    write!(
        stream,
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        target
    )
    .context("sending request")?;

    let mut raw = String::new();
    stream.read_to_string(&mut raw).context("reading response")?;
    let status = raw
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| err!("Malformed status line: '{}'", raw.lines().next().unwrap_or("")))?;
    let body = raw
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    Ok((status, body))
}
