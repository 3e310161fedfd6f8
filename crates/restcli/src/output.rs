use std::io::Write;

use anyhow::Result;
use console::style;
use restcache::response::Response;

/// Prints the status line to stderr and the body to stdout.
///
/// JSON bodies are pretty printed, anything else is written as is.
pub fn print_response(response: &Response, with_body: bool) -> Result<()> {
    let status = response.status();
    let status_line = if status.is_error() {
        style(status.to_string()).red()
    } else {
        style(status.to_string()).green()
    };
    eprintln!("{status_line} {}", style(format!("({})", response.trace())).dim());
    if let Some(location) = response.redirection() {
        eprintln!("Location: {location}");
    }

    if !with_body {
        return Ok(());
    }

    let is_json = response
        .mime_type()
        .is_some_and(|mime| mime.contains("json"));
    if is_json {
        if let Ok(value) = response.content_as_json() {
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }
    }

    let bytes = response.content_as_bytes()?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    Ok(())
}
