use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::platform;

/// Open `url`, trying the configured browser command first and the
/// platform's default handler after it.
pub fn open_url(url: &str, browser: Option<&str>) -> Result<()> {
    if let Some(browser) = browser {
        match spawn_browser(browser, url) {
            Ok(()) => {
                info!("opened {} in {}", url, browser);
                return Ok(());
            }
            Err(e) => warn!("could not start browser `{}`: {:#}", browser, e),
        }
    }

    let mut cmd = platform::opener_command(url);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let mut child = cmd
        .spawn()
        .with_context(|| format!("launching {:?}", cmd.get_program()))?;
    // The opener returns quickly; reap it in the background.
    std::thread::spawn(move || {
        let _ = child.wait();
    });
    info!("opened {}", url);
    Ok(())
}

/// Launch a browser command with the URL appended. `~` in the program path
/// is expanded.
fn spawn_browser(browser: &str, url: &str) -> Result<()> {
    let mut parts = split_command(browser);
    if parts.is_empty() {
        bail!("empty browser command");
    }
    let program = platform::expand_home(&parts.remove(0));
    debug!(program = %program, "launching browser");
    std::process::Command::new(&program)
        .args(&parts)
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("spawning {}", program))?;
    Ok(())
}

/// Split a command line on whitespace, honouring double quotes so paths
/// such as `"C:\Program Files\Brave\brave.exe"` stay whole.
fn split_command(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in command.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plain_and_quoted() {
        assert_eq!(split_command("firefox --new-tab"), vec!["firefox", "--new-tab"]);
        assert_eq!(
            split_command(r#""C:\Program Files\Brave\brave.exe" --incognito"#),
            vec![r"C:\Program Files\Brave\brave.exe", "--incognito"]
        );
        assert!(split_command("   ").is_empty());
    }

    #[test]
    fn missing_browser_binary_is_an_error() {
        let err = spawn_browser("definitely-not-a-browser-xyz", "http://localhost:3020").unwrap_err();
        assert!(format!("{:#}", err).contains("definitely-not-a-browser-xyz"));
    }
}
