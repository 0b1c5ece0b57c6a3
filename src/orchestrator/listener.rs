use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::orchestrator::signal::{RebootMode, Signal, SupervisorSignal};

/// What a key press asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Reboot(RebootMode),
    Quit,
    /// Flip the enabled flag of the N-th service (1-based).
    Toggle(usize),
    OpenBrowser,
    OpenTool,
    HealthCheck,
    ClearScreen,
}

/// Map a key to its command. Letters are case-insensitive except `C`, which
/// must be upper case so a stray `c` does not wipe the screen.
pub fn map_key(key: char) -> Option<Command> {
    match key {
        'C' => Some(Command::ClearScreen),
        // Ctrl-C delivered as a key when the console is in raw mode.
        '\u{3}' => Some(Command::Quit),
        '1'..='9' => key.to_digit(10).map(|n| Command::Toggle(n as usize)),
        _ => match key.to_ascii_lowercase() {
            'r' => Some(Command::Reboot(RebootMode::Full)),
            'f' => Some(Command::Reboot(RebootMode::Fast)),
            'q' => Some(Command::Quit),
            'o' => Some(Command::OpenBrowser),
            'p' => Some(Command::OpenTool),
            'd' => Some(Command::HealthCheck),
            _ => None,
        },
    }
}

/// A source of single key presses.
pub trait KeySource: Send {
    /// Wait up to `timeout` for a key. `Ok(None)` when none arrived.
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<char>>;
}

impl KeySource for crate::platform::TerminalKeys {
    fn poll_key(&mut self, timeout: Duration) -> io::Result<Option<char>> {
        crate::platform::TerminalKeys::poll_key(self, timeout)
    }
}

/// Builds a fresh key source for each cycle.
pub type KeySourceFactory = Box<dyn Fn() -> io::Result<Box<dyn KeySource>> + Send + Sync>;

/// The terminal on stdin.
pub fn terminal_keys() -> KeySourceFactory {
    Box::new(|| Ok(Box::new(crate::platform::TerminalKeys::new()?) as Box<dyn KeySource>))
}

/// Side effects of the commands that do not end the cycle.
pub trait CommandHandler: Send + Sync {
    fn toggle(&self, n: usize);
    fn open_browser(&self);
    fn open_tool(&self);
    fn health_check(&self);
    fn clear_screen(&self);
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("could not open keyboard input")]
    Open(#[source] io::Error),
    #[error("keyboard input failed")]
    Input(#[source] io::Error),
}

/// Reads keys on its own thread and turns them into signal requests or
/// handler calls. Stops as soon as the signal is no longer `Continue`,
/// whichever side set it.
pub struct CommandListener<H: ?Sized> {
    signal: Arc<SupervisorSignal>,
    handler: Arc<H>,
    poll: Duration,
}

impl<H: CommandHandler + ?Sized + 'static> CommandListener<H> {
    pub fn new(signal: Arc<SupervisorSignal>, handler: Arc<H>, poll: Duration) -> Self {
        Self {
            signal,
            handler,
            poll,
        }
    }

    /// Start the listener thread. Input errors end the listener only; the
    /// supervisor keeps running without keyboard control.
    pub fn spawn(self, factory: &KeySourceFactory) -> io::Result<JoinHandle<Result<(), ListenerError>>> {
        let keys = factory();
        std::thread::Builder::new()
            .name("devcycle-keys".to_string())
            .spawn(move || {
                let result = keys.map_err(ListenerError::Open).and_then(|keys| self.run(keys));
                if let Err(e) = &result {
                    let (ListenerError::Open(cause) | ListenerError::Input(cause)) = e;
                    warn!("{}: {}; keyboard commands disabled for this cycle", e, cause);
                }
                result
            })
    }

    fn run(&self, mut keys: Box<dyn KeySource>) -> Result<(), ListenerError> {
        while self.signal.is_continue() {
            let key = keys.poll_key(self.poll).map_err(ListenerError::Input)?;
            let Some(command) = key.and_then(map_key) else {
                continue;
            };
            // A key that arrived after the signal moved is not acted on.
            if !self.signal.is_continue() {
                break;
            }
            debug!(?command, "key command");
            self.dispatch(command);
        }
        Ok(())
    }

    fn dispatch(&self, command: Command) {
        match command {
            Command::Reboot(mode) => {
                self.signal.request(Signal::Reboot(mode));
            }
            Command::Quit => {
                self.signal.request(Signal::Quit);
            }
            Command::Toggle(n) => self.handler.toggle(n),
            Command::OpenBrowser => self.handler.open_browser(),
            Command::OpenTool => self.handler.open_tool(),
            Command::HealthCheck => self.handler.health_check(),
            Command::ClearScreen => self.handler.clear_screen(),
        }
    }
}
