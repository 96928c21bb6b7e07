//! Terminal session supervision.
//!
//! A `Session` owns the PTY pair, the child shell, and the screen and parser
//! the child's output drives. The host calls `pump` in its event loop: each
//! turn waits for the master to become readable, drains it in chunks, and
//! hands the bytes to the parser in arrival order. Screen mutations and
//! parsing never happen off the host context, so no locking is involved.

use crate::config::Config;
use crate::parser::Parser;
use crate::pty::{Pty, PtyError, PtyRead};
use crate::screen::{Event, Screen};
use polling::{Event as PollEvent, Events, Poller};
use std::os::fd::BorrowedFd;
use std::time::Duration;
use thiserror::Error;

/// Read chunk size for draining the master.
const READ_CHUNK: usize = 8192;

/// Poller key for the PTY master.
const PTY_KEY: usize = 0;

/// Grace period between SIGTERM and SIGKILL on stop.
const STOP_GRACE: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to open PTY: {0}")]
    OpenFailed(#[source] PtyError),
    #[error("failed to spawn child: {0}")]
    ForkFailed(#[source] PtyError),
    #[error("session is already running")]
    AlreadyRunning,
    #[error("session is not running")]
    NotRunning,
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl SessionError {
    fn from_pty(e: PtyError) -> Self {
        match e {
            PtyError::Io(io) => SessionError::Io(io),
            other => SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                other.to_string(),
            )),
        }
    }
}

/// A terminal session: child shell, PTY master, screen, and parser.
pub struct Session {
    config: Config,
    screen: Screen,
    parser: Parser,
    pty: Option<Pty>,
    poller: Option<Poller>,
    events: Vec<Event>,
    exit_status: Option<i32>,
    read_buf: Vec<u8>,
}

impl Session {
    /// Creates a session sized from the config. Nothing is spawned until
    /// `start`.
    pub fn new(config: Config) -> Self {
        let screen = Screen::new(
            config.rows as usize,
            config.cols as usize,
            config.max_scrollback as usize,
        );
        Self {
            config,
            screen,
            parser: Parser::new(),
            pty: None,
            poller: None,
            events: Vec::new(),
            exit_status: None,
            read_buf: vec![0u8; READ_CHUNK],
        }
    }

    /// Spawns the shell and registers the master for readiness polling.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.pty.is_some() {
            return Err(SessionError::AlreadyRunning);
        }
        let pty = Pty::spawn(&self.config).map_err(|e| match e {
            fork @ PtyError::Fork(_) => SessionError::ForkFailed(fork),
            other => SessionError::OpenFailed(other),
        })?;
        let poller = Poller::new().map_err(SessionError::Io)?;
        // SAFETY: the fd is deregistered before the Pty (and with it the fd)
        // is dropped.
        unsafe {
            poller
                .add(pty.as_raw_fd(), PollEvent::readable(PTY_KEY))
                .map_err(SessionError::Io)?;
        }
        log::info!(
            "session started: pid {} at {}x{}",
            pty.child_pid(),
            self.config.rows,
            self.config.cols
        );
        self.exit_status = None;
        self.pty = Some(pty);
        self.poller = Some(poller);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.pty.is_some()
    }

    /// Exit code of the child once it has been reaped.
    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut Screen {
        &mut self.screen
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The master fd, for hosts that fold the session into their own poll
    /// set.
    pub fn master_fd(&self) -> Option<BorrowedFd<'_>> {
        self.pty.as_ref().map(|p| p.master_fd())
    }

    /// Drain pending events in emission order.
    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.extend(self.screen.take_events());
        std::mem::take(&mut self.events)
    }

    /// One reactor turn: wait up to `timeout` for output, parse everything
    /// available, and detect child exit. Returns the number of bytes parsed.
    pub fn pump(&mut self, timeout: Option<Duration>) -> Result<usize, SessionError> {
        if self.pty.is_none() {
            return Err(SessionError::NotRunning);
        }

        let readable = {
            let poller = self.poller.as_ref().unwrap();
            let mut events = Events::new();
            poller.wait(&mut events, timeout).map_err(SessionError::Io)?;
            let has_event = events.iter().next().is_some();
            has_event
        };

        let mut buf = std::mem::take(&mut self.read_buf);
        let mut total = 0;
        let mut eof = false;
        if readable {
            (total, eof) = self.drain(&mut buf);
        }
        self.events.extend(self.screen.take_events());

        // Answer any status queries the child raised while we parsed.
        if let (Some(response), Some(pty)) = (self.screen.take_response(), self.pty.as_ref()) {
            if let Err(e) = pty.write_all(&response) {
                log::warn!("failed to write terminal response: {}", e);
            }
        }

        let mut rearm_error = None;
        if eof {
            let code = self
                .pty
                .as_mut()
                .unwrap()
                .wait()
                .unwrap_or_else(|e| {
                    log::warn!("reaping child failed: {}", e);
                    -1
                });
            self.finish(code);
        } else if let Some(code) = self.reap_if_exited() {
            // The child is gone; pick up anything still buffered in the
            // kernel before closing the master.
            let (more, _) = self.drain(&mut buf);
            total += more;
            self.events.extend(self.screen.take_events());
            self.finish(code);
        } else if let (Some(poller), Some(pty)) = (&self.poller, &self.pty) {
            // The poller is oneshot: rearm after every drain.
            if let Err(e) = poller.modify(pty.master_fd(), PollEvent::readable(PTY_KEY)) {
                rearm_error = Some(e);
            }
        }

        self.read_buf = buf;
        match rearm_error {
            Some(e) => Err(SessionError::Io(e)),
            None => Ok(total),
        }
    }

    /// Read chunks until the master would block. Returns (bytes, saw_eof).
    fn drain(&mut self, buf: &mut [u8]) -> (usize, bool) {
        let mut total = 0;
        loop {
            let result = match self.pty.as_ref() {
                Some(pty) => pty.read(buf),
                None => return (total, false),
            };
            match result {
                Ok(PtyRead::Data(n)) => {
                    self.parser.advance(&mut self.screen, &buf[..n]);
                    total += n;
                }
                Ok(PtyRead::WouldBlock) => return (total, false),
                Ok(PtyRead::Eof) => return (total, true),
                Err(e) => {
                    // A read-side failure ends the session but never poisons
                    // the parser or the grid.
                    log::warn!("PTY read failed: {}", e);
                    return (total, true);
                }
            }
        }
    }

    fn reap_if_exited(&mut self) -> Option<i32> {
        self.pty.as_mut()?.try_wait().unwrap_or_else(|e| {
            log::warn!("waitpid failed: {}", e);
            Some(-1)
        })
    }

    /// Tear down after child exit: emit the event and close the master
    /// exactly once.
    fn finish(&mut self, code: i32) {
        log::info!("session exited with code {}", code);
        self.exit_status = Some(code);
        self.events.push(Event::SessionExited(code));
        if let (Some(poller), Some(pty)) = (&self.poller, &self.pty) {
            let _ = poller.delete(pty.master_fd());
        }
        self.poller = None;
        self.pty = None;
    }

    /// Write user input to the shell. The host convention of `\n` for Enter
    /// is translated to `\r` on the way through.
    pub fn write_input(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let pty = self.pty.as_ref().ok_or(SessionError::NotRunning)?;
        let translated: Vec<u8> = bytes
            .iter()
            .map(|&b| if b == b'\n' { b'\r' } else { b })
            .collect();
        pty.write_all(&translated).map_err(SessionError::from_pty)
    }

    /// Resize the terminal. The screen is reshaped first so any bytes the
    /// child emits in response to SIGWINCH land in a grid already sized to
    /// receive them.
    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<(), SessionError> {
        if self.pty.is_none() {
            return Err(SessionError::NotRunning);
        }
        self.screen.resize(rows as usize, cols as usize);
        self.config.rows = rows;
        self.config.cols = cols;
        self.pty
            .as_ref()
            .unwrap()
            .resize(rows, cols)
            .map_err(SessionError::from_pty)
    }

    /// Send a signal to the child.
    pub fn signal(&self, sig: i32) -> Result<(), SessionError> {
        let pty = self.pty.as_ref().ok_or(SessionError::NotRunning)?;
        pty.signal(sig).map_err(SessionError::from_pty)
    }

    /// Stop the session: SIGTERM, a short grace period, SIGKILL if needed,
    /// reap, and close the master. Idempotent.
    pub fn stop(&mut self) {
        let Some(mut pty) = self.pty.take() else {
            return;
        };
        if let Some(poller) = self.poller.take() {
            let _ = poller.delete(pty.master_fd());
        }

        let _ = pty.signal(libc::SIGTERM);
        let deadline = std::time::Instant::now() + STOP_GRACE;
        let mut code = None;
        while std::time::Instant::now() < deadline {
            match pty.try_wait() {
                Ok(Some(c)) => {
                    code = Some(c);
                    break;
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                Err(_) => break,
            }
        }
        let code = code.unwrap_or_else(|| {
            let _ = pty.signal(libc::SIGKILL);
            pty.wait().unwrap_or(-1)
        });

        log::info!("session stopped, child exited with {}", code);
        self.exit_status = Some(code);
        self.events.push(Event::SessionExited(code));
        // Dropping the Pty closes the master fd, exactly once.
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh_session(cmd: &str) -> Session {
        Session::new(Config {
            shell_path: Some("/bin/sh".to_string()),
            shell_args: vec!["-c".to_string(), cmd.to_string()],
            rows: 5,
            cols: 40,
            ..Config::default()
        })
    }

    fn pump_until_exit(session: &mut Session) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while session.is_running() && Instant::now() < deadline {
            let _ = session.pump(Some(Duration::from_millis(50)));
        }
        assert!(!session.is_running(), "session did not exit in time");
    }

    fn grid_contains(session: &Session, needle: &str) -> bool {
        let (rows, _) = session.screen().size();
        (0..rows).any(|r| session.screen().row_text(r).contains(needle))
    }

    #[test]
    fn test_lifecycle_misuse_errors() {
        let mut session = sh_session("sleep 5");
        assert!(matches!(
            session.write_input(b"x"),
            Err(SessionError::NotRunning)
        ));
        assert!(matches!(
            session.resize(10, 10),
            Err(SessionError::NotRunning)
        ));
        assert!(matches!(session.signal(0), Err(SessionError::NotRunning)));

        session.start().unwrap();
        assert!(matches!(
            session.start(),
            Err(SessionError::AlreadyRunning)
        ));
        session.stop();
        session.stop(); // idempotent
        assert!(matches!(
            session.write_input(b"x"),
            Err(SessionError::NotRunning)
        ));
    }

    #[test]
    fn test_child_exit_code_surfaces() {
        let mut session = sh_session("exit 7");
        session.start().unwrap();
        pump_until_exit(&mut session);
        assert_eq!(session.exit_status(), Some(7));
        assert!(session
            .take_events()
            .contains(&Event::SessionExited(7)));
    }

    #[test]
    fn test_output_reaches_grid() {
        let mut session = sh_session("printf 'hello from child'");
        session.start().unwrap();
        pump_until_exit(&mut session);
        assert!(grid_contains(&session, "hello from child"));
    }

    #[test]
    fn test_grid_survives_exit() {
        let mut session = sh_session("printf 'last words'; exit 2");
        session.start().unwrap();
        pump_until_exit(&mut session);
        // The grid renders as-of the last parsed byte; exit does not clear it.
        assert!(grid_contains(&session, "last words"));
        assert_eq!(session.exit_status(), Some(2));
    }

    #[test]
    fn test_child_env_includes_term() {
        let mut session = sh_session("printf '%s' \"$TERM\"");
        session.start().unwrap();
        pump_until_exit(&mut session);
        assert!(grid_contains(&session, "xterm-256color"));
    }

    #[test]
    fn test_input_round_trip() {
        let mut session = sh_session("read line; printf 'got:%s' \"$line\"");
        session.start().unwrap();
        // Enter is sent as \n and must reach the line discipline as \r.
        session.write_input(b"ping\n").unwrap();
        pump_until_exit(&mut session);
        assert!(grid_contains(&session, "got:ping"));
    }

    #[test]
    fn test_title_event_from_child() {
        let mut session = sh_session("printf '\\033]0;probe\\007'");
        session.start().unwrap();
        pump_until_exit(&mut session);
        assert!(session
            .take_events()
            .contains(&Event::TitleChanged("probe".to_string())));
    }

    #[test]
    fn test_stop_kills_long_running_child() {
        let mut session = sh_session("sleep 30");
        session.start().unwrap();
        let _ = session.pump(Some(Duration::from_millis(50)));
        session.stop();
        assert!(!session.is_running());
        // Terminated by signal: reported as -1.
        assert_eq!(session.exit_status(), Some(-1));
        assert!(session
            .take_events()
            .contains(&Event::SessionExited(-1)));
    }

    #[test]
    fn test_resize_reshapes_screen_first() {
        let mut session = sh_session("sleep 5");
        session.start().unwrap();
        session.resize(10, 60).unwrap();
        assert_eq!(session.screen().size(), (10, 60));
        session.stop();
    }

    #[test]
    fn test_restart_after_exit() {
        let mut session = sh_session("exit 0");
        session.start().unwrap();
        pump_until_exit(&mut session);
        assert_eq!(session.exit_status(), Some(0));
        // A finished session can be started again.
        session.start().unwrap();
        pump_until_exit(&mut session);
    }
}
