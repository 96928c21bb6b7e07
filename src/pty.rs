//! PTY (pseudo-terminal) pair ownership and child shell spawning.
//!
//! The master end stays with us, non-blocking; the child gets the slave as
//! its controlling terminal with stdio wired onto it.

use crate::config::Config;
use rustix::fs::{fcntl_setfl, OFlags};
use rustix::io::{read, write, Errno};
use rustix::pty::{grantpt, openpt, ptsname, unlockpt, OpenptFlags};
use std::ffi::CString;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("failed to open PTY master: {0}")]
    OpenMaster(#[source] Errno),
    #[error("failed to grant PTY: {0}")]
    Grant(#[source] Errno),
    #[error("failed to unlock PTY: {0}")]
    Unlock(#[source] Errno),
    #[error("failed to get PTS name: {0}")]
    PtsName(#[source] Errno),
    #[error("failed to fork: {0}")]
    Fork(#[source] std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

/// Result of a non-blocking read from the master.
#[derive(Debug, PartialEq, Eq)]
pub enum PtyRead {
    /// Bytes were read.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
    /// The slave side is gone; the session is over.
    Eof,
}

/// The master side of a PTY pair plus the child it is wired to.
pub struct Pty {
    master: OwnedFd,
    child: libc::pid_t,
    /// Set once the child has been reaped; guards double waits and the
    /// drop-time SIGHUP.
    reaped: bool,
}

/// Everything the forked child needs, allocated before `fork` so the child
/// side stays on async-signal-safe calls plus exec bookkeeping.
struct ChildPlan {
    slave_path: CString,
    shell: CString,
    argv: Vec<CString>,
    env: Vec<CString>,
    cwd: Option<CString>,
}

impl Pty {
    /// Opens a PTY pair, sets the initial window size, and spawns the
    /// configured shell on the slave end.
    pub fn spawn(config: &Config) -> Result<Self, PtyError> {
        let master = openpt(OpenptFlags::RDWR | OpenptFlags::NOCTTY | OpenptFlags::CLOEXEC)
            .map_err(PtyError::OpenMaster)?;
        fcntl_setfl(&master, OFlags::NONBLOCK).map_err(|e| PtyError::Io(e.into()))?;
        grantpt(&master).map_err(PtyError::Grant)?;
        unlockpt(&master).map_err(PtyError::Unlock)?;
        let slave_path = ptsname(&master, Vec::new()).map_err(PtyError::PtsName)?;

        set_winsize(master.as_raw_fd(), config.rows, config.cols).map_err(PtyError::Io)?;

        let plan = Self::plan_child(config, slave_path)?;

        // SAFETY: the strings the child touches were all allocated before
        // the fork; the child itself stays on signal-safe libc calls.
        let pid = unsafe { libc::fork() };
        match pid {
            -1 => Err(PtyError::Fork(std::io::Error::last_os_error())),
            0 => Self::exec_child(&plan),
            pid => {
                log::debug!("spawned shell {:?} as pid {}", plan.shell, pid);
                Ok(Self {
                    master,
                    child: pid,
                    reaped: false,
                })
            }
        }
    }

    fn plan_child(config: &Config, slave_path: CString) -> Result<ChildPlan, PtyError> {
        let invalid =
            |_| PtyError::Io(std::io::Error::from(std::io::ErrorKind::InvalidInput));

        let shell_path = config.shell();
        let shell_name = std::path::Path::new(&shell_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("sh");

        // Login-shell convention: argv[0] is "-zsh", "-bash", and so on.
        let mut argv = vec![CString::new(format!("-{}", shell_name)).map_err(invalid)?];
        for arg in &config.shell_args {
            argv.push(CString::new(arg.as_str()).map_err(invalid)?);
        }

        let mut env = Vec::new();
        if !config.env.contains_key("TERM") {
            env.push(CString::new("TERM=xterm-256color").map_err(invalid)?);
        }
        if !config.env.contains_key("LANG") {
            env.push(CString::new("LANG=en_US.UTF-8").map_err(invalid)?);
        }
        for (key, value) in &config.env {
            env.push(CString::new(format!("{}={}", key, value)).map_err(invalid)?);
        }

        let cwd = match &config.working_dir {
            Some(dir) => Some(CString::new(dir.as_str()).map_err(invalid)?),
            None => None,
        };

        Ok(ChildPlan {
            slave_path,
            shell: CString::new(shell_path).map_err(invalid)?,
            argv,
            env,
            cwd,
        })
    }

    /// Runs in the forked child; never returns.
    fn exec_child(plan: &ChildPlan) -> ! {
        unsafe {
            // New session, slave as controlling terminal, stdio on the slave.
            libc::setsid();
            let slave_fd = libc::open(plan.slave_path.as_ptr(), libc::O_RDWR);
            if slave_fd < 0 {
                libc::_exit(1);
            }
            libc::ioctl(slave_fd, libc::TIOCSCTTY, 0);
            libc::dup2(slave_fd, 0);
            libc::dup2(slave_fd, 1);
            libc::dup2(slave_fd, 2);

            // Nothing above stderr may leak into the shell.
            let max_fd = match libc::sysconf(libc::_SC_OPEN_MAX) {
                n if n > 0 => (n as i32).min(4096),
                _ => 1024,
            };
            for fd in 3..max_fd {
                libc::close(fd);
            }

            if let Some(cwd) = &plan.cwd {
                if libc::chdir(cwd.as_ptr()) != 0 {
                    libc::_exit(1);
                }
            }

            for entry in &plan.env {
                libc::putenv(entry.as_ptr() as *mut libc::c_char);
            }

            let mut argv: Vec<*const libc::c_char> =
                plan.argv.iter().map(|a| a.as_ptr()).collect();
            argv.push(std::ptr::null());
            libc::execvp(plan.shell.as_ptr(), argv.as_ptr());
            libc::_exit(1);
        }
    }

    /// Non-blocking read from the master.
    pub fn read(&self, buf: &mut [u8]) -> Result<PtyRead, PtyError> {
        match read(&self.master, buf) {
            Ok(0) => Ok(PtyRead::Eof),
            Ok(n) => Ok(PtyRead::Data(n)),
            Err(Errno::AGAIN) | Err(Errno::INTR) => Ok(PtyRead::WouldBlock),
            // Linux reports EIO on the master once the slave side is closed.
            Err(Errno::IO) => Ok(PtyRead::Eof),
            Err(e) => Err(PtyError::Io(e.into())),
        }
    }

    /// Write the whole buffer, retrying transient interruptions and blocking
    /// on kernel backpressure until the master accepts more bytes.
    pub fn write_all(&self, data: &[u8]) -> Result<(), PtyError> {
        let mut offset = 0;
        while offset < data.len() {
            match write(&self.master, &data[offset..]) {
                Ok(0) => {
                    return Err(PtyError::Io(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "PTY master accepted no bytes",
                    )))
                }
                Ok(n) => offset += n,
                Err(Errno::INTR) => continue,
                Err(Errno::AGAIN) => self.wait_writable().map_err(PtyError::Io)?,
                Err(e) => return Err(PtyError::Io(e.into())),
            }
        }
        Ok(())
    }

    fn wait_writable(&self) -> std::io::Result<()> {
        let mut pollfd = libc::pollfd {
            fd: self.master.as_raw_fd(),
            events: libc::POLLOUT,
            revents: 0,
        };
        loop {
            let rc = unsafe { libc::poll(&mut pollfd, 1, -1) };
            if rc < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "PTY master no longer writable",
                ));
            }
            return Ok(());
        }
    }

    /// Push the new window size to the kernel; the child sees SIGWINCH.
    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        set_winsize(self.master.as_raw_fd(), rows, cols).map_err(PtyError::Io)
    }

    /// Send a signal to the child.
    pub fn signal(&self, sig: i32) -> Result<(), PtyError> {
        if self.reaped {
            return Ok(());
        }
        if unsafe { libc::kill(self.child, sig) } == -1 {
            return Err(PtyError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Non-blocking check for child exit. Returns the exit code once the
    /// child has been reaped.
    pub fn try_wait(&mut self) -> Result<Option<i32>, PtyError> {
        if self.reaped {
            return Ok(None);
        }
        let mut status: libc::c_int = 0;
        match unsafe { libc::waitpid(self.child, &mut status, libc::WNOHANG) } {
            0 => Ok(None),
            -1 => Err(PtyError::Io(std::io::Error::last_os_error())),
            _ => {
                self.reaped = true;
                Ok(Some(decode_status(status)))
            }
        }
    }

    /// Blocking reap.
    pub fn wait(&mut self) -> Result<i32, PtyError> {
        if self.reaped {
            return Ok(-1);
        }
        let mut status: libc::c_int = 0;
        loop {
            match unsafe { libc::waitpid(self.child, &mut status, 0) } {
                -1 => {
                    let err = std::io::Error::last_os_error();
                    if err.kind() == std::io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(PtyError::Io(err));
                }
                _ => {
                    self.reaped = true;
                    return Ok(decode_status(status));
                }
            }
        }
    }

    pub fn child_pid(&self) -> libc::pid_t {
        self.child
    }

    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    pub fn as_raw_fd(&self) -> i32 {
        self.master.as_raw_fd()
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Safety net for sessions dropped without a stop: hang up the child.
        if !self.reaped {
            unsafe {
                libc::kill(self.child, libc::SIGHUP);
            }
        }
    }
}

/// Exit status if the child terminated normally, -1 if killed by a signal.
fn decode_status(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else {
        -1
    }
}

fn set_winsize(fd: i32, rows: u16, cols: u16) -> std::io::Result<()> {
    let winsize = libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    if unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
