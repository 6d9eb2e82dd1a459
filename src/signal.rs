//! Shutdown requests from signals or from inside the process.
//!
//! `SIGINT` and `SIGTERM` are caught by a handler that only touches
//! async-signal-safe state: it records the signal number in a static and
//! writes one byte into a non-blocking pipe. The read end of that pipe is
//! polled next to the listening socket, so a signal that lands just before
//! the accept loop goes to sleep still wakes it.

use mio::unix::pipe::{self, Receiver, Sender};
use mio::{Interest, Registry, Token};
use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

/// Last signal number delivered to the handler, 0 if none.
static RECEIVED_SIGNAL: AtomicI32 = AtomicI32::new(0);
/// Write end of the wake pipe for the installed handler, -1 if none.
static WAKE_FD: AtomicI32 = AtomicI32::new(-1);

#[cfg(target_os = "linux")]
fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(target_os = "macos")]
fn errno_location() -> *mut libc::c_int {
    unsafe { libc::__error() }
}

extern "C" fn on_signal(signum: libc::c_int) {
    // The interrupted code may be about to read errno.
    let saved_errno = unsafe { *errno_location() };

    RECEIVED_SIGNAL.store(signum, Ordering::SeqCst);
    let fd = WAKE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = 1u8;
        // A full pipe already guarantees a wakeup.
        unsafe {
            libc::write(fd, (&byte as *const u8).cast(), 1);
        }
    }

    unsafe { *errno_location() = saved_errno };
}

fn signal_name(signum: i32) -> &'static str {
    match signum {
        libc::SIGINT => "SIGINT",
        libc::SIGTERM => "SIGTERM",
        _ => "unknown",
    }
}

struct Shared {
    requested: AtomicBool,
    sender: Sender,
}

impl Shared {
    #[cfg(test)]
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // WouldBlock means a wakeup is already pending.
        let _ = io::Write::write(&mut &self.sender, &[1]);
    }
}

/// Process-wide shutdown flag plus the pipe used to wake the accept loop.
///
/// Starts unset, is set at most once and never resets.
pub struct ShutdownSignal {
    receiver: Receiver,
    shared: Arc<Shared>,
    handlers_installed: bool,
}

/// Cloneable handle that requests shutdown from another thread.
#[cfg(test)]
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

#[cfg(test)]
impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.shared.request();
    }
}

impl ShutdownSignal {
    pub fn new() -> io::Result<Self> {
        let (sender, receiver) = pipe::new()?;
        Ok(Self {
            receiver,
            shared: Arc::new(Shared {
                requested: AtomicBool::new(false),
                sender,
            }),
            handlers_installed: false,
        })
    }

    /// Route `SIGINT` and `SIGTERM` to this signal.
    ///
    /// Handlers are installed without `SA_RESTART`, so blocking calls in
    /// progress return `Interrupted`.
    pub fn install_handlers(&mut self) -> io::Result<()> {
        WAKE_FD.store(self.shared.sender.as_raw_fd(), Ordering::SeqCst);

        for signum in [libc::SIGINT, libc::SIGTERM] {
            // SAFETY: `action` is fully initialised and the handler only
            // performs async-signal-safe operations.
            let rc = unsafe {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
                action.sa_flags = 0;
                libc::sigemptyset(&mut action.sa_mask);
                libc::sigaction(signum, &action, std::ptr::null_mut())
            };
            if rc == -1 {
                return Err(io::Error::last_os_error());
            }
        }

        self.handlers_installed = true;
        Ok(())
    }

    #[cfg(test)]
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.shared.requested.load(Ordering::SeqCst) || self.caught_signal().is_some()
    }

    /// Name of the signal that requested shutdown, if one did.
    pub fn caught_signal(&self) -> Option<&'static str> {
        if !self.handlers_installed {
            return None;
        }
        match RECEIVED_SIGNAL.load(Ordering::SeqCst) {
            0 => None,
            signum => Some(signal_name(signum)),
        }
    }

    /// Register the wake pipe with a poll registry.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.receiver, token, Interest::READABLE)
    }

    /// Drain the wake pipe and latch any delivered signal into the flag.
    pub fn acknowledge(&mut self) {
        let mut buf = [0u8; 64];
        loop {
            match self.receiver.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }

        if self.caught_signal().is_some() {
            self.shared.requested.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        if self.handlers_installed {
            WAKE_FD.store(-1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll};
    use std::time::Duration;

    #[test]
    fn test_starts_unset() {
        let signal = ShutdownSignal::new().unwrap();
        assert!(!signal.is_requested());
    }

    #[test]
    fn test_handle_sets_flag() {
        let signal = ShutdownSignal::new().unwrap();
        let handle = signal.handle();
        handle.clone().shutdown();
        assert!(signal.is_requested());

        // Requesting twice is harmless.
        handle.shutdown();
        assert!(signal.is_requested());
    }

    #[test]
    fn test_handle_wakes_poll() {
        let mut signal = ShutdownSignal::new().unwrap();
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(4);
        signal.register(poll.registry(), Token(7)).unwrap();

        let handle = signal.handle();
        std::thread::spawn(move || handle.shutdown());

        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == Token(7)));

        signal.acknowledge();
        assert!(signal.is_requested());
    }

    /// The only test that installs process-wide handlers.
    #[test]
    fn test_raised_sigterm_requests_shutdown() {
        use std::io::Write;

        let mut signal = ShutdownSignal::new().unwrap();
        let mut poll = Poll::new().unwrap();
        let mut events = Events::with_capacity(4);
        signal.register(poll.registry(), Token(3)).unwrap();
        signal.install_handlers().unwrap();
        assert!(!signal.is_requested());
        assert_eq!(signal.caught_signal(), None);

        // Fill the wake pipe so the handler's own write fails with EAGAIN.
        loop {
            match (&signal.shared.sender).write(&[0u8; 512]) {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("unexpected pipe error: {e}"),
            }
        }

        unsafe {
            *errno_location() = libc::EDOM;
            assert_eq!(libc::raise(libc::SIGTERM), 0);
            assert_eq!(*errno_location(), libc::EDOM);
        }

        assert_eq!(signal.caught_signal(), Some("SIGTERM"));
        assert!(signal.is_requested());

        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        assert!(events.iter().any(|e| e.token() == Token(3)));
        signal.acknowledge();
        assert!(signal.shared.requested.load(Ordering::SeqCst));
    }

    #[test]
    fn test_no_signal_without_handlers() {
        let signal = ShutdownSignal::new().unwrap();
        assert_eq!(signal.caught_signal(), None);
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(libc::SIGINT), "SIGINT");
        assert_eq!(signal_name(libc::SIGTERM), "SIGTERM");
    }
}
