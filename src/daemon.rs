//! Detaching from the controlling terminal.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;

/// Fork into the background and start a new session.
///
/// The parent exits with status 0. In the child, stdin, stdout and stderr
/// are pointed at `/dev/null`. Must run before any thread is spawned.
pub fn daemonize() -> io::Result<()> {
    // SAFETY: the process is single-threaded at this point.
    match unsafe { libc::fork() } {
        -1 => return Err(io::Error::last_os_error()),
        0 => {}
        _ => std::process::exit(0),
    }

    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }

    detach_standard_streams()
}

fn detach_standard_streams() -> io::Result<()> {
    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;

    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(null.as_raw_fd(), fd) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}
