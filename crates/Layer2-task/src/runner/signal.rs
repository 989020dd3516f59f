//! Signal delivery to task process groups (Unix)
//!
//! Tasks are spawned as leaders of their own process group, so the group id
//! equals the recorded pid and signalling the group reaches every process
//! the shell started.

use std::io;

/// Send SIGTERM to the group led by `pid`.
/// Returns `Ok(false)` when no such group exists anymore.
pub fn terminate_group(pid: u32) -> io::Result<bool> {
    signal_group(pid, libc::SIGTERM)
}

/// Send SIGKILL to the group led by `pid`
pub fn kill_group(pid: u32) -> io::Result<bool> {
    signal_group(pid, libc::SIGKILL)
}

fn signal_group(pid: u32, signal: libc::c_int) -> io::Result<bool> {
    // 0 and 1 would address our own group and init
    if pid <= 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal process group {}", pid),
        ));
    }
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;

    // SAFETY: kill(2) takes plain integers and has no memory preconditions.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(false)
    } else {
        Err(err)
    }
}
