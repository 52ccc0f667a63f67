//! Process group signalling for supervised agents.
//!
//! Every agent runs as the leader of its own process group, so signalling the group
//! also reaches the tools the agent spawned (shells, test runners, language servers).

/// Send SIGTERM to the process group led by `pid`.
pub fn terminate_group(pid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGTERM)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Send SIGKILL to the process group led by `pid`.
pub fn kill_group(pid: u32) -> bool {
    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGKILL)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pgid <= 1 {
        return false;
    }
    let rc = unsafe { libc::killpg(pgid, signal) };
    rc == 0
}
