//! Process inspection helpers for keystroke attribution.

use sysinfo::{Pid, ProcessRefreshKind, System, UpdateKind};

/// Executable name of `pid`, preferring the binary's file name over the
/// (possibly truncated) process name.
pub fn process_name(pid: u32) -> Option<String> {
    let mut sys = System::new();
    let sys_pid = Pid::from(pid as usize);
    sys.refresh_process_specifics(
        sys_pid,
        ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
    );
    let process = sys.process(sys_pid)?;

    let from_exe = process
        .exe()
        .and_then(|exe| exe.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty());

    from_exe.or_else(|| {
        let name = process.name().trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_own_process() {
        let name = process_name(std::process::id()).expect("own process name");
        assert!(!name.is_empty());
    }

    #[test]
    fn unknown_pid_is_none() {
        assert_eq!(process_name(u32::MAX - 1), None);
    }
}
