/// The `uid:gid` the container should run as, derived from the current
/// process. Only meaningful on Linux, where bind-mounted files must carry
/// the host user's ownership; elsewhere the container runtime handles
/// identity and we return `None`.
#[cfg(target_os = "linux")]
pub fn container_user() -> Option<String> {
    // getuid/getgid are always successful.
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    Some(format!("{uid}:{gid}"))
}

#[cfg(not(target_os = "linux"))]
pub fn container_user() -> Option<String> {
    None
}
