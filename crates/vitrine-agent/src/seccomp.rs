//! Seccomp profile generation
//!
//! Built once at startup and referenced by path from every container
//! launch. The profile is a broad allow list covering the syscalls ordinary
//! web servers need, followed by an explicit deny list that overrides the
//! allow for the dangerous ones (tracing, mounting, module loading, BPF).
//! The default action is deny, so anything unlisted is blocked too.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ALLOW: &str = "SCMP_ACT_ALLOW";
const DENY: &str = "SCMP_ACT_ERRNO";

/// Seccomp profile in Docker's JSON format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeccompProfile {
    #[serde(rename = "defaultAction")]
    pub default_action: String,
    pub architectures: Vec<String>,
    pub syscalls: Vec<SyscallRule>,
}

/// One allow/deny rule over a set of syscall names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyscallRule {
    pub names: Vec<String>,
    pub action: String,
}

fn rule(action: &str, names: &[&str]) -> SyscallRule {
    SyscallRule {
        names: names.iter().map(|n| n.to_string()).collect(),
        action: action.to_string(),
    }
}

/// The profile applied to every preview container
pub fn default_profile() -> SeccompProfile {
    SeccompProfile {
        default_action: DENY.to_string(),
        architectures: vec![
            "SCMP_ARCH_X86_64".to_string(),
            "SCMP_ARCH_X86".to_string(),
            "SCMP_ARCH_AARCH64".to_string(),
            "SCMP_ARCH_ARM".to_string(),
        ],
        syscalls: vec![
            // Basic file IO
            rule(
                ALLOW,
                &[
                    "read", "write", "open", "close", "stat", "fstat", "lstat", "lseek", "access",
                    "dup", "dup2", "dup3", "pipe", "pipe2", "fcntl", "flock", "fsync", "fdatasync",
                    "truncate", "ftruncate", "readahead", "fallocate", "copy_file_range", "splice",
                    "tee", "vmsplice", "sync", "syncfs", "sync_file_range", "preadv", "pwritev",
                    "preadv2", "pwritev2", "sendfile",
                ],
            ),
            // Directory and metadata operations
            rule(
                ALLOW,
                &[
                    "getdents", "getdents64", "getcwd", "chdir", "fchdir", "rename", "renameat",
                    "renameat2", "mkdir", "rmdir", "creat", "link", "unlink", "symlink",
                    "readlink", "chmod", "fchmod", "chown", "fchown", "lchown", "umask", "mknod",
                    "utime", "utimes", "utimensat", "futimesat", "statfs", "fstatfs", "statx",
                    "openat", "mkdirat", "mknodat", "fchownat", "newfstatat", "unlinkat", "linkat",
                    "symlinkat", "readlinkat", "fchmodat", "faccessat",
                ],
            ),
            // Extended attributes
            rule(
                ALLOW,
                &[
                    "setxattr", "lsetxattr", "fsetxattr", "getxattr", "lgetxattr", "fgetxattr",
                    "listxattr", "llistxattr", "flistxattr", "removexattr", "lremovexattr",
                    "fremovexattr",
                ],
            ),
            // Memory management
            rule(
                ALLOW,
                &[
                    "mmap", "mprotect", "munmap", "brk", "mremap", "msync", "mincore", "madvise",
                    "mlock", "mlock2", "munlock", "mlockall", "munlockall", "membarrier",
                    "remap_file_pages", "memfd_create", "mbind", "set_mempolicy", "get_mempolicy",
                ],
            ),
            // Signals
            rule(
                ALLOW,
                &[
                    "rt_sigaction", "rt_sigprocmask", "rt_sigreturn", "rt_sigpending",
                    "rt_sigtimedwait", "rt_sigqueueinfo", "rt_tgsigqueueinfo", "sigaltstack",
                    "signalfd", "signalfd4", "kill", "tkill", "tgkill", "pause",
                    "restart_syscall",
                ],
            ),
            // Networking (bind/listen/accept are what preview servers live on)
            rule(
                ALLOW,
                &[
                    "socket", "connect", "accept", "accept4", "sendto", "recvfrom", "sendmsg",
                    "recvmsg", "sendmmsg", "recvmmsg", "shutdown", "bind", "listen",
                    "getsockname", "getpeername", "socketpair", "setsockopt", "getsockopt",
                ],
            ),
            // Processes and threads
            rule(
                ALLOW,
                &[
                    "clone", "fork", "vfork", "execve", "execveat", "exit", "exit_group", "wait4",
                    "waitid", "getpid", "getppid", "gettid", "set_tid_address", "uname",
                    "personality", "prctl", "arch_prctl", "seccomp", "set_robust_list",
                    "get_robust_list", "futex", "set_thread_area", "get_thread_area", "rseq",
                    "unshare", "kcmp",
                ],
            ),
            // Identity and limits
            rule(
                ALLOW,
                &[
                    "getuid", "getgid", "setuid", "setgid", "geteuid", "getegid", "setpgid",
                    "getpgrp", "getpgid", "setsid", "getsid", "setreuid", "setregid", "getgroups",
                    "setgroups", "setresuid", "getresuid", "setresgid", "getresgid", "setfsuid",
                    "setfsgid", "capget", "capset", "getrlimit", "setrlimit", "prlimit64",
                    "getrusage", "sysinfo", "times", "getpriority", "setpriority", "getcpu",
                ],
            ),
            // Scheduling
            rule(
                ALLOW,
                &[
                    "sched_yield", "sched_setparam", "sched_getparam", "sched_setscheduler",
                    "sched_getscheduler", "sched_get_priority_max", "sched_get_priority_min",
                    "sched_rr_get_interval", "sched_setaffinity", "sched_getaffinity",
                    "sched_setattr", "sched_getattr", "ioprio_set", "ioprio_get",
                ],
            ),
            // Time
            rule(
                ALLOW,
                &[
                    "gettimeofday", "time", "nanosleep", "getitimer", "alarm", "setitimer",
                    "timer_create", "timer_settime", "timer_gettime", "timer_getoverrun",
                    "timer_delete", "clock_gettime", "clock_getres", "clock_nanosleep",
                    "timerfd_create", "timerfd_settime", "timerfd_gettime",
                ],
            ),
            // Event notification and async IO
            rule(
                ALLOW,
                &[
                    "poll", "ppoll", "select", "pselect6", "epoll_create", "epoll_create1",
                    "epoll_wait", "epoll_pwait", "epoll_ctl", "eventfd", "eventfd2",
                    "inotify_init", "inotify_init1", "inotify_add_watch", "inotify_rm_watch",
                    "io_setup", "io_destroy", "io_getevents", "io_submit", "io_cancel",
                    "io_pgetevents",
                ],
            ),
            // Misc
            rule(ALLOW, &["ioctl", "getrandom", "semtimedop", "fadvise64"]),
            // Deny overrides: debugging and tracing other processes
            rule(DENY, &["ptrace", "process_vm_readv", "process_vm_writev"]),
            // Deny overrides: filesystem and swap manipulation
            rule(DENY, &["mount", "umount2", "swapon", "swapoff", "pivot_root"]),
            // Deny overrides: kernel module and kexec control
            rule(
                DENY,
                &["init_module", "finit_module", "delete_module", "kexec_load", "kexec_file_load"],
            ),
            // Deny overrides: reboot, accounting, BPF, userfaultfd
            rule(DENY, &["reboot", "acct", "bpf", "userfaultfd"]),
        ],
    }
}

/// Serialize the default profile to `path`; returns the path for reuse by
/// every container launch.
pub fn write_profile(path: &Path) -> Result<PathBuf> {
    let profile = default_profile();
    let data = serde_json::to_vec_pretty(&profile).expect("profile serialization is infallible");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_action_is_deny() {
        let profile = default_profile();
        assert_eq!(profile.default_action, DENY);
        assert_eq!(profile.architectures.len(), 4);
    }

    #[test]
    fn test_deny_rules_follow_allow_rules() {
        // The deny list must come after the allow list so it overrides it
        let profile = default_profile();
        let first_deny = profile
            .syscalls
            .iter()
            .position(|r| r.action == DENY)
            .unwrap();
        assert!(profile.syscalls[first_deny..]
            .iter()
            .all(|r| r.action == DENY));
    }

    #[test]
    fn test_dangerous_syscalls_denied() {
        let profile = default_profile();
        let denied: HashSet<&str> = profile
            .syscalls
            .iter()
            .filter(|r| r.action == DENY)
            .flat_map(|r| r.names.iter().map(String::as_str))
            .collect();

        for name in ["ptrace", "mount", "umount2", "init_module", "bpf", "userfaultfd", "kexec_load"] {
            assert!(denied.contains(name), "{} should be denied", name);
        }
    }

    #[test]
    fn test_server_syscalls_allowed() {
        let profile = default_profile();
        let allowed: HashSet<&str> = profile
            .syscalls
            .iter()
            .filter(|r| r.action == ALLOW)
            .flat_map(|r| r.names.iter().map(String::as_str))
            .collect();

        for name in ["bind", "listen", "accept4", "execve", "epoll_wait", "openat"] {
            assert!(allowed.contains(name), "{} should be allowed", name);
        }
    }

    #[test]
    fn test_write_profile_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seccomp-preview.json");
        let written = write_profile(&path).unwrap();
        assert_eq!(written, path);

        let data = std::fs::read_to_string(&path).unwrap();
        assert!(data.contains("\"defaultAction\""));
        let parsed: SeccompProfile = serde_json::from_str(&data).unwrap();
        assert_eq!(parsed.default_action, DENY);
    }
}
