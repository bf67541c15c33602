// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Linux binding of the capability seam.
//!
//! Load and process statistics come from `sysinfo`, affinity goes through
//! `sched_getaffinity`/`sched_setaffinity`, niceness through `getpriority`.
//!
//! `sysinfo` lists every thread next to its process, under the thread's own
//! name. Only thread-group leaders are turned into records.

use std::path::Path;
use std::sync::Mutex;

use nix::errno::Errno;
use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use sysinfo::{Pid as SysPid, Process, ProcessStatus as SysStatus, System};

use crate::error::{AffinityError, EnumerationError, SamplingError};
use crate::platform::{LoadSampler, ProcessListing, ProcessTable};
use crate::types::{
    AffinityMask, CoreId, CoreLoadSnapshot, ProcessId, ProcessRecord, ProcessStatus,
};

/// The local machine.
///
/// Sampling and enumeration each keep their own `System` so a slow process
/// scan never delays the next load sample.
pub struct LinuxHost {
    cpu_sys: Mutex<System>,
    proc_sys: Mutex<System>,
    core_count: usize,
}

impl LinuxHost {
    /// Create a host binding and prime the CPU counters.
    pub fn new() -> Self {
        let mut cpu_sys = System::new();
        cpu_sys.refresh_cpu();

        let core_count = match cpu_sys.cpus().len() {
            0 => detect_online_cores(),
            n => n,
        };

        tracing::info!(cores = core_count, "LinuxHost initialized");

        Self {
            cpu_sys: Mutex::new(cpu_sys),
            proc_sys: Mutex::new(System::new()),
            core_count,
        }
    }

    fn record_for(&self, pid: ProcessId, process: &Process) -> Result<ProcessRecord, AffinityError> {
        let affinity = match read_affinity(pid) {
            Ok(mask) => mask,
            // Unreadable affinity is treated as special and never rewritten.
            Err(AffinityError::PermissionDenied { .. }) => AffinityMask::empty(),
            Err(e) => return Err(e),
        };

        Ok(ProcessRecord {
            pid,
            name: process.name().to_string(),
            cpu_percent: f64::from(process.cpu_usage()),
            affinity,
            nice: read_nice(pid),
            status: map_status(process.status()),
        })
    }
}

impl Default for LinuxHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSampler for LinuxHost {
    fn sample(&self) -> Result<CoreLoadSnapshot, SamplingError> {
        let mut sys = self.cpu_sys.lock().map_err(|_| SamplingError::Unavailable {
            reason: "CPU statistics lock poisoned".to_string(),
        })?;
        sys.refresh_cpu();

        let loads: Vec<f64> = sys.cpus().iter().map(|cpu| f64::from(cpu.cpu_usage())).collect();

        if loads.is_empty() {
            return Err(SamplingError::Unavailable {
                reason: "no CPUs reported by the kernel".to_string(),
            });
        }
        if loads.len() != self.core_count {
            return Err(SamplingError::CoreCountChanged {
                expected: self.core_count,
                actual: loads.len(),
            });
        }

        Ok(CoreLoadSnapshot::new(loads))
    }

    fn core_count(&self) -> usize {
        self.core_count
    }
}

impl ProcessTable for LinuxHost {
    fn list(&self) -> Result<ProcessListing, EnumerationError> {
        let mut sys = self.proc_sys.lock().map_err(|_| EnumerationError::Unavailable {
            reason: "process table lock poisoned".to_string(),
        })?;
        sys.refresh_processes();

        if sys.processes().is_empty() {
            return Err(EnumerationError::Unavailable {
                reason: "no processes visible".to_string(),
            });
        }

        let mut listing = ProcessListing::default();
        for (sys_pid, process) in sys.processes() {
            let pid = ProcessId::new(sys_pid.as_u32());
            match is_group_leader(pid).and_then(|_| self.record_for(pid, process)) {
                Ok(record) => listing.records.push(record),
                // Exited between listing and inspection, or a thread.
                Err(AffinityError::ProcessVanished { .. } | AffinityError::NotAProcess { .. }) => {}
                Err(e) => {
                    tracing::debug!(pid = %pid, error = %e, "Skipping unreadable process");
                    listing.skipped += 1;
                }
            }
        }

        Ok(listing)
    }

    /// Reads the process through a private `System` so a long-running scan
    /// holding the shared table cannot stall a migration. The CPU share of
    /// the returned record is therefore always 0. A thread id is refused
    /// with [`AffinityError::NotAProcess`].
    fn process(&self, pid: ProcessId) -> Result<ProcessRecord, AffinityError> {
        is_group_leader(pid)?;

        let mut sys = System::new();
        let sys_pid = SysPid::from_u32(pid.value());
        if !sys.refresh_process(sys_pid) {
            return Err(AffinityError::ProcessVanished { pid });
        }

        let process = sys
            .process(sys_pid)
            .ok_or(AffinityError::ProcessVanished { pid })?;
        self.record_for(pid, process)
    }

    fn affinity(&self, pid: ProcessId) -> Result<AffinityMask, AffinityError> {
        read_affinity(pid)
    }

    fn set_affinity(&self, pid: ProcessId, mask: &AffinityMask) -> Result<(), AffinityError> {
        // An empty mask is rejected by the kernel and pid 0 means "self".
        if mask.is_empty() || pid.is_kernel_idle() {
            return Err(AffinityError::ProtectedMask { pid });
        }

        let mut cpuset = CpuSet::new();
        for core in mask.iter() {
            cpuset.set(core.index()).map_err(|e| AffinityError::Os {
                pid,
                reason: format!("{} out of range: {}", core, e),
            })?;
        }

        sched_setaffinity(to_nix_pid(pid), &cpuset).map_err(|e| classify_errno(pid, e))?;

        tracing::debug!(pid = %pid, mask = %mask, "Affinity written");
        Ok(())
    }
}

/// Succeeds when `pid` is its own thread group, i.e. a process rather than
/// one of its threads.
fn is_group_leader(pid: ProcessId) -> Result<(), AffinityError> {
    let status = match std::fs::read_to_string(format!("/proc/{}/status", pid.value())) {
        Ok(status) => status,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AffinityError::ProcessVanished { pid })
        }
        Err(e) => {
            return Err(AffinityError::Os {
                pid,
                reason: e.to_string(),
            })
        }
    };

    match parse_tgid(&status) {
        Some(tgid) if tgid == pid.value() => Ok(()),
        Some(_) => Err(AffinityError::NotAProcess { pid }),
        None => Err(AffinityError::Os {
            pid,
            reason: "no Tgid line in /proc status".to_string(),
        }),
    }
}

fn parse_tgid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Tgid:"))
        .and_then(|value| value.trim().parse().ok())
}

fn to_nix_pid(pid: ProcessId) -> Pid {
    Pid::from_raw(pid.value() as i32)
}

fn read_affinity(pid: ProcessId) -> Result<AffinityMask, AffinityError> {
    if pid.is_kernel_idle() {
        return Err(AffinityError::ProtectedMask { pid });
    }

    let cpuset = sched_getaffinity(to_nix_pid(pid)).map_err(|e| classify_errno(pid, e))?;
    Ok((0..CpuSet::count())
        .filter(|&cpu| cpuset.is_set(cpu).unwrap_or(false))
        .map(CoreId::new)
        .collect())
}

/// Niceness via getpriority(2). A legitimate result can be -1, so errno is
/// the only reliable failure signal.
fn read_nice(pid: ProcessId) -> Option<i32> {
    Errno::clear();
    // SAFETY: getpriority only reads scheduler state for the given id.
    let nice = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid.value() as libc::id_t) };
    if nice == -1 && Errno::last() != Errno::UnknownErrno {
        None
    } else {
        Some(nice)
    }
}

fn classify_errno(pid: ProcessId, errno: Errno) -> AffinityError {
    match errno {
        Errno::EPERM | Errno::EACCES => AffinityError::PermissionDenied { pid },
        Errno::ESRCH => AffinityError::ProcessVanished { pid },
        other => AffinityError::Os {
            pid,
            reason: other.desc().to_string(),
        },
    }
}

fn map_status(status: SysStatus) -> ProcessStatus {
    match status {
        SysStatus::Run => ProcessStatus::Running,
        SysStatus::Sleep => ProcessStatus::Sleeping,
        SysStatus::Idle => ProcessStatus::Idle,
        SysStatus::Stop | SysStatus::Tracing => ProcessStatus::Stopped,
        SysStatus::Zombie => ProcessStatus::Zombie,
        SysStatus::Dead => ProcessStatus::Dead,
        _ => ProcessStatus::Unknown,
    }
}

/// Count online CPUs from sysfs, falling back to `num_cpus`.
fn detect_online_cores() -> usize {
    let online = Path::new("/sys/devices/system/cpu/online");
    std::fs::read_to_string(online)
        .ok()
        .map(|list| AffinityMask::parse_list(list.trim()).len())
        .filter(|&n| n > 0)
        .unwrap_or_else(num_cpus::get)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_host_initialization() {
        let host = LinuxHost::new();
        assert!(host.core_count() > 0, "Should detect at least 1 CPU");
    }

    #[test]
    fn test_sample_has_one_value_per_core() {
        let host = LinuxHost::new();
        if let Ok(snapshot) = host.sample() {
            assert_eq!(snapshot.core_count(), host.core_count());
            assert!(snapshot.loads().iter().all(|l| (0.0..=100.0).contains(l)));
        }
    }

    #[test]
    fn test_own_affinity_is_readable() {
        let pid = ProcessId::new(std::process::id());
        let mask = read_affinity(pid).unwrap();
        assert!(!mask.is_empty());
    }

    #[test]
    fn test_vanished_pid_is_classified() {
        // Far above pid_max on any default kernel.
        let pid = ProcessId::new(i32::MAX as u32 - 1);
        assert!(matches!(
            read_affinity(pid),
            Err(AffinityError::ProcessVanished { .. })
        ));
    }

    #[test]
    fn test_empty_mask_is_refused() {
        let host = LinuxHost::new();
        let pid = ProcessId::new(std::process::id());
        assert!(matches!(
            host.set_affinity(pid, &AffinityMask::empty()),
            Err(AffinityError::ProtectedMask { .. })
        ));
    }

    #[test]
    fn test_pin_child_and_read_back() {
        let host = LinuxHost::new();
        let child = Command::new("sleep").arg("10").spawn();

        if let Ok(mut child_proc) = child {
            let pid = ProcessId::new(child_proc.id());
            let target = AffinityMask::single(CoreId::new(0));

            // May be refused in restricted sandboxes; it must not panic.
            if host.set_affinity(pid, &target).is_ok() {
                assert_eq!(host.affinity(pid).unwrap(), target);
            }

            let _ = child_proc.kill();
            let _ = child_proc.wait();
        }
    }

    #[test]
    fn test_list_contains_self() {
        let host = LinuxHost::new();
        let me = ProcessId::new(std::process::id());
        let listing = host.list().unwrap();
        assert!(listing.records.iter().any(|r| r.pid == me));
    }

    #[test]
    fn test_parse_tgid() {
        let status = "Name:\tcargo\nUmask:\t0022\nState:\tS (sleeping)\nTgid:\t4242\nNgid:\t0\nPid:\t4243\n";
        assert_eq!(parse_tgid(status), Some(4242));
        assert_eq!(parse_tgid("Name:\tcargo\n"), None);
    }

    #[test]
    fn test_threads_are_not_listed() {
        use std::sync::mpsc;

        let (tid_tx, tid_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let worker = std::thread::Builder::new()
            .name("corebal-worker".to_string())
            .spawn(move || {
                // SAFETY: gettid has no preconditions.
                let tid = unsafe { libc::syscall(libc::SYS_gettid) } as u32;
                tid_tx.send(tid).unwrap();
                let _ = done_rx.recv();
            })
            .unwrap();
        let tid = ProcessId::new(tid_rx.recv().unwrap());
        let me = ProcessId::new(std::process::id());
        assert_ne!(tid, me);

        let host = LinuxHost::new();
        let listing = host.list().unwrap();

        assert!(listing.records.iter().any(|r| r.pid == me));
        assert!(listing.records.iter().all(|r| r.pid != tid));
        assert!(listing.records.iter().all(|r| r.name != "corebal-worker"));
        assert!(matches!(
            host.process(tid),
            Err(AffinityError::NotAProcess { .. })
        ));
        assert!(host.process(me).is_ok());

        done_tx.send(()).unwrap();
        worker.join().unwrap();
    }
}
