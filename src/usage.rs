//! CPU and memory sampling of a process and all of its descendants.

use std::collections::{HashMap, HashSet};

use sysinfo::{Pid, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Resource use of a process tree at one point in time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UsageSample {
    /// Sum over the tree; 100.0 is one fully busy core.
    pub cpu_percent: f64,
    /// Resident set size summed over the tree, in MiB.
    pub memory_mb: f64,
}

/// One row of a process table snapshot.
#[derive(Clone, Copy, Debug)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

/// Sum usage of `root` and everything below it. `None` if `root` is gone.
pub fn tree_usage(root: u32, entries: &[ProcessEntry]) -> Option<UsageSample> {
    let by_pid: HashMap<u32, &ProcessEntry> = entries.iter().map(|e| (e.pid, e)).collect();
    if !by_pid.contains_key(&root) {
        return None;
    }
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for entry in entries {
        if let Some(parent) = entry.parent.filter(|p| *p != entry.pid) {
            children.entry(parent).or_default().push(entry.pid);
        }
    }

    let mut seen = HashSet::new();
    let mut stack = vec![root];
    let mut cpu_percent = 0.0;
    let mut memory_bytes = 0u64;
    while let Some(pid) = stack.pop() {
        if !seen.insert(pid) {
            continue;
        }
        if let Some(entry) = by_pid.get(&pid) {
            cpu_percent += entry.cpu_percent;
            memory_bytes = memory_bytes.saturating_add(entry.memory_bytes);
        }
        if let Some(kids) = children.get(&pid) {
            stack.extend(kids);
        }
    }
    Some(UsageSample {
        cpu_percent,
        memory_mb: memory_bytes as f64 / BYTES_PER_MB,
    })
}

/// Samples a live process tree. CPU figures are averaged since the previous
/// call, so the first sample after `new` may read zero.
pub struct ProcessTreeSampler {
    system: System,
    root: u32,
}

impl ProcessTreeSampler {
    pub fn new(root: u32) -> Self {
        let mut system = System::new();
        system.refresh_processes();
        Self { system, root }
    }

    pub fn sample(&mut self) -> Option<UsageSample> {
        self.system.refresh_processes();
        let processes = self.system.processes();

        // Threads show up as processes on some platforms; count each task once,
        // through its owning process.
        let tasks: HashSet<Pid> = processes
            .iter()
            .filter_map(|(pid, process)| {
                process
                    .tasks()
                    .map(|tasks| tasks.iter().copied().filter(move |t| t != pid))
            })
            .flatten()
            .collect();

        let entries: Vec<ProcessEntry> = processes
            .iter()
            .filter(|(pid, _)| !tasks.contains(pid))
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                parent: process.parent().map(|p| p.as_u32()),
                cpu_percent: f64::from(process.cpu_usage()),
                memory_bytes: process.memory(),
            })
            .collect();
        tree_usage(self.root, &entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, parent: Option<u32>, cpu: f64, mb: u64) -> ProcessEntry {
        ProcessEntry {
            pid,
            parent,
            cpu_percent: cpu,
            memory_bytes: mb * 1024 * 1024,
        }
    }

    #[test]
    fn sums_root_and_all_descendants_only() {
        let table = [
            entry(1, None, 1.0, 100),
            entry(10, Some(1), 50.0, 20),
            entry(11, Some(10), 25.0, 10),
            entry(12, Some(11), 5.0, 2),
            entry(20, Some(1), 99.0, 500),
        ];
        let usage = tree_usage(10, &table).unwrap();
        assert_eq!(usage.cpu_percent, 80.0);
        assert_eq!(usage.memory_mb, 32.0);
    }

    #[test]
    fn missing_root_yields_none() {
        let table = [entry(1, None, 1.0, 1)];
        assert!(tree_usage(42, &table).is_none());
        assert!(tree_usage(42, &[]).is_none());
    }

    #[test]
    fn self_parented_entries_do_not_loop() {
        let table = [entry(7, Some(7), 3.0, 1), entry(8, Some(7), 1.0, 1)];
        let usage = tree_usage(7, &table).unwrap();
        assert_eq!(usage.cpu_percent, 4.0);
        assert_eq!(usage.memory_mb, 2.0);
    }

    #[test]
    fn samples_the_current_process() {
        let mut sampler = ProcessTreeSampler::new(std::process::id());
        let usage = sampler.sample().expect("own process is visible");
        assert!(usage.memory_mb > 0.0);
        assert!(usage.cpu_percent >= 0.0);
    }
}
