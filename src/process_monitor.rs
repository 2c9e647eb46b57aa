use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

/// A row of the OS process table, as much as the launcher needs of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub parent: Option<u32>,
    pub name: String,
}

fn snapshot() -> Vec<ProcessEntry> {
    let mut sys = System::new();
    sys.refresh_processes();

    sys.processes()
        .iter()
        .map(|(pid, process)| ProcessEntry {
            pid: pid.as_u32(),
            parent: process.parent().map(|p| p.as_u32()),
            name: process.name().to_string(),
        })
        .collect()
}

/// Name of a live process, if any. Used for log lines only.
pub fn process_name(pid: u32) -> Option<String> {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(Pid::from_u32(pid)).map(|p| p.name().to_string())
}

/// All descendants of `root`, deepest first, so that killing in order never
/// leaves an orphan re-parented to init before we reach it.
pub fn descendants(root: u32) -> Vec<u32> {
    descendants_in(&snapshot(), root)
}

fn descendants_in(table: &[ProcessEntry], root: u32) -> Vec<u32> {
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for entry in table {
            if entry.parent == Some(parent) && entry.pid != root && !found.contains(&entry.pid) {
                found.push(entry.pid);
                frontier.push(entry.pid);
            }
        }
    }
    found.reverse();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(pid: u32, parent: Option<u32>) -> ProcessEntry {
        ProcessEntry { pid, parent, name: format!("p{}", pid) }
    }

    #[test]
    fn test_current_process_has_a_name() {
        assert!(process_name(std::process::id()).is_some());
    }

    #[test]
    fn test_descendants_deepest_first() {
        // 1 ─┬─ 2 ── 4
        //    └─ 3
        let table = vec![
            entry(1, None),
            entry(2, Some(1)),
            entry(3, Some(1)),
            entry(4, Some(2)),
            entry(5, None),
        ];
        let found = descendants_in(&table, 1);
        assert_eq!(found.len(), 3);
        let pos = |pid| found.iter().position(|p| *p == pid).unwrap();
        assert!(pos(4) < pos(2), "grandchild must come before its parent: {:?}", found);
        assert!(!found.contains(&5));
        assert!(!found.contains(&1));
    }

    #[test]
    fn test_descendants_of_leaf_is_empty() {
        let table = vec![entry(1, None), entry(2, Some(1))];
        assert!(descendants_in(&table, 2).is_empty());
    }
}
