/// Process tree termination for expired helper invocations
///
/// The helper runs in its own process group, but the recorded script may start
/// a new session (terminal recorders do), so group signals alone can leave
/// orphans behind. Descendants are therefore resolved through `/proc` parent
/// links and signalled individually as well.
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// What was done to bring a process tree down
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KillReport {
    pub term_sent: bool,
    pub kill_sent: bool,
    pub waited_ms: u64,
    /// Descendant pids observed while terminating
    pub descendants: Vec<i32>,
    pub notes: Vec<String>,
}

/// Parse `/proc/<pid>/stat` into (pid, state, ppid).
///
/// `comm` may contain spaces and parentheses, so fields are taken after the
/// last `)`.
pub fn parse_stat(content: &str) -> Option<(i32, char, i32)> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let pid = content[..open].trim().parse().ok()?;
    let mut rest = content.get(close + 1..)?.split_whitespace();
    let state = rest.next()?.chars().next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some((pid, state, ppid))
}

/// Scheduler state letter of `pid` (`R`, `S`, `Z`, ...), `None` if gone
pub fn process_state(pid: i32) -> Option<char> {
    let content = std::fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&content).map(|(_, state, _)| state)
}

fn parent_map() -> HashMap<i32, Vec<i32>> {
    let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
    let entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot scan /proc for descendants: {}", e);
            return children;
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<i32>().ok()) else {
            continue;
        };
        // Processes may exit between readdir and read; skip them.
        let Ok(content) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        if let Some((_, _, ppid)) = parse_stat(&content) {
            children.entry(ppid).or_default().push(pid);
        }
    }

    children
}

/// All live descendants of `root`, breadth-first, excluding `root` itself
pub fn descendants_of(root: i32) -> Vec<i32> {
    let children = parent_map();
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root]);

    while let Some(pid) = queue.pop_front() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                if seen.insert(kid) {
                    order.push(kid);
                    queue.push_back(kid);
                }
            }
        }
    }

    order
}

fn signal_tree(root: Pid, targets: &[i32], sig: Signal, report: &mut KillReport) -> bool {
    let mut delivered = false;

    match killpg(root, sig) {
        Ok(()) => delivered = true,
        Err(Errno::ESRCH) => {}
        Err(e) => {
            report
                .notes
                .push(format!("group {} fallback to direct signal: {}", sig, e));
            match kill(root, sig) {
                Ok(()) => delivered = true,
                Err(Errno::ESRCH) => {}
                Err(e) => report.notes.push(format!("{} to {}: {}", sig, root, e)),
            }
        }
    }

    for &pid in targets {
        match kill(Pid::from_raw(pid), sig) {
            Ok(()) => delivered = true,
            Err(Errno::ESRCH) => {}
            Err(e) => report.notes.push(format!("{} to {}: {}", sig, pid, e)),
        }
    }

    delivered
}

/// SIGTERM the tree rooted at `root`, wait `grace`, then SIGKILL whatever is
/// left, including descendants spawned during the grace period.
pub fn terminate_process_tree(root: Pid, grace: Duration) -> KillReport {
    let mut report = KillReport::default();
    let start = Instant::now();

    let mut targets = descendants_of(root.as_raw());
    debug!(
        "Terminating process tree of {} ({} descendants)",
        root,
        targets.len()
    );
    report.term_sent = signal_tree(root, &targets, Signal::SIGTERM, &mut report);

    if !grace.is_zero() {
        std::thread::sleep(grace);
    }

    for pid in descendants_of(root.as_raw()) {
        if !targets.contains(&pid) {
            targets.push(pid);
        }
    }
    report.kill_sent = signal_tree(root, &targets, Signal::SIGKILL, &mut report);

    report.descendants = targets;
    report.waited_ms = start.elapsed().as_millis() as u64;
    report
}
