//! First Interactive
//!
//! The first moment after FCP where the main thread stays free of bad long
//! task clusters for a required window. The window starts at 5s right after
//! FCP and decays toward 1s with a half-life of 15s.

use tracing::trace;

use super::{LongTask, QuietWindowTrace};

/// Tasks separated by more than this start a new cluster.
pub const MIN_TASK_CLUSTER_PADDING: f64 = 1000.0;

/// Clusters longer than this block interactivity.
pub const MAX_TASK_CLUSTER_DURATION: f64 = 250.0;

/// Clusters starting closer than this to FCP block interactivity.
pub const MIN_TASK_CLUSTER_FCP_DISTANCE: f64 = 5000.0;

/// Decay coefficient, `-ln(2) / 15`.
pub fn exponentiation_coefficient() -> f64 {
    -std::f64::consts::LN_2 / 15.0
}

/// Required quiet window in ms, `t` in ms since FCP.
///
/// ```
/// use uxm_core::interactive::required_window_size;
///
/// assert_eq!(required_window_size(0.0), 5000.0);
/// assert!((required_window_size(15_000.0) - 3000.0).abs() < 1e-9);
/// ```
pub fn required_window_size(t: f64) -> f64 {
    let seconds = t / 1000.0;
    (4.0 * (exponentiation_coefficient() * seconds).exp() + 1.0) * 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TaskCluster {
    start: f64,
    end: f64,
}

impl TaskCluster {
    fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Clusters of the tasks following a candidate that start before
/// `window_end`. Tasks up to one padding past the window still join the
/// cluster they continue.
fn clusters_in_window(tasks: &[LongTask], window_end: f64) -> Vec<TaskCluster> {
    let clustering_end = window_end + MIN_TASK_CLUSTER_PADDING;
    let mut clusters: Vec<TaskCluster> = Vec::new();
    let mut previous_end = f64::NEG_INFINITY;

    for task in tasks.iter().take_while(|task| task.start < clustering_end) {
        match clusters.last_mut() {
            Some(cluster) if task.start - previous_end <= MIN_TASK_CLUSTER_PADDING => {
                cluster.end = task.end();
            }
            _ => clusters.push(TaskCluster {
                start: task.start,
                end: task.end(),
            }),
        }
        previous_end = task.end();
    }

    clusters.retain(|cluster| cluster.start < window_end);
    clusters
}

/// First Interactive of `trace`, or `None` when it cannot be determined yet.
///
/// With no long task after FCP, or a first long task beyond the initial
/// window, the page was interactive at FCP itself. A quiet window found after
/// a long task is clamped to at least DOMContentLoaded.
pub fn first_interactive(trace: &QuietWindowTrace) -> Option<f64> {
    let fcp = trace.fcp;
    if !fcp.is_finite() || fcp <= 0.0 {
        return None;
    }

    let tasks: Vec<LongTask> = trace
        .sorted_long_tasks()
        .into_iter()
        .filter(|task| task.start >= fcp)
        .collect();

    match tasks.first() {
        None => return Some(fcp),
        Some(first) if first.start > fcp + required_window_size(0.0) => return Some(fcp),
        Some(_) => {}
    }

    let trace_end = trace.end_time();
    let is_bad = |cluster: &TaskCluster| {
        cluster.start < fcp + MIN_TASK_CLUSTER_FCP_DISTANCE
            || cluster.duration() > MAX_TASK_CLUSTER_DURATION
    };

    for (index, task) in tasks.iter().enumerate() {
        let window_start = task.end();
        let window_end = window_start + required_window_size(window_start - fcp);
        if window_end > trace_end {
            trace!(window_start, window_end, trace_end, "quiet window runs past the trace");
            return None;
        }

        let following = &tasks[index + 1..];
        if following
            .first()
            .is_some_and(|next| next.start - window_start <= MIN_TASK_CLUSTER_PADDING)
        {
            continue;
        }

        if !clusters_in_window(following, window_end).iter().any(is_bad) {
            return Some(window_start.max(trace.dcl));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace(tasks: &[(f64, f64)]) -> QuietWindowTrace {
        QuietWindowTrace::new(1000.0, 1200.0).with_long_tasks(
            tasks
                .iter()
                .map(|&(start, duration)| LongTask::new(start, duration))
                .collect(),
        )
    }

    #[test]
    fn test_no_long_tasks_is_fcp() {
        assert_eq!(first_interactive(&trace(&[])), Some(1000.0));
    }

    #[test]
    fn test_tasks_before_fcp_are_ignored() {
        assert_eq!(first_interactive(&trace(&[(400.0, 300.0)])), Some(1000.0));
    }

    #[test]
    fn test_single_long_task() {
        assert_eq!(first_interactive(&trace(&[(1200.0, 60.0)])), Some(1260.0));
    }

    #[test]
    fn test_result_is_clamped_to_dcl() {
        let trace = QuietWindowTrace::new(1000.0, 2000.0)
            .with_long_tasks(vec![LongTask::new(1200.0, 60.0)]);
        assert_eq!(first_interactive(&trace), Some(2000.0));
    }

    #[test]
    fn test_late_first_task_is_fcp() {
        assert_eq!(first_interactive(&trace(&[(6500.0, 80.0)])), Some(1000.0));
    }

    #[test]
    fn test_adjacent_task_skips_candidate() {
        // 1260 is followed by a task 500ms later, so the window starts at
        // the end of the cluster instead
        assert_eq!(
            first_interactive(&trace(&[(1200.0, 60.0), (1760.0, 60.0)])),
            Some(1820.0)
        );
    }

    #[test]
    fn test_bad_cluster_moves_window() {
        // a 400ms cluster 2s after the first task is too long
        let tasks = [(1200.0, 60.0), (3000.0, 200.0), (3300.0, 200.0), (9000.0, 60.0)];
        let fi = first_interactive(&trace(&tasks)).unwrap();
        assert_eq!(fi, 3500.0);
    }

    #[test]
    fn test_window_past_trace_end_is_undetermined() {
        let trace = trace(&[(1200.0, 60.0)]).with_trace_end(3000.0);
        assert_eq!(first_interactive(&trace), None);
    }

    #[test]
    fn test_missing_fcp_is_undetermined() {
        assert_eq!(first_interactive(&QuietWindowTrace::new(0.0, 100.0)), None);
    }

    #[test]
    fn test_window_size_decays() {
        assert_eq!(required_window_size(0.0), 5000.0);
        assert!(required_window_size(260.0) < 5000.0);
        assert!(required_window_size(600_000.0) > 1000.0);
        assert!(required_window_size(600_000.0) < 1001.0);
    }
}
