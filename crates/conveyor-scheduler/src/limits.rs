//! Concurrency policies applied before a stage is handed to a worker.
//!
//! Both policies are evaluated against the full list of incomplete stages
//! (pending or running) visible to the dispatch pass, and only depend on
//! that list, so every replica reaches the same decision.

use conveyor_core::stage::{Stage, StageStatus};

/// Whether a stage with a per-name limit may start.
///
/// Counts stages of the same repository and name that are older or already
/// running; the stage is admitted while that count is below its limit. A
/// limit of zero means unlimited.
pub fn within_limits(stage: &Stage, siblings: &[Stage]) -> bool {
    if stage.limit == 0 {
        return true;
    }
    let count = siblings
        .iter()
        .filter(|s| s.repo_id == stage.repo_id && s.id != stage.id && s.name == stage.name)
        .filter(|s| s.id < stage.id || s.status == StageStatus::Running)
        .count();
    count < stage.limit as usize
}

/// Whether a stage must wait because its repository already has
/// `limit_repo` older stages in flight.
///
/// Running stages are never throttled.
pub fn should_throttle(stage: &Stage, siblings: &[Stage]) -> bool {
    if stage.limit_repo == 0 || stage.status == StageStatus::Running {
        return false;
    }
    let count = siblings
        .iter()
        .filter(|s| s.repo_id == stage.repo_id && s.id < stage.id)
        .count();
    count >= stage.limit_repo as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::{RepoId, StageId};

    fn stage(id: i64, repo: i64, name: &str, status: StageStatus) -> Stage {
        Stage {
            id: StageId::new(id),
            repo_id: RepoId::new(repo),
            name: name.to_string(),
            status,
            ..Default::default()
        }
    }

    fn limited(mut s: Stage, limit: u32) -> Stage {
        s.limit = limit;
        s
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let items = vec![
            stage(1, 1, "build", StageStatus::Running),
            stage(2, 1, "build", StageStatus::Pending),
        ];
        assert!(within_limits(&items[1], &items));
    }

    #[test]
    fn test_limit_blocks_while_older_sibling_runs() {
        let items = vec![
            limited(stage(1, 1, "build", StageStatus::Running), 1),
            limited(stage(2, 1, "build", StageStatus::Pending), 1),
        ];
        assert!(!within_limits(&items[1], &items));
        assert!(within_limits(&items[0], &items));
    }

    #[test]
    fn test_limit_counts_older_pending_siblings() {
        let items = vec![
            limited(stage(1, 1, "build", StageStatus::Pending), 2),
            limited(stage(2, 1, "build", StageStatus::Pending), 2),
            limited(stage(3, 1, "build", StageStatus::Pending), 2),
        ];
        assert!(within_limits(&items[0], &items));
        assert!(within_limits(&items[1], &items));
        assert!(!within_limits(&items[2], &items));
    }

    #[test]
    fn test_limit_counts_newer_running_siblings() {
        let items = vec![
            limited(stage(1, 1, "build", StageStatus::Pending), 1),
            limited(stage(2, 1, "build", StageStatus::Running), 1),
        ];
        assert!(!within_limits(&items[0], &items));
    }

    #[test]
    fn test_limit_ignores_other_repos_and_names() {
        let items = vec![
            stage(1, 2, "build", StageStatus::Running),
            stage(2, 1, "deploy", StageStatus::Running),
            limited(stage(3, 1, "build", StageStatus::Pending), 1),
        ];
        assert!(within_limits(&items[2], &items));
    }

    #[test]
    fn test_throttle_by_older_repo_stages() {
        let mut items = vec![
            stage(1, 1, "lint", StageStatus::Running),
            stage(2, 1, "test", StageStatus::Pending),
            stage(3, 2, "build", StageStatus::Running),
        ];
        items[1].limit_repo = 1;
        assert!(should_throttle(&items[1], &items));

        items[1].limit_repo = 2;
        assert!(!should_throttle(&items[1], &items));
    }

    #[test]
    fn test_running_stage_is_never_throttled() {
        let mut items = vec![
            stage(1, 1, "lint", StageStatus::Running),
            stage(2, 1, "test", StageStatus::Running),
        ];
        items[1].limit_repo = 1;
        assert!(!should_throttle(&items[1], &items));
    }

    #[test]
    fn test_admitted_count_never_exceeds_limit() {
        for limit in 1..4u32 {
            for total in 1..8i64 {
                let items: Vec<Stage> = (1..=total)
                    .map(|id| limited(stage(id, 1, "build", StageStatus::Pending), limit))
                    .collect();
                let admitted = items.iter().filter(|s| within_limits(s, &items)).count();
                assert_eq!(admitted, (limit as usize).min(total as usize));
            }
        }
    }
}
