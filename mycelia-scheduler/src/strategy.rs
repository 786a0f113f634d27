use std::time::Instant;

/// A read-only snapshot of one subsystem scheduler, as seen by the
/// global scheduler when deciding who goes next.
#[derive(Debug, Clone)]
pub struct SubsystemSnapshot {
    pub name: String,
    pub priority: i64,
    /// Timestamp the oldest still-queued message was enqueued at, if any.
    pub oldest_waiting: Option<Instant>,
    pub registration_index: usize,
}

/// Chooses which registered subsystem receives the next time slice.
/// `tick` is a monotonically increasing counter the global scheduler
/// owns; stateless strategies use it for deterministic rotation.
pub trait SchedulingStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn select(&self, subsystems: &[SubsystemSnapshot], tick: u64) -> Option<usize>;
}

/// Cycles subsystems in registration order, granting each an equal
/// slice. Ignores `priority` entirely — it is surfaced only through
/// [`PriorityStrategy`] (§9 Open Questions).
pub struct RoundRobinStrategy;

impl SchedulingStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, subsystems: &[SubsystemSnapshot], tick: u64) -> Option<usize> {
        if subsystems.is_empty() {
            return None;
        }
        Some((tick as usize) % subsystems.len())
    }
}

/// Sorts by descending priority, breaking ties by round-robin among
/// equal-priority subsystems.
pub struct PriorityStrategy;

impl SchedulingStrategy for PriorityStrategy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn select(&self, subsystems: &[SubsystemSnapshot], tick: u64) -> Option<usize> {
        if subsystems.is_empty() {
            return None;
        }
        let mut ranked: Vec<usize> = (0..subsystems.len()).collect();
        ranked.sort_by(|&a, &b| {
            subsystems[b]
                .priority
                .cmp(&subsystems[a].priority)
                .then(subsystems[a].registration_index.cmp(&subsystems[b].registration_index))
        });
        Some(ranked[(tick as usize) % ranked.len()])
    }
}

/// Services the subsystem whose oldest queued message has waited
/// longest; subsystems with empty queues are skipped unless every
/// subsystem is empty, in which case it falls back to round-robin so
/// the tick loop still makes progress.
pub struct FifoStrategy;

impl SchedulingStrategy for FifoStrategy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn select(&self, subsystems: &[SubsystemSnapshot], tick: u64) -> Option<usize> {
        if subsystems.is_empty() {
            return None;
        }
        let waiting = subsystems
            .iter()
            .enumerate()
            .filter(|(_, s)| s.oldest_waiting.is_some())
            .min_by(|(_, a), (_, b)| {
                a.oldest_waiting
                    .cmp(&b.oldest_waiting)
                    .then(a.registration_index.cmp(&b.registration_index))
            })
            .map(|(index, _)| index);
        waiting.or_else(|| Some((tick as usize) % subsystems.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str, priority: i64, registration_index: usize) -> SubsystemSnapshot {
        SubsystemSnapshot {
            name: name.to_string(),
            priority,
            oldest_waiting: None,
            registration_index,
        }
    }

    #[test]
    fn round_robin_cycles_through_all_subsystems() {
        let subsystems = vec![snapshot("a", 0, 0), snapshot("b", 0, 1), snapshot("c", 0, 2)];
        let strategy = RoundRobinStrategy;
        let picks: Vec<usize> = (0..6).map(|t| strategy.select(&subsystems, t).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn priority_strategy_prefers_higher_priority() {
        let subsystems = vec![snapshot("low", 1, 0), snapshot("high", 10, 1)];
        let strategy = PriorityStrategy;
        assert_eq!(strategy.select(&subsystems, 0), Some(1));
    }

    #[test]
    fn priority_strategy_round_robins_within_ties() {
        let subsystems = vec![snapshot("a", 5, 0), snapshot("b", 5, 1)];
        let strategy = PriorityStrategy;
        let first = strategy.select(&subsystems, 0).unwrap();
        let second = strategy.select(&subsystems, 1).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn fifo_strategy_falls_back_when_all_queues_empty() {
        let subsystems = vec![snapshot("a", 0, 0), snapshot("b", 0, 1)];
        let strategy = FifoStrategy;
        assert!(strategy.select(&subsystems, 0).is_some());
    }
}
