//! A single scheduling pass.
//!
//! Tiers are visited from most privileged to least. At each funded tier the
//! pass matches idle workers, reprioritizes running work, preempts cheaper
//! runs, and spills throttled requests into the free bucket. The free bucket
//! only gets idle matching. Every decision is applied to state as soon as it
//! is made, so later steps see its effect.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::SchedulerConfig;
use crate::core::cost::{sort_ascending_cost, sort_descending_cost};
use crate::core::error::SchedulerError;
use crate::core::events::EventSink;
use crate::core::model::{TaskRequest, Worker};
use crate::core::mutation::Mutation;
use crate::core::state::SchedulerState;
use crate::util::types::{AccountId, Priority, RequestId, WorkerId};

/// A pending request as seen by one pass.
#[derive(Debug, Clone)]
struct MatchableRequest {
    request: TaskRequest,
    matched: bool,
    /// The account keeps its requests out of the free bucket.
    disable_if_free: bool,
}

impl MatchableRequest {
    /// Higher is a better match: specific requests take workers first.
    fn quality(&self) -> usize {
        self.request.labels.len()
    }
}

/// Working set of one pass over a [`SchedulerState`].
pub(crate) struct SchedulerPass<'a> {
    state: &'a mut SchedulerState,
    config: &'a SchedulerConfig,
    /// Idle workers, cheapest history first.
    idle_workers: Vec<WorkerId>,
    /// Per-tier request lists in FIFO order; index `priorities` is the free bucket.
    requests: Vec<Vec<MatchableRequest>>,
    /// Funded runs each account may still start; absent means unlimited.
    jobs_until_throttled: BTreeMap<AccountId, i64>,
    output: Vec<Mutation>,
}

impl<'a> SchedulerPass<'a> {
    pub(crate) fn new(state: &'a mut SchedulerState, config: &'a SchedulerConfig) -> Self {
        let free_bucket = config.free_bucket();

        let mut jobs_until_throttled: BTreeMap<AccountId, i64> = config
            .accounts
            .iter()
            .filter(|(_, ac)| ac.max_fanout > 0)
            .map(|(id, ac)| (id.clone(), i64::from(ac.max_fanout)))
            .collect();

        let mut idle: Vec<&Worker> = Vec::new();
        for worker in state.workers.values() {
            match worker.running_task.as_ref() {
                None => idle.push(worker),
                Some(run) if run.priority < free_bucket => {
                    if let Some(remaining) = jobs_until_throttled.get_mut(&run.request.account_id)
                    {
                        *remaining -= 1;
                    }
                }
                Some(_) => {}
            }
        }
        sort_ascending_cost(&mut idle, |w| &w.cost_history);
        let idle_workers = idle.into_iter().map(|w| w.id.clone()).collect();

        let requests = prioritize_requests(state, config, &jobs_until_throttled);

        Self {
            state,
            config,
            idle_workers,
            requests,
            jobs_until_throttled,
            output: Vec::new(),
        }
    }

    /// Run every step of the pass, returning the applied mutations in order.
    pub(crate) fn run(mut self, sink: &mut dyn EventSink) -> Result<Vec<Mutation>, SchedulerError> {
        let free_bucket = self.config.free_bucket();
        for priority in 0..free_bucket {
            self.match_idle_workers(priority, true, sink)?;
            self.match_idle_workers(priority, false, sink)?;
            self.reprioritize_running_tasks(priority, sink)?;
            if !self.config.disable_preemption {
                self.preempt_running_tasks(priority, sink)?;
            }
            self.move_throttled_requests(priority);
        }

        // Spilled requests joined the free list out of order.
        self.requests[free_bucket].sort_by(|a, b| fifo_key(&a.request).cmp(&fifo_key(&b.request)));
        self.match_idle_workers(free_bucket, true, sink)?;
        self.match_idle_workers(free_bucket, false, sink)?;

        Ok(self.output)
    }

    fn commit(&mut self, mutation: Mutation, sink: &mut dyn EventSink) -> Result<(), SchedulerError> {
        self.state.apply(&mutation, self.config, sink)?;
        self.output.push(mutation);
        Ok(())
    }

    fn is_throttled(&self, account_id: &str) -> bool {
        self.jobs_until_throttled
            .get(account_id)
            .is_some_and(|remaining| *remaining <= 0)
    }

    /// Fanout applies to funded tiers; `disable_free_tasks` to the free bucket.
    fn should_skip(&self, item: &MatchableRequest, priority: Priority) -> bool {
        if priority == self.config.free_bucket() {
            item.disable_if_free
        } else {
            self.is_throttled(&item.request.account_id)
        }
    }

    fn mark_matched(&mut self, priority: Priority, idx: usize) {
        let item = &mut self.requests[priority][idx];
        item.matched = true;
        if priority < self.config.free_bucket() {
            if let Some(remaining) = self.jobs_until_throttled.get_mut(&item.request.account_id) {
                *remaining -= 1;
            }
        }
    }

    fn match_idle_workers(
        &mut self,
        priority: Priority,
        require_provision: bool,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        let workers = self.idle_workers.clone();
        for worker_id in workers {
            let Some(idx) = self.best_idle_match(&worker_id, priority, require_provision) else {
                continue;
            };
            let request_id = self.requests[priority][idx].request.id.clone();
            self.commit(
                Mutation::AssignIdleWorker {
                    worker_id: worker_id.clone(),
                    request_id,
                    priority,
                },
                sink,
            )?;
            self.mark_matched(priority, idx);
            self.idle_workers.retain(|w| *w != worker_id);
        }
        Ok(())
    }

    /// Highest-quality eligible request for a worker; earliest wins ties.
    fn best_idle_match(
        &self,
        worker_id: &str,
        priority: Priority,
        require_provision: bool,
    ) -> Option<usize> {
        let worker = self.state.workers.get(worker_id)?;
        let mut best: Option<(usize, usize)> = None;
        for (idx, item) in self.requests[priority].iter().enumerate() {
            if item.matched || self.should_skip(item, priority) {
                continue;
            }
            if !worker.satisfies(&item.request.labels) {
                continue;
            }
            if require_provision && !worker.satisfies(&item.request.provisionable_labels) {
                continue;
            }
            let quality = item.quality();
            if best.is_none_or(|(_, q)| quality > q) {
                best = Some((idx, quality));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Demote runs out of `priority` for accounts deep in debt there, or
    /// promote runs into it for accounts with a large surplus.
    fn reprioritize_running_tasks(
        &mut self,
        priority: Priority,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        let mut changes = Vec::new();
        for (account_id, balance) in &self.state.balances {
            let Some(account) = self.config.accounts.get(account_id) else {
                continue;
            };
            let at_p = balance.get(priority);
            let demote = at_p < self.config.demote_threshold;
            let promote = at_p > self.config.promote_threshold;
            if !demote && !promote {
                continue;
            }

            let mut running_at_p = self.running_for(account_id, |p| p == priority);
            #[allow(clippy::cast_precision_loss)]
            let rate = account.rate_at(priority) - running_at_p.len() as f64;

            if demote && rate < 0.0 {
                sort_ascending_cost(&mut running_at_p, |w| w.ranking_cost());
                changes.extend(
                    running_at_p
                        .into_iter()
                        .take(ceil_count(-rate))
                        .map(|w| (w.id.clone(), priority + 1)),
                );
            } else if promote && rate > 0.0 {
                let mut running_below = self.running_for(account_id, |p| p > priority);
                sort_descending_cost(&mut running_below, |w| w.ranking_cost());
                changes.extend(
                    running_below
                        .into_iter()
                        .take(ceil_count(rate))
                        .map(|w| (w.id.clone(), priority)),
                );
            }
        }

        for (worker_id, priority) in changes {
            self.commit(
                Mutation::ChangePriority {
                    worker_id,
                    priority,
                },
                sink,
            )?;
        }
        Ok(())
    }

    fn running_for(&self, account_id: &str, at: impl Fn(Priority) -> bool) -> Vec<&Worker> {
        self.state
            .workers
            .values()
            .filter(|w| {
                w.running_task
                    .as_ref()
                    .is_some_and(|run| run.request.account_id == account_id && at(run.priority))
            })
            .collect()
    }

    /// Let unmatched requests at `priority` take over workers running less
    /// privileged work.
    fn preempt_running_tasks(
        &mut self,
        priority: Priority,
        sink: &mut dyn EventSink,
    ) -> Result<(), SchedulerError> {
        // Accounts already running below this tier may not preempt at it;
        // otherwise an account that cannot afford promotion would churn its
        // own work.
        let banned: BTreeSet<AccountId> = self
            .state
            .workers
            .values()
            .filter_map(|w| w.running_task.as_ref())
            .filter(|run| run.priority > priority)
            .map(|run| run.request.account_id.clone())
            .collect();

        for idx in 0..self.requests[priority].len() {
            let item = &self.requests[priority][idx];
            if item.matched
                || banned.contains(&item.request.account_id)
                || self.is_throttled(&item.request.account_id)
            {
                continue;
            }
            let Some(victim) = self.preemption_candidate(&item.request, priority) else {
                continue;
            };
            let mutation = Mutation::PreemptTask {
                worker_id: victim.0,
                request_id: item.request.id.clone(),
                priority,
                task_to_abort: victim.1,
            };
            self.commit(mutation, sink)?;
            self.mark_matched(priority, idx);
        }
        Ok(())
    }

    /// Most expensive run below `priority` that fits `request` and that the
    /// request's account can pay for. Returns `(worker, running request)`.
    fn preemption_candidate(
        &self,
        request: &TaskRequest,
        priority: Priority,
    ) -> Option<(WorkerId, RequestId)> {
        let balance = self.state.balances.get(&request.account_id)?;
        let mut candidates: Vec<&Worker> = self
            .state
            .workers
            .values()
            .filter(|w| {
                w.running_task.as_ref().is_some_and(|run| {
                    run.priority > priority && run.cost.less(balance)
                }) && w.satisfies(&request.labels)
            })
            .collect();
        sort_descending_cost(&mut candidates, |w| w.ranking_cost());
        let worker = candidates.first()?;
        let running = worker.running_request_id()?;
        Some((worker.id.clone(), running.to_string()))
    }

    /// Give requests throttled at `priority` a chance in the free bucket.
    fn move_throttled_requests(&mut self, priority: Priority) {
        let free_bucket = self.config.free_bucket();
        let spilled: Vec<MatchableRequest> = self.requests[priority]
            .iter()
            .filter(|item| {
                !item.matched
                    && !item.disable_if_free
                    && self.is_throttled(&item.request.account_id)
            })
            .cloned()
            .collect();
        if !spilled.is_empty() {
            tracing::debug!(priority, count = spilled.len(), "spilling throttled requests");
        }
        self.requests[free_bucket].extend(spilled);
    }
}

fn fifo_key(request: &TaskRequest) -> (u64, &str) {
    (request.enqueue_time, request.id.as_str())
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ceil_count(value: f64) -> usize {
    value.ceil().max(0.0) as usize
}

/// Bucket pending requests by the tier their account's balance funds.
fn prioritize_requests(
    state: &SchedulerState,
    config: &SchedulerConfig,
    jobs_until_throttled: &BTreeMap<AccountId, i64>,
) -> Vec<Vec<MatchableRequest>> {
    let free_bucket = config.free_bucket();
    let mut pending: Vec<&TaskRequest> = state.queued_requests.values().collect();
    pending.sort_by(|a, b| fifo_key(a).cmp(&fifo_key(b)));

    let mut requests = vec![Vec::new(); free_bucket + 1];
    for request in pending {
        let disable_if_free = config
            .accounts
            .get(&request.account_id)
            .is_some_and(|ac| ac.disable_free_tasks);
        let throttled = jobs_until_throttled
            .get(&request.account_id)
            .is_some_and(|remaining| *remaining <= 0);

        let mut priority = state
            .balances
            .get(&request.account_id)
            .and_then(|balance| balance.best_priority(free_bucket))
            .unwrap_or(free_bucket);
        if throttled {
            priority = free_bucket;
        }
        if priority == free_bucket && disable_if_free {
            continue;
        }
        requests[priority].push(MatchableRequest {
            request: request.clone(),
            matched: false,
            disable_if_free,
        });
    }
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccountConfig;
    use crate::core::cost::CostVector;
    use crate::core::events::NullEventSink;
    use crate::util::types::{labels, LabelSet};

    fn setup(balances: &[(&str, Vec<f64>)]) -> (SchedulerState, SchedulerConfig) {
        let mut config = SchedulerConfig::with_priorities(2);
        let mut state = SchedulerState::new(0);
        for (id, balance) in balances {
            config
                .accounts
                .insert((*id).to_string(), AccountConfig::new(vec![1.0, 1.0], 100.0, 0));
            state
                .balances
                .insert((*id).to_string(), CostVector::from(balance.clone()));
        }
        (state, config)
    }

    fn run(state: &mut SchedulerState, config: &SchedulerConfig) -> Vec<Mutation> {
        SchedulerPass::new(state, config).run(&mut NullEventSink).unwrap()
    }

    #[test]
    fn test_requests_bucketed_by_funded_tier() {
        let (mut state, config) = setup(&[("a", vec![0.0, 3.0]), ("b", vec![-1.0, 0.0])]);
        let mut sink = NullEventSink;
        state.add_request(TaskRequest::new("ra", "a", LabelSet::new(), 1), 1, &mut sink);
        state.add_request(TaskRequest::new("rb", "b", LabelSet::new(), 2), 2, &mut sink);
        state.add_request(TaskRequest::new("rz", "zed", LabelSet::new(), 0), 0, &mut sink);

        let buckets = prioritize_requests(&state, &config, &BTreeMap::new());
        let ids = |p: usize| -> Vec<&str> {
            buckets[p].iter().map(|m| m.request.id.as_str()).collect()
        };
        assert!(ids(0).is_empty());
        assert_eq!(ids(1), vec!["ra"]);
        assert_eq!(ids(2), vec!["rz", "rb"]);
    }

    #[test]
    fn test_more_specific_request_wins_worker() {
        let (mut state, config) = setup(&[("a", vec![5.0, 0.0])]);
        let mut sink = NullEventSink;
        state.mark_idle("w1", labels(["x", "y"]), 0, &mut sink);
        state.add_request(TaskRequest::new("plain", "a", LabelSet::new(), 0), 0, &mut sink);
        state.add_request(TaskRequest::new("picky", "a", labels(["y"]), 1), 1, &mut sink);

        let mutations = run(&mut state, &config);
        assert_eq!(mutations.len(), 1);
        assert_eq!(mutations[0].request_id(), Some("picky"));
    }

    #[test]
    fn test_provision_match_preferred_over_earlier_request() {
        let (mut state, config) = setup(&[("a", vec![5.0, 0.0])]);
        let mut sink = NullEventSink;
        state.mark_idle("w1", labels(["cache:warm"]), 0, &mut sink);
        state.add_request(
            TaskRequest::new("cold", "a", LabelSet::new(), 0)
                .with_provisionable_labels(labels(["cache:other"])),
            0,
            &mut sink,
        );
        state.add_request(
            TaskRequest::new("warm", "a", LabelSet::new(), 1)
                .with_provisionable_labels(labels(["cache:warm"])),
            1,
            &mut sink,
        );

        let mutations = run(&mut state, &config);
        assert_eq!(mutations[0].request_id(), Some("warm"));
        assert!(state.queued_requests().contains_key("cold"));
    }

    #[test]
    fn test_ceil_count() {
        assert_eq!(ceil_count(0.2), 1);
        assert_eq!(ceil_count(2.0), 2);
        assert_eq!(ceil_count(-1.0), 0);
    }
}
