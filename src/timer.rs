use std::collections::BTreeMap;

use crate::components::EntityId;
use crate::weapons::ProjectileId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerAction {
    /// Calls the entity script's `timeout(timer_id)`.
    ScriptTimeout { entity: EntityId, timer_id: i64 },
    RemoveProjectile(ProjectileId),
}

/// One-shot timers driven by the simulation clock.
///
/// Timers due in the same step fire in due order, ties in scheduling order.
#[derive(Default)]
pub struct TimerQueue {
    elapsed_secs: f64,
    next_seq: u64,
    pending: BTreeMap<(u64, u64), TimerAction>,
}

impl TimerQueue {
    pub fn now_ms(&self) -> u64 {
        (self.elapsed_secs * 1000.0) as u64
    }

    pub fn schedule(&mut self, delay_ms: u64, action: TimerAction) {
        let due = self.now_ms().saturating_add(delay_ms);
        self.pending.insert((due, self.next_seq), action);
        self.next_seq += 1;
    }

    /// Advances the clock and returns every timer that became due.
    pub fn advance(&mut self, dt_secs: f32) -> Vec<TimerAction> {
        self.elapsed_secs += f64::from(dt_secs.max(0.0));
        let now = self.now_ms();
        let later = self.pending.split_off(&(now.saturating_add(1), 0));
        let due = std::mem::replace(&mut self.pending, later);
        due.into_values().collect()
    }

    /// Drops the timers of an entity that left the simulation.
    pub fn cancel_entity(&mut self, entity: EntityId) {
        self.pending.retain(|_, action| {
            !matches!(action, TimerAction::ScriptTimeout { entity: e, .. } if *e == entity)
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
