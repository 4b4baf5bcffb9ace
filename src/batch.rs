//! # Batch Accumulator
//!
//! Holds the insert group that is waiting to be flushed, and decides when it
//! must be.
//!
//! ```text
//!             first member arrives
//!                     │
//!   ┌─────────────────▼──────────────────┐
//!   │ members: [p1, p2, p3]              │   flush when
//!   │ bytes:   Σ encoded_len             │   ─ bytes × margin > max payload
//!   │ opened:  p1 enqueue time           │   ─ now − opened ≥ flush interval
//!   └────────────────────────────────────┘
//! ```
//!
//! The accumulator is owned by the dispatcher loop and never shared, so it
//! needs no locking.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::DispatcherConfig;
use crate::package::CommandPackage;
use crate::types::StatementKind;

/// Why a group was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The accumulated size crossed the payload bound.
    Size,
    /// The group's first member has waited the full flush interval.
    Time,
    /// The next member would not fit, so the current group went first.
    Overflow,
    /// The dispatcher is stopping.
    Shutdown,
}

/// Insert packages waiting for a combined flush.
#[derive(Debug, Default)]
pub struct BatchGroup {
    members: Vec<CommandPackage>,
    bytes: usize,
    opened_at: Option<Instant>,
}

impl BatchGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Accumulated encoded size of all members.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Enqueue time of the first member, `None` while empty.
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Appends an insert package. The group opens at its first member's
    /// enqueue time, so a member that waited in the queue brings its
    /// deadline with it.
    pub fn push(&mut self, package: CommandPackage) {
        debug_assert_eq!(package.kind(), StatementKind::Insertion);
        if self.members.is_empty() {
            self.opened_at = Some(package.created_at());
        }
        self.bytes += package.encoded_len();
        self.members.push(package);
    }

    /// True if adding `len` more bytes to a non-empty group would cross the
    /// payload bound.
    pub fn would_overflow(&self, len: usize, config: &DispatcherConfig) -> bool {
        !self.is_empty() && config.exceeds_payload(self.bytes + len)
    }

    /// Evaluates both flush triggers at `now`.
    pub fn flush_reason(&self, now: Instant, config: &DispatcherConfig) -> Option<FlushReason> {
        let opened_at = self.opened_at?;
        if config.exceeds_payload(self.bytes) {
            return Some(FlushReason::Size);
        }
        if now.saturating_duration_since(opened_at) >= config.flush_interval {
            return Some(FlushReason::Time);
        }
        None
    }

    /// When the time trigger fires, `None` while empty or past the end of
    /// the clock.
    pub fn deadline(&self, flush_interval: Duration) -> Option<Instant> {
        self.opened_at?.checked_add(flush_interval)
    }

    /// Removes and returns all members, leaving an empty group.
    pub fn take(&mut self) -> Vec<CommandPackage> {
        self.bytes = 0;
        self.opened_at = None;
        std::mem::take(&mut self.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Statement;

    fn insert_of_len(total: usize) -> CommandPackage {
        // "INSERT INTO " + clause + ";"
        let clause = "x".repeat(total - 13);
        CommandPackage::new(Statement::insert(clause).unwrap()).0
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_trigger() {
        let config = DispatcherConfig::default();
        let mut group = BatchGroup::new();
        let start = Instant::now();

        assert_eq!(group.flush_reason(start, &config), None);
        assert_eq!(group.deadline(config.flush_interval), None);

        group.push(insert_of_len(20));
        assert_eq!(group.flush_reason(start, &config), None);
        assert_eq!(
            group.deadline(config.flush_interval),
            Some(start + Duration::from_millis(4))
        );

        tokio::time::advance(Duration::from_millis(3)).await;
        group.push(insert_of_len(20));
        // The deadline follows the first member, not the latest.
        assert_eq!(group.opened_at(), Some(start));
        assert_eq!(group.flush_reason(Instant::now(), &config), None);
        assert_eq!(
            group.flush_reason(start + Duration::from_millis(4), &config),
            Some(FlushReason::Time)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_group_opens_at_enqueue_time() {
        let config = DispatcherConfig::default();
        let mut group = BatchGroup::new();

        let start = Instant::now();
        let waited = insert_of_len(20);
        tokio::time::advance(Duration::from_millis(10)).await;

        // Already overdue when it reaches the group.
        group.push(waited);
        assert_eq!(group.opened_at(), Some(start));
        assert_eq!(
            group.flush_reason(Instant::now(), &config),
            Some(FlushReason::Time)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_past_end_of_clock() {
        let mut group = BatchGroup::new();
        group.push(insert_of_len(20));
        assert_eq!(group.deadline(Duration::MAX), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger() {
        let config = DispatcherConfig::default();
        let mut group = BatchGroup::new();
        let now = Instant::now();

        group.push(insert_of_len(900_000));
        assert_eq!(group.flush_reason(now, &config), None);
        assert!(group.would_overflow(60_000, &config));
        assert!(!group.would_overflow(50_000, &config));

        group.push(insert_of_len(60_000));
        assert_eq!(group.bytes(), 960_000);
        assert_eq!(group.flush_reason(now, &config), Some(FlushReason::Size));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_single_member() {
        let config = DispatcherConfig::default();
        let mut group = BatchGroup::new();
        let now = Instant::now();

        // An empty group never reports overflow; the statement goes in alone.
        assert!(!group.would_overflow(2_000_000, &config));
        group.push(insert_of_len(2_000_000));
        assert_eq!(group.flush_reason(now, &config), Some(FlushReason::Size));
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_resets() {
        let mut group = BatchGroup::new();
        group.push(insert_of_len(30));
        group.push(insert_of_len(30));

        let members = group.take();
        assert_eq!(members.len(), 2);
        assert!(group.is_empty());
        assert_eq!(group.bytes(), 0);
        assert_eq!(group.opened_at(), None);
    }
}
