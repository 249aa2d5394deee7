//! Nested scoped transactions with snapshot-based rollback.
//!
//! A [`Transaction`] owns a journal mapping each participant it touched to
//! the state captured when the scope first touched it. Dropping a scope
//! without committing replays the journal in reverse, restoring every
//! participant. Committing a nested scope hands its journal entries to the
//! parent, keeping the parent's older snapshot whenever both scopes touched
//! the same participant. Committing the outermost scope fires
//! [`SnapshotParticipant::on_final_commit`] once for every participant whose
//! state differs from its outermost snapshot.

use std::{collections::HashSet, fmt, rc::Rc};

use tracing::trace;

/// State holder that can be journaled by a [`Transaction`].
pub trait SnapshotParticipant {
    /// Copy of the mutable state captured when a scope first touches the participant.
    type Snapshot: PartialEq + 'static;

    /// Captures the current state.
    fn create_snapshot(&self) -> Self::Snapshot;

    /// Restores a state previously captured by [`SnapshotParticipant::create_snapshot`].
    fn read_snapshot(&self, snapshot: Self::Snapshot);

    /// Durable side effects, run once per outermost commit that changed the state.
    fn on_final_commit(&self) {}
}

type ParticipantKey = usize;

fn participant_key<P>(participant: &Rc<P>) -> ParticipantKey {
    Rc::as_ptr(participant).cast::<()>() as usize
}

trait JournalEntry {
    fn key(&self) -> ParticipantKey;

    fn rollback(self: Box<Self>);

    fn finish(self: Box<Self>);
}

struct Entry<P: SnapshotParticipant> {
    participant: Rc<P>,
    snapshot: P::Snapshot,
}

impl<P> JournalEntry for Entry<P>
where
    P: SnapshotParticipant + 'static,
{
    fn key(&self) -> ParticipantKey {
        participant_key(&self.participant)
    }

    fn rollback(self: Box<Self>) {
        let Entry {
            participant,
            snapshot,
        } = *self;
        participant.read_snapshot(snapshot);
    }

    fn finish(self: Box<Self>) {
        if self.participant.create_snapshot() != self.snapshot {
            self.participant.on_final_commit();
        }
    }
}

#[derive(Default)]
struct Journal {
    keys: HashSet<ParticipantKey>,
    entries: Vec<Box<dyn JournalEntry>>,
}

impl Journal {
    fn record<P>(&mut self, participant: &Rc<P>)
    where
        P: SnapshotParticipant + 'static,
    {
        if !self.keys.insert(participant_key(participant)) {
            return;
        }

        self.entries.push(Box::new(Entry {
            participant: Rc::clone(participant),
            snapshot: participant.create_snapshot(),
        }));
    }

    fn absorb(&mut self, child: Journal) {
        for entry in child.entries {
            if self.keys.insert(entry.key()) {
                self.entries.push(entry);
            }
        }
    }

    fn rollback(self) {
        for entry in self.entries.into_iter().rev() {
            entry.rollback();
        }
    }

    fn finish(self) {
        for entry in self.entries {
            entry.finish();
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Transaction scope guarding participant mutations.
///
/// Scopes roll back when dropped unless [`Transaction::commit`] consumed
/// them first. A nested scope mutably borrows its parent, so the parent
/// cannot be used until the nested scope ends.
pub struct Transaction<'parent> {
    depth: usize,
    journal: Journal,
    parent: Option<&'parent mut Journal>,
    open: bool,
}

impl Transaction<'static> {
    /// Opens an outermost transaction.
    #[must_use]
    pub fn open_outer() -> Self {
        Self {
            depth: 0,
            journal: Journal::default(),
            parent: None,
            open: true,
        }
    }
}

impl<'parent> Transaction<'parent> {
    /// Opens a nested scope whose effects reach this scope only on commit.
    #[must_use]
    pub fn open_nested(&mut self) -> Transaction<'_> {
        Transaction {
            depth: self.depth + 1,
            journal: Journal::default(),
            parent: Some(&mut self.journal),
            open: true,
        }
    }

    /// Nesting depth; zero for the outermost scope.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Reports whether this is the outermost scope.
    #[must_use]
    pub const fn is_outer(&self) -> bool {
        self.depth == 0
    }

    /// Snapshots `participant` unless this scope already holds a snapshot of it.
    ///
    /// Participants call this before their first mutation inside a scope.
    pub fn register<P>(&mut self, participant: &Rc<P>)
    where
        P: SnapshotParticipant + 'static,
    {
        self.journal.record(participant);
    }

    /// Commits the scope.
    ///
    /// Nested scopes promote their snapshots to the parent; the outermost
    /// scope runs the final-commit hooks.
    pub fn commit(mut self) {
        self.open = false;
        let journal = std::mem::take(&mut self.journal);
        let participants = journal.len();

        match self.parent.take() {
            Some(parent) => parent.absorb(journal),
            None => journal.finish(),
        }

        trace!(depth = self.depth, participants, "transaction committed");
    }

    /// Rolls the scope back immediately.
    pub fn abort(self) {
        drop(self);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }

        self.open = false;
        let journal = std::mem::take(&mut self.journal);
        let participants = journal.len();
        if participants > 0 {
            trace!(depth = self.depth, participants, "transaction rolled back");
        }
        journal.rollback();
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("depth", &self.depth)
            .field("participants", &self.journal.len())
            .field("open", &self.open)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use super::{SnapshotParticipant, Transaction};

    #[derive(Default)]
    struct Counter {
        value: Cell<i64>,
        final_commits: Cell<u32>,
    }

    fn add(counter: &Rc<Counter>, delta: i64, transaction: &mut Transaction<'_>) {
        transaction.register(counter);
        counter.value.set(counter.value.get() + delta);
    }

    impl SnapshotParticipant for Counter {
        type Snapshot = i64;

        fn create_snapshot(&self) -> i64 {
            self.value.get()
        }

        fn read_snapshot(&self, snapshot: i64) {
            self.value.set(snapshot);
        }

        fn on_final_commit(&self) {
            self.final_commits.set(self.final_commits.get() + 1);
        }
    }

    #[test]
    fn dropped_outer_scope_restores_state() {
        let counter = Rc::new(Counter::default());
        {
            let mut outer = Transaction::open_outer();
            add(&counter, 5, &mut outer);
            assert_eq!(counter.value.get(), 5);
        }
        assert_eq!(counter.value.get(), 0);
        assert_eq!(counter.final_commits.get(), 0);
    }

    #[test]
    fn uncommitted_nested_scope_leaves_no_trace() {
        let counter = Rc::new(Counter::default());
        let mut outer = Transaction::open_outer();
        add(&counter, 1, &mut outer);
        {
            let mut nested = outer.open_nested();
            add(&counter, 10, &mut nested);
            assert_eq!(counter.value.get(), 11);
        }
        assert_eq!(counter.value.get(), 1);
        outer.commit();
        assert_eq!(counter.value.get(), 1);
        assert_eq!(counter.final_commits.get(), 1);
    }

    #[test]
    fn nested_commit_promotes_without_final_hook() {
        let counter = Rc::new(Counter::default());
        let mut outer = Transaction::open_outer();
        {
            let mut nested = outer.open_nested();
            add(&counter, 7, &mut nested);
            nested.commit();
        }
        assert_eq!(counter.final_commits.get(), 0);
        assert_eq!(counter.value.get(), 7);
        drop(outer);
        assert_eq!(counter.value.get(), 0, "outer rollback must undo promoted effects");
    }

    #[test]
    fn parent_keeps_its_older_snapshot() {
        let counter = Rc::new(Counter::default());
        let mut outer = Transaction::open_outer();
        add(&counter, 2, &mut outer);
        {
            let mut middle = outer.open_nested();
            {
                let mut inner = middle.open_nested();
                add(&counter, 3, &mut inner);
                inner.commit();
            }
            add(&counter, 4, &mut middle);
            middle.commit();
        }
        assert_eq!(counter.value.get(), 9);
        outer.abort();
        assert_eq!(counter.value.get(), 0);
    }

    #[test]
    fn final_hook_skips_participants_that_returned_to_their_snapshot() {
        let counter = Rc::new(Counter::default());
        let mut outer = Transaction::open_outer();
        add(&counter, 6, &mut outer);
        add(&counter, -6, &mut outer);
        outer.commit();
        assert_eq!(counter.final_commits.get(), 0);
    }

    #[test]
    fn final_hook_fires_once_per_commit() {
        let counter = Rc::new(Counter::default());
        let mut outer = Transaction::open_outer();
        for _ in 0..3 {
            let mut nested = outer.open_nested();
            add(&counter, 1, &mut nested);
            nested.commit();
        }
        assert!(outer.is_outer());
        outer.commit();
        assert_eq!(counter.value.get(), 3);
        assert_eq!(counter.final_commits.get(), 1);
    }

    #[test]
    fn depth_tracks_nesting() {
        let mut outer = Transaction::open_outer();
        let mut nested = outer.open_nested();
        let inner = nested.open_nested();
        assert_eq!(inner.depth(), 2);
        assert!(!inner.is_outer());
    }
}
