//! Point-to-point helpers built on the transaction protocol.
//!
//! Every helper opens its own outermost [`Transaction`] and commits it only
//! when `simulate` is false, so a simulated call reports what would happen
//! and leaves no trace.

use crate::{Storage, Transaction};

/// Inserts up to `max_amount` into `storage`, returning the amount accepted.
pub fn insert(storage: &dyn Storage, max_amount: u64, simulate: bool) -> u64 {
    let mut transaction = Transaction::open_outer();
    let inserted = storage.insert(max_amount, &mut transaction);
    finish(transaction, simulate);
    inserted
}

/// Extracts up to `max_amount` from `storage`, returning the amount removed.
pub fn extract(storage: &dyn Storage, max_amount: u64, simulate: bool) -> u64 {
    let mut transaction = Transaction::open_outer();
    let extracted = storage.extract(max_amount, &mut transaction);
    finish(transaction, simulate);
    extracted
}

/// Moves up to `max_amount` from `from` into `to`, returning the amount inserted.
///
/// Energy the receiver rejects is refunded into the source. When the refund
/// itself falls short the whole transfer is rolled back and zero is returned.
pub fn transfer(from: &dyn Storage, to: &dyn Storage, max_amount: u64, simulate: bool) -> u64 {
    if max_amount == 0 || same_endpoint(from, to) {
        return 0;
    }
    if !from.supports_extraction() || !to.supports_insertion() {
        return 0;
    }

    let mut transaction = Transaction::open_outer();
    let extracted = from.extract(max_amount, &mut transaction);
    if extracted == 0 {
        return 0;
    }

    let inserted = to.insert(extracted, &mut transaction);
    if inserted < extracted {
        let remainder = extracted - inserted;
        let refunded = from.insert(remainder, &mut transaction);
        if refunded != remainder {
            tracing::debug!(remainder, refunded, "transfer refund fell short, rolling back");
            return 0;
        }
    }

    finish(transaction, simulate);
    inserted
}

/// Spends up to `max_amount` from `storage`, returning the amount spent.
pub fn consume_up_to(storage: &dyn Storage, max_amount: u64, simulate: bool) -> u64 {
    extract(storage, max_amount, simulate)
}

/// Spends exactly `amount` from `storage`, or nothing at all.
///
/// Returns `false` for a zero request or when the storage cannot pay in full.
pub fn consume_exact(storage: &dyn Storage, amount: u64, simulate: bool) -> bool {
    if amount == 0 || !storage.supports_extraction() {
        return false;
    }

    let mut transaction = Transaction::open_outer();
    if storage.extract(amount, &mut transaction) != amount {
        return false;
    }
    finish(transaction, simulate);
    true
}

/// Inserts freshly generated energy into `storage`.
pub fn generate_to(storage: &dyn Storage, amount: u64, simulate: bool) -> u64 {
    insert(storage, amount, simulate)
}

/// Generates `per_tick` into `storage` when the producer reports itself active.
pub fn tick_generate_to(storage: &dyn Storage, per_tick: u64, active: bool, simulate: bool) -> u64 {
    if !active || per_tick == 0 {
        return 0;
    }
    generate_to(storage, per_tick, simulate)
}

fn same_endpoint(first: &dyn Storage, second: &dyn Storage) -> bool {
    std::ptr::addr_eq(first, second)
}

fn finish(transaction: Transaction<'_>, simulate: bool) {
    if simulate {
        transaction.abort();
    } else {
        transaction.commit();
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{EnergyRecord, EnergyStorage, DEFAULT_RECORD_KEY};

    #[test]
    fn simulated_insert_reports_without_mutating() {
        let storage = EnergyStorage::with_amount(100, 90);
        assert_eq!(insert(&storage, 25, true), 10);
        assert_eq!(storage.amount(), 90);
        assert_eq!(insert(&storage, 25, false), 10);
        assert_eq!(storage.amount(), 100);
    }

    #[test]
    fn transfer_moves_what_the_receiver_accepts() {
        let from = EnergyStorage::with_amount(100, 60);
        let to = EnergyStorage::with_amount(50, 30);
        assert_eq!(transfer(&from, &to, 40, false), 20);
        assert_eq!(from.amount(), 40);
        assert_eq!(to.amount(), 50);
    }

    #[test]
    fn transfer_rejects_self_and_disabled_directions() {
        let storage = EnergyStorage::with_amount(100, 60);
        assert_eq!(transfer(&storage, &storage, 10, false), 0);

        let sealed = EnergyStorage::builder(100)
            .insertion(false)
            .build();
        assert_eq!(transfer(&storage, &sealed, 10, false), 0);
        assert_eq!(storage.amount(), 60);
    }

    #[test]
    fn transfer_rolls_back_when_refund_falls_short() {
        // Extract-only source: the rejected remainder cannot go back.
        let from = EnergyStorage::builder(100)
            .initial_amount(50)
            .insertion(false)
            .build();
        let to = EnergyStorage::with_amount(10, 5);
        assert_eq!(transfer(&from, &to, 20, false), 0);
        assert_eq!(from.amount(), 50);
        assert_eq!(to.amount(), 5);
    }

    #[test]
    fn simulated_transfer_leaves_records_untouched() {
        let record = Rc::new(RefCell::new(EnergyRecord::new()));
        let from = EnergyStorage::persistent(100, Rc::clone(&record), DEFAULT_RECORD_KEY);
        assert_eq!(generate_to(&from, 70, false), 70);
        assert_eq!(record.borrow().get(DEFAULT_RECORD_KEY), Some(70));

        let to = EnergyStorage::new(100);
        assert_eq!(transfer(&from, &to, 30, true), 30);
        assert_eq!(from.amount(), 70);
        assert_eq!(to.amount(), 0);
        assert_eq!(record.borrow().get(DEFAULT_RECORD_KEY), Some(70));
    }

    #[test]
    fn consume_exact_is_all_or_nothing() {
        let storage = EnergyStorage::with_amount(100, 15);
        assert!(!consume_exact(&storage, 20, false));
        assert_eq!(storage.amount(), 15);
        assert!(consume_exact(&storage, 15, true));
        assert_eq!(storage.amount(), 15);
        assert!(consume_exact(&storage, 15, false));
        assert_eq!(storage.amount(), 0);
        assert!(!consume_exact(&storage, 0, false));
    }

    #[test]
    fn consume_up_to_takes_what_is_there() {
        let storage = EnergyStorage::with_amount(100, 15);
        assert_eq!(consume_up_to(&storage, 40, false), 15);
        assert_eq!(storage.amount(), 0);
    }

    #[test]
    fn tick_generation_requires_activity() {
        let storage = EnergyStorage::new(100);
        assert_eq!(tick_generate_to(&storage, 20, false, false), 0);
        assert_eq!(tick_generate_to(&storage, 0, true, false), 0);
        assert_eq!(tick_generate_to(&storage, 20, true, false), 20);
        assert_eq!(storage.amount(), 20);
    }
}
