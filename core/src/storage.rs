//! Transactional energy storage endpoints and their persisted records.

use std::{cell::Cell, cell::RefCell, collections::BTreeMap, fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transaction::{SnapshotParticipant, Transaction};

/// Record key used when callers do not name one.
pub const DEFAULT_RECORD_KEY: &str = "energy";

/// Bounded energy container addressed through a grid side.
///
/// Mutations only happen under a [`Transaction`]; reads never need one.
/// Implementations must defer every durable side effect to the final commit
/// of the outermost transaction so that simulation leaves no trace.
pub trait Storage {
    /// Inserts up to `max_amount`, returning the amount accepted.
    ///
    /// Inserting zero, or inserting into a storage that does not support
    /// insertion, accepts nothing and touches nothing.
    fn insert(&self, max_amount: u64, transaction: &mut Transaction<'_>) -> u64;

    /// Extracts up to `max_amount`, returning the amount removed.
    fn extract(&self, max_amount: u64, transaction: &mut Transaction<'_>) -> u64;

    /// Currently stored amount.
    fn amount(&self) -> u64;

    /// Maximum amount the storage can hold.
    fn capacity(&self) -> u64;

    /// Reports whether [`Storage::insert`] may ever accept energy.
    fn supports_insertion(&self) -> bool {
        true
    }

    /// Reports whether [`Storage::extract`] may ever yield energy.
    fn supports_extraction(&self) -> bool {
        true
    }
}

/// Constructor arguments rejected before a storage exists.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Capacity must not be negative.
    #[error("storage capacity must be >= 0, got {0}")]
    NegativeCapacity(i64),
    /// Initial amount must not be negative.
    #[error("initial storage amount must be >= 0, got {0}")]
    NegativeAmount(i64),
}

/// Storage parameters as they arrive from external configuration.
///
/// Quantities are signed because the sources they are read from are; they
/// are validated by [`EnergyStorageBuilder::from_settings`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Maximum amount the storage can hold.
    pub capacity: i64,
    /// Amount held before anything is persisted.
    #[serde(default)]
    pub amount: i64,
    /// Whether insertion is permitted.
    #[serde(default = "enabled")]
    pub allow_insertion: bool,
    /// Whether extraction is permitted.
    #[serde(default = "enabled")]
    pub allow_extraction: bool,
}

impl StorageSettings {
    /// Settings for an empty storage that accepts and yields energy.
    #[must_use]
    pub const fn with_capacity(capacity: i64) -> Self {
        Self {
            capacity,
            amount: 0,
            allow_insertion: true,
            allow_extraction: true,
        }
    }
}

const fn enabled() -> bool {
    true
}

/// Named signed integer fields persisted by an external collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyRecord {
    fields: BTreeMap<String, i64>,
}

impl EnergyRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<i64> {
        self.fields.get(key).copied()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn set(&mut self, key: &str, value: i64) {
        let _ = self.fields.insert(key.to_owned(), value);
    }

    /// Reports whether the record holds no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

type CommitHook = Box<dyn Fn(u64)>;

struct StorageCell {
    capacity: u64,
    amount: Cell<u64>,
    allow_insertion: bool,
    allow_extraction: bool,
    on_final_commit: Option<CommitHook>,
}

impl StorageCell {
    fn clamp(&self, amount: u64) -> u64 {
        amount.min(self.capacity)
    }
}

impl SnapshotParticipant for StorageCell {
    type Snapshot = u64;

    fn create_snapshot(&self) -> u64 {
        self.amount.get()
    }

    fn read_snapshot(&self, snapshot: u64) {
        self.amount.set(self.clamp(snapshot));
    }

    fn on_final_commit(&self) {
        if let Some(hook) = &self.on_final_commit {
            hook(self.amount.get());
        }
    }
}

/// Reference [`Storage`] holding its amount in memory.
///
/// Cloning yields another handle onto the same storage.
#[derive(Clone)]
pub struct EnergyStorage {
    cell: Rc<StorageCell>,
}

impl EnergyStorage {
    /// Creates an empty storage that accepts and yields energy.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self::with_amount(capacity, 0)
    }

    /// Creates a storage pre-filled with `amount`, clamped to `capacity`.
    #[must_use]
    pub fn with_amount(capacity: u64, amount: u64) -> Self {
        EnergyStorageBuilder::new(capacity)
            .initial_amount(amount)
            .assemble(amount.min(capacity))
    }

    /// Creates a storage from externally supplied settings.
    pub fn from_settings(settings: &StorageSettings) -> Result<Self, StorageError> {
        Ok(EnergyStorageBuilder::from_settings(settings)?.build())
    }

    /// Creates a storage whose amount lives in `record` under `key`.
    #[must_use]
    pub fn persistent(capacity: u64, record: Rc<RefCell<EnergyRecord>>, key: &str) -> Self {
        EnergyStorageBuilder::new(capacity)
            .persist_to(record, key)
            .build()
    }

    /// Starts a builder for a storage of the provided capacity.
    #[must_use]
    pub fn builder(capacity: u64) -> EnergyStorageBuilder {
        EnergyStorageBuilder::new(capacity)
    }
}

impl Storage for EnergyStorage {
    fn insert(&self, max_amount: u64, transaction: &mut Transaction<'_>) -> u64 {
        let cell = &self.cell;
        if !cell.allow_insertion || max_amount == 0 {
            return 0;
        }
        transaction.register(cell);

        let amount = cell.amount.get();
        let inserted = cell.capacity.saturating_sub(amount).min(max_amount);
        cell.amount.set(amount + inserted);
        inserted
    }

    fn extract(&self, max_amount: u64, transaction: &mut Transaction<'_>) -> u64 {
        let cell = &self.cell;
        if !cell.allow_extraction || max_amount == 0 {
            return 0;
        }
        transaction.register(cell);

        let amount = cell.amount.get();
        let extracted = amount.min(max_amount);
        cell.amount.set(amount - extracted);
        extracted
    }

    fn amount(&self) -> u64 {
        self.cell.amount.get()
    }

    fn capacity(&self) -> u64 {
        self.cell.capacity
    }

    fn supports_insertion(&self) -> bool {
        self.cell.allow_insertion
    }

    fn supports_extraction(&self) -> bool {
        self.cell.allow_extraction
    }
}

impl fmt::Debug for EnergyStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyStorage")
            .field("amount", &self.cell.amount.get())
            .field("capacity", &self.cell.capacity)
            .field("allow_insertion", &self.cell.allow_insertion)
            .field("allow_extraction", &self.cell.allow_extraction)
            .field("persistent", &self.cell.on_final_commit.is_some())
            .finish()
    }
}

/// Configures an [`EnergyStorage`] before it is shared.
pub struct EnergyStorageBuilder {
    capacity: u64,
    initial_amount: u64,
    allow_insertion: bool,
    allow_extraction: bool,
    on_final_commit: Option<CommitHook>,
    persistence: Option<(Rc<RefCell<EnergyRecord>>, String)>,
}

impl EnergyStorageBuilder {
    /// Starts from an empty storage that accepts and yields energy.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            initial_amount: 0,
            allow_insertion: true,
            allow_extraction: true,
            on_final_commit: None,
            persistence: None,
        }
    }

    /// Starts from externally supplied settings, rejecting negative quantities.
    pub fn from_settings(settings: &StorageSettings) -> Result<Self, StorageError> {
        let capacity = u64::try_from(settings.capacity)
            .map_err(|_| StorageError::NegativeCapacity(settings.capacity))?;
        let amount = u64::try_from(settings.amount)
            .map_err(|_| StorageError::NegativeAmount(settings.amount))?;

        Ok(Self::new(capacity)
            .initial_amount(amount)
            .insertion(settings.allow_insertion)
            .extraction(settings.allow_extraction))
    }

    /// Amount held when no persisted value exists; clamped to the capacity.
    #[must_use]
    pub fn initial_amount(mut self, amount: u64) -> Self {
        self.initial_amount = amount;
        self
    }

    /// Enables or disables insertion.
    #[must_use]
    pub fn insertion(mut self, allowed: bool) -> Self {
        self.allow_insertion = allowed;
        self
    }

    /// Enables or disables extraction.
    #[must_use]
    pub fn extraction(mut self, allowed: bool) -> Self {
        self.allow_extraction = allowed;
        self
    }

    /// Runs `hook` with the new amount after every outermost commit that changed it.
    #[must_use]
    pub fn on_final_commit<F>(mut self, hook: F) -> Self
    where
        F: Fn(u64) + 'static,
    {
        self.on_final_commit = Some(Box::new(hook));
        self
    }

    /// Reads the amount from `record` at construction and writes it back on
    /// every outermost commit that changed it.
    ///
    /// A value already present under `key` replaces the initial amount; it
    /// is clamped into `0..=capacity`. A blank key falls back to
    /// [`DEFAULT_RECORD_KEY`].
    #[must_use]
    pub fn persist_to(mut self, record: Rc<RefCell<EnergyRecord>>, key: impl Into<String>) -> Self {
        self.persistence = Some((record, key.into()));
        self
    }

    /// Finalizes the storage.
    #[must_use]
    pub fn build(mut self) -> EnergyStorage {
        let Some((record, key)) = self.persistence.take() else {
            let amount = self.initial_amount.min(self.capacity);
            return self.assemble(amount);
        };

        let key = if key.trim().is_empty() {
            DEFAULT_RECORD_KEY.to_owned()
        } else {
            key
        };

        let persisted = record.borrow().get(&key);
        let amount = match persisted {
            Some(value) => u64::try_from(value).unwrap_or(0).min(self.capacity),
            None => self.initial_amount.min(self.capacity),
        };

        let extra = self.on_final_commit.take();
        let hook = move |amount: u64| {
            record
                .borrow_mut()
                .set(&key, i64::try_from(amount).unwrap_or(i64::MAX));
            if let Some(extra) = &extra {
                extra(amount);
            }
        };

        self.on_final_commit(hook).assemble(amount)
    }

    fn assemble(self, amount: u64) -> EnergyStorage {
        EnergyStorage {
            cell: Rc::new(StorageCell {
                capacity: self.capacity,
                amount: Cell::new(amount),
                allow_insertion: self.allow_insertion,
                allow_extraction: self.allow_extraction,
                on_final_commit: self.on_final_commit,
            }),
        }
    }
}

impl fmt::Debug for EnergyStorageBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyStorageBuilder")
            .field("capacity", &self.capacity)
            .field("initial_amount", &self.initial_amount)
            .field("allow_insertion", &self.allow_insertion)
            .field("allow_extraction", &self.allow_extraction)
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}
