//! # Collaborator Interfaces
//!
//! Seams to the systems this core depends on but does not own: the
//! persistent document store and the notification dispatcher. Both are
//! injected at construction; the core never reaches for a global.

pub mod notification;
pub mod persistence;

pub use notification::{LogNotifier, Notifier};
pub use persistence::{InMemoryPersistence, PersistenceStore};
