//! Subscription index entries and external occurrences
//!
//! - [`SubscriptionEntry`] one live "token waits for occurrence" record
//! - [`OccurrenceKind`] closed set of occurrence kinds
//! - [`Occurrence`] an arriving message or signal

mod entry;
mod occurrence;

pub use entry::{OccurrenceKind, SubscriptionEntry, SubscriptionKey, UnsupportedOccurrenceKind};
pub use occurrence::Occurrence;
