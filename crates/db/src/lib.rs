//! startblock-db – Store-Abstraktion
//!
//! Die Speicher-Engine selbst ist austauschbar: alles laeuft ueber den
//! `Store`-Trait. Der In-Memory-Zustand des Servers ist waehrend der
//! Prozesslaufzeit massgeblich; Schreibzugriffe gehen best-effort ueber
//! den `StoreSchreiber` (Hintergrund-Task mit Retry und Backoff).
//!
//! ```text
//! RaceEngine / Handler
//!     |  einreihen(SchreibAuftrag)
//!     v
//! StoreSchreiber (mpsc) --> Worker-Task --> dyn Store (MemoryStore, ...)
//!                               |
//!                               +-- Retry mit exponentiellem Backoff
//! ```

pub mod cache;
pub mod error;
pub mod memory;
pub mod models;
pub mod store;
pub mod writer;

pub use cache::BenutzerCache;
pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use models::{BanListe, Benutzer, RennDatensatz, TeilnehmerDatensatz};
pub use store::Store;
pub use writer::{SchreibAuftrag, SchreiberKonfig, StoreSchreiber};
