//! VersoDB core: an embedded MVCC record store.
//!
//! VersoDB persists fixed-layout records into memory-mapped 64 KiB
//! sections and decides, for any observer transaction, which version of a
//! record is visible - using a durable transaction ledger of commit
//! outcomes instead of row-level locks.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                     Store                       │
//! │  (directory lock, wiring, begin/finish, cache)  │
//! └──────┬──────────────┬──────────────┬────────────┘
//!        │              │              │
//! ┌──────▼─────┐ ┌──────▼──────┐ ┌─────▼──────┐
//! │ Transaction│ │   Section   │ │   Chase    │
//! │   Ledger   │ │  Allocator  │ │  Registry  │
//! │ ledger.vdb │ │ records.vdb │ │ (in memory)│
//! └────────────┘ └─────────────┘ └────────────┘
//! ```
//!
//! The [`TransactionLedger`] records one durable commit bit per
//! transaction id across four recycling id ranges. A [`TransactionView`]
//! owns one id plus a fixed snapshot of the ids running at registration,
//! and turns raw ledger status into observer-relative visibility. The
//! [`SectionAllocator`] places records into sections under the striped
//! table locks, and the [`ChaseRegistry`] links superseded record versions
//! to their successors. The [`Janitor`] reclaims permanently-invisible
//! records and recycles exhausted id ranges.
//!
//! # Example
//!
//! ```no_run
//! use versodb_core::{Config, Store, TableId, TxKind};
//!
//! # fn main() -> versodb_core::CoreResult<()> {
//! let store = Store::open(std::path::Path::new("my-store"), &Config::new())?;
//!
//! let mut txn = store.begin(TxKind::Client)?;
//! let id = store.write_record(&mut txn, TableId::new(1), b"hello")?;
//! store.finish(&mut txn, true)?;
//!
//! assert_eq!(store.read_record(id)?, b"hello");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
pub mod chase;
pub mod config;
mod dir;
pub mod error;
pub mod janitor;
pub mod ledger;
pub mod section;
pub mod store;
pub mod types;
pub mod view;

pub use blob::{BlobId, BlobService};
pub use chase::ChaseRegistry;
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use janitor::Janitor;
pub use ledger::TransactionLedger;
pub use section::{ExpireOutcome, FreeRun, SectionAllocator};
pub use store::{CleanHint, Store};
pub use types::{RecordId, SectionId, TableId, TxId, TxStatus, MAX_RECORD_SIZE};
pub use view::{ShowMode, TransactionView, TxKind, ViewState, Visibility};
