//! Rust library to synchronize IMAP mailboxes with a conversation
//! store.
//!
//! The main purpose of this library is to keep an email-based
//! communication channel consistent with a forum-style discussion
//! system: it connects to an IMAP server, detects new and
//! previously-seen messages per mailbox, and reconciles message state
//! (read/unread flags, labels, archive location) in both directions.
//!
//! The entry point is the [`SyncBuilder`](crate::sync::SyncBuilder),
//! which drives one full synchronization cycle for one account and
//! returns a [`SyncReport`](crate::sync::SyncReport).
//!
//! External systems are consumed through seams:
//!
//! - [`MailSession`](crate::session::MailSession): the protocol
//!   operations, implemented for real servers by
//!   [`ImapSession`](crate::imap::ImapSession);
//! - [`MailboxStore`](crate::store::MailboxStore) and
//!   [`RecordStore`](crate::store::RecordStore): persisted cursors and
//!   message correlation records;
//! - [`IngestionPipeline`](crate::conversation::IngestionPipeline),
//!   [`TagStore`](crate::conversation::TagStore) and
//!   [`ArchiveStore`](crate::conversation::ArchiveStore): the
//!   conversation side.

pub mod account;
pub mod conversation;
pub mod flag;
pub mod imap;
pub mod mailbox;
pub mod session;
pub mod store;
pub mod sync;
pub mod tag;

#[doc(inline)]
pub use self::{
    flag::{Flag, Flags},
    sync::{SyncBuilder, SyncReport},
};

/// The global `Error` alias of the library.
pub type Error = anyhow::Error;

/// The global `Result` alias of the library.
pub type Result<T> = anyhow::Result<T>;
