//! # Synchronization
//!
//! Module dedicated to the synchronization cycle. The main structure
//! of this module is [`SyncBuilder`], which drives one full cycle for
//! one account: session open, per-mailbox downlink reconciliation,
//! cursor persistence, then the uplink pass over locally changed
//! records.

pub mod plan;
pub mod report;

use std::{
    collections::{hash_map::DefaultHasher, BTreeSet},
    env,
    fs::OpenOptions,
    hash::{Hash, Hasher},
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use advisory_lock::{AdvisoryFileLock, FileLockError, FileLockMode};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    account::AccountConfig,
    conversation::{ActorRef, ArchiveStore, ConversationRef, IngestionPipeline, TagStore},
    flag::Flags,
    imap::ImapSession,
    mailbox::{Cursor, Mailbox},
    session::{Capabilities, MailSession, RemoteMessage, StoreAction},
    store::{MailboxStore, MessageKey, MessageRecord, RecordStore},
    tag::{TagMapper, INBOX_LABEL},
    Result,
};

use self::plan::FetchPlan;
#[doc(inline)]
pub use self::report::{MailboxSyncReport, MessageSyncOutcome, PushOutcome, SyncReport};

/// Errors related to synchronization.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open sync lock file")]
    OpenLockFileError(#[source] io::Error, PathBuf),
    #[error("cannot lock sync file")]
    LockFileError(#[source] FileLockError, PathBuf),
    #[error("cannot unlock sync file")]
    UnlockFileError(#[source] FileLockError, PathBuf),

    #[error("cannot persist cursor of mailbox {1}")]
    PersistCursorError(#[source] crate::store::Error, String),
}

/// The synchronization builder.
///
/// Holds the account configuration and the collaborator interfaces,
/// and runs one cycle at a time. One cycle owns one exclusive session
/// and processes mailboxes strictly sequentially; concurrency across
/// accounts is the caller's business.
#[derive(Clone)]
pub struct SyncBuilder {
    account: AccountConfig,
    actor: ActorRef,
    mailboxes: Arc<dyn MailboxStore>,
    records: Arc<dyn RecordStore>,
    pipeline: Arc<dyn IngestionPipeline>,
    tags: Arc<dyn TagStore>,
    archive: Arc<dyn ArchiveStore>,
    abort: Option<Arc<AtomicBool>>,
}

impl SyncBuilder {
    /// Creates a new synchronization builder for the given account
    /// and collaborators. Mutations on the conversation side are
    /// attributed to `actor`.
    pub fn new(
        account: AccountConfig,
        actor: ActorRef,
        mailboxes: Arc<dyn MailboxStore>,
        records: Arc<dyn RecordStore>,
        pipeline: Arc<dyn IngestionPipeline>,
        tags: Arc<dyn TagStore>,
        archive: Arc<dyn ArchiveStore>,
    ) -> Self {
        Self {
            account,
            actor,
            mailboxes,
            records,
            pipeline,
            tags,
            archive,
            abort: None,
        }
    }

    pub fn set_some_abort_flag(&mut self, abort: Option<Arc<AtomicBool>>) {
        self.abort = abort;
    }

    pub fn set_abort_flag(&mut self, abort: Arc<AtomicBool>) {
        self.set_some_abort_flag(Some(abort));
    }

    pub fn with_some_abort_flag(mut self, abort: Option<Arc<AtomicBool>>) -> Self {
        self.set_some_abort_flag(abort);
        self
    }

    /// Registers a flag polled between mailboxes and before the
    /// uplink pass. There is no cancellation mid-mailbox.
    pub fn with_abort_flag(mut self, abort: Arc<AtomicBool>) -> Self {
        self.set_abort_flag(abort);
        self
    }

    fn interrupted(&self) -> bool {
        self.abort
            .as_ref()
            .map_or(false, |abort| abort.load(Ordering::SeqCst))
    }

    /// Runs one synchronization cycle against a fresh IMAP session.
    ///
    /// The cycle is guarded by an advisory lock file so that two
    /// processes never synchronize the same account concurrently. The
    /// session is released on every exit path, including failures.
    pub async fn sync(self) -> Result<SyncReport> {
        let mut hasher = DefaultHasher::new();
        self.account.id.hash(&mut hasher);

        let lock_file_name = format!("mailbox-sync.{:x}.lock", hasher.finish());
        let lock_file_path = env::temp_dir().join(lock_file_name);

        debug!("locking sync file {lock_file_path:?}");
        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&lock_file_path)
            .map_err(|err| Error::OpenLockFileError(err, lock_file_path.clone()))?;
        AdvisoryFileLock::try_lock(&lock_file, FileLockMode::Exclusive)
            .map_err(|err| Error::LockFileError(err, lock_file_path.clone()))?;

        let mut session = ImapSession::open(&self.account.imap)?;
        let report = self.sync_with_session(&mut session).await;

        // Logout and connection release happen on drop.
        drop(session);

        debug!("unlocking sync file");
        AdvisoryFileLock::unlock(&lock_file)
            .map_err(|err| Error::UnlockFileError(err, lock_file_path))?;

        report
    }

    /// Runs one synchronization cycle against an already opened
    /// session. Useful when the caller manages the connection itself,
    /// and for driving the engine with mock sessions in tests.
    pub async fn sync_with_session<S: MailSession>(&self, session: &mut S) -> Result<SyncReport> {
        let account = &self.account.id;
        info!("synchronizing account {account}");

        let caps = session.capabilities();
        let mapper = TagMapper::new(session.list_mailbox_names()?);

        let mut report = SyncReport::default();

        let mailboxes = self.mailboxes.list_mailboxes(account).await?;
        for mailbox in mailboxes.iter().filter(|m| m.sync_enabled) {
            if self.interrupted() {
                info!("synchronization aborted before mailbox {}", mailbox.name);
                report.aborted = true;
                break;
            }

            let mut mailbox_report = MailboxSyncReport::new(&mailbox.name);
            if let Err(err) = self
                .sync_mailbox(session, caps, &mapper, mailbox, &mut mailbox_report)
                .await
            {
                let fatal = err
                    .downcast_ref::<Error>()
                    .map_or(false, |err| matches!(err, Error::PersistCursorError(..)));
                if fatal {
                    return Err(err);
                }

                warn!("cannot synchronize mailbox {}: {err}", mailbox.name);
                mailbox_report.error = Some(err);
            }
            report.mailboxes.push(mailbox_report);
        }

        info!(
            ingested = report.ingested_count(),
            skipped = report.skipped_count(),
            "synchronized account {account}",
        );

        Ok(report)
    }

    /// Processes one mailbox: downlink old and new ranges, cursor
    /// persistence, then the uplink pass.
    async fn sync_mailbox<S: MailSession>(
        &self,
        session: &mut S,
        caps: Capabilities,
        mapper: &TagMapper,
        mailbox: &Mailbox,
        report: &mut MailboxSyncReport,
    ) -> Result<()> {
        info!("synchronizing mailbox {}", mailbox.name);

        let status = session.examine(&mailbox.name)?;
        let cursor = mailbox.cursor.validate(status.uid_validity);
        report.invalidated = mailbox.cursor.uid_validity != 0 && cursor != mailbox.cursor;

        let plan = FetchPlan::new(cursor.last_seen_uid);

        // Old range: refresh flags and labels of already known
        // messages, without content.
        if let Some(old) = plan.old {
            let uids = session.uid_search(&old)?;
            debug!("found {} message(s) in old range {old}", uids.len());

            if !uids.is_empty() {
                for message in session.uid_fetch_meta(&uids, caps.label_ext)? {
                    let key = MessageKey::new(cursor.uid_validity, message.uid);
                    let outcome = self
                        .reconcile_known(caps, mapper, mailbox, key, &message)
                        .await?;
                    report.messages.push((message.uid, outcome));
                }
            }
        }

        // New range: ingest and reconcile. A `n:*` search always
        // matches the highest-numbered message, so ids at or below
        // the watermark are filtered out.
        let mut last_seen = cursor.last_seen_uid;
        let uids: Vec<u32> = session
            .uid_search(&plan.new)?
            .into_iter()
            .filter(|&uid| uid > cursor.last_seen_uid)
            .collect();
        debug!("found {} message(s) in new range {}", uids.len(), plan.new);

        if !uids.is_empty() {
            for message in session.uid_fetch_full(&uids, caps.label_ext)? {
                let key = MessageKey::new(cursor.uid_validity, message.uid);
                let outcome = self.ingest(caps, mapper, mailbox, key, &message).await?;
                report.messages.push((message.uid, outcome));

                // The watermark advances past every observed message,
                // whatever its outcome: one stuck message must not
                // block the mailbox forever.
                last_seen = last_seen.max(message.uid);
            }
        }

        let cursor = Cursor::new(cursor.uid_validity, last_seen);
        self.mailboxes
            .persist_cursor(&self.account.id, &mailbox.name, cursor)
            .await
            .map_err(|err| Error::PersistCursorError(err, mailbox.name.clone()))?;
        report.cursor = Some(cursor);
        debug!("persisted cursor {cursor} of mailbox {}", mailbox.name);

        if self.interrupted() {
            info!("synchronization aborted before pushing local changes");
            return Ok(());
        }

        self.push_dirty(session, caps, mapper, mailbox, cursor.uid_validity, report)
            .await
    }

    /// Reconciles a message from the old range with its conversation.
    async fn reconcile_known(
        &self,
        caps: Capabilities,
        mapper: &TagMapper,
        mailbox: &Mailbox,
        key: MessageKey,
        message: &RemoteMessage,
    ) -> Result<MessageSyncOutcome> {
        let record = match self.records.find(key).await? {
            Some(record) => record,
            None => {
                // Fetched but never ingested: a benign gap.
                debug!("no record matches message {key}, skipping");
                return Ok(MessageSyncOutcome::SkippedMissingRecord);
            }
        };

        if record.dirty {
            debug!("record {key} has local changes pending, skipping");
            return Ok(MessageSyncOutcome::SkippedDirty);
        }

        self.reconcile_conversation(caps, mapper, mailbox, message, &record.conversation)
            .await?;

        Ok(MessageSyncOutcome::Reconciled(record.conversation))
    }

    /// Ingests a message from the new range, then reconciles it.
    ///
    /// Messages whose correlation key is already recorded (crash
    /// replay, sequence id reuse after invalidation) are reconciled
    /// like old-range matches instead of being re-ingested.
    async fn ingest(
        &self,
        caps: Capabilities,
        mapper: &TagMapper,
        mailbox: &Mailbox,
        key: MessageKey,
        message: &RemoteMessage,
    ) -> Result<MessageSyncOutcome> {
        if let Some(record) = self.records.find(key).await? {
            debug!("message {key} already ingested, reconciling only");

            if record.dirty {
                return Ok(MessageSyncOutcome::SkippedDirty);
            }

            self.reconcile_conversation(caps, mapper, mailbox, message, &record.conversation)
                .await?;

            return Ok(MessageSyncOutcome::Reconciled(record.conversation));
        }

        let raw = match message.raw.as_deref() {
            Some(raw) => raw,
            None => {
                warn!("message {key} came without content, skipping");
                return Ok(MessageSyncOutcome::SkippedMissingContent);
            }
        };

        match self.pipeline.process(raw, &self.account.id, key).await {
            Ok(conversation) => {
                self.records
                    .insert(MessageRecord::new(key, conversation.clone()))
                    .await?;

                self.reconcile_conversation(caps, mapper, mailbox, message, &conversation)
                    .await?;

                info!("ingested message {key} into conversation {conversation}");
                Ok(MessageSyncOutcome::Ingested(conversation))
            }
            Err(err) => {
                warn!("cannot ingest message {key}: {err}");
                Ok(MessageSyncOutcome::SkippedIngestion(err.to_string()))
            }
        }
    }

    /// Applies remote message state to the conversation: archive
    /// state first, then the whole tag set.
    async fn reconcile_conversation(
        &self,
        caps: Capabilities,
        mapper: &TagMapper,
        mailbox: &Mailbox,
        message: &RemoteMessage,
        conversation: &ConversationRef,
    ) -> Result<()> {
        // Label-derived archive state is only meaningful when the
        // session has the label extension.
        if caps.label_ext {
            let archived = self
                .account
                .archive_rule
                .archived(message.has_label(INBOX_LABEL), message.seen());
            let currently = self
                .archive
                .is_archived(&self.account.id, conversation)
                .await?;

            if currently != archived {
                debug!("moving conversation {conversation} {}", match archived {
                    true => "to archive",
                    false => "back to inbox",
                });
                self.archive
                    .set_archived(&self.actor, &self.account.id, conversation, archived)
                    .await?;
            }
        }

        let mut tags = BTreeSet::new();
        if let Some(tag) = mapper.to_tag(&mailbox.name) {
            tags.insert(tag);
        }
        for flag in message.flags.iter() {
            if let Some(tag) = mapper.flag_to_tag(flag) {
                tags.insert(tag);
            }
        }
        if caps.label_ext {
            for label in &message.labels {
                if let Some(tag) = mapper.to_tag(label) {
                    tags.insert(tag);
                }
            }
        }

        self.tags
            .apply_tags(&self.actor, conversation, tags)
            .await?;

        Ok(())
    }

    /// Pushes locally changed records of the current validity epoch
    /// back to the server.
    async fn push_dirty<S: MailSession>(
        &self,
        session: &mut S,
        caps: Capabilities,
        mapper: &TagMapper,
        mailbox: &Mailbox,
        uid_validity: u32,
        report: &mut MailboxSyncReport,
    ) -> Result<()> {
        let dirty = self.records.list_dirty(uid_validity).await?;
        if dirty.is_empty() {
            return Ok(());
        }

        info!(
            "pushing {} locally changed message(s) to mailbox {}",
            dirty.len(),
            mailbox.name,
        );

        // Downlink ran against a read-only selection; mutations need
        // a writable one.
        session.select(&mailbox.name)?;

        for record in dirty {
            let outcome = match self.push_record(session, caps, mapper, &record).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Dirty mark kept, the record is retried next
                    // cycle.
                    warn!("cannot push record {}: {err}", record.key);
                    PushOutcome::Failed(err.to_string())
                }
            };
            report.pushed.push((record.key, outcome));
        }

        Ok(())
    }

    /// Pushes one record: computes the desired flag and label sets
    /// from the conversation, and issues the minimal mutations.
    async fn push_record<S: MailSession>(
        &self,
        session: &mut S,
        caps: Capabilities,
        mapper: &TagMapper,
        record: &MessageRecord,
    ) -> Result<PushOutcome> {
        let uid = record.key.uid;

        let current = session.uid_fetch_meta(&[uid], caps.label_ext)?;
        let current = match current.into_iter().next() {
            Some(message) => message,
            None => {
                debug!("message {} vanished from mailbox, skipping", record.key);
                return Ok(PushOutcome::SkippedVanished);
            }
        };

        let tags = self.tags.tags(&record.conversation).await?;

        let desired_flags: Flags = tags.iter().filter_map(|tag| mapper.to_flag(tag)).collect();
        let added = desired_flags.difference(&current.flags);
        let removed = current.flags.difference(&desired_flags);
        if !added.is_empty() {
            session.uid_store_flags(uid, StoreAction::Add, &added)?;
        }
        if !removed.is_empty() {
            session.uid_store_flags(uid, StoreAction::Remove, &removed)?;
        }

        if caps.label_ext {
            let mut desired_labels: BTreeSet<String> = tags
                .iter()
                .filter_map(|tag| mapper.to_label(tag).map(String::from))
                .collect();

            if !self
                .archive
                .is_archived(&self.account.id, &record.conversation)
                .await?
            {
                desired_labels.insert(INBOX_LABEL.to_string());
            }

            let current_labels: BTreeSet<String> = current.labels.iter().cloned().collect();
            let added: Vec<String> = desired_labels.difference(&current_labels).cloned().collect();
            let removed: Vec<String> = current_labels.difference(&desired_labels).cloned().collect();
            if !added.is_empty() {
                session.uid_store_labels(uid, StoreAction::Add, &added)?;
            }
            if !removed.is_empty() {
                session.uid_store_labels(uid, StoreAction::Remove, &removed)?;
            }
        }

        self.records.clear_dirty(record.key).await?;

        Ok(PushOutcome::Pushed)
    }
}
