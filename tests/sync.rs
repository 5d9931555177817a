//! End-to-end synchronization cycles driven through a scripted mock
//! session and the in-memory stores.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;

use mailbox_sync::{
    account::{AccountConfig, ArchiveRule},
    conversation::{
        ActorRef, ArchiveStore, ConversationRef, IngestionError, IngestionPipeline, TagStore,
    },
    flag::{Flag, Flags},
    imap::config::ImapConfig,
    mailbox::{Cursor, Mailbox},
    session::{Capabilities, MailSession, MailboxStatus, RemoteMessage, StoreAction},
    store::{
        memory::{MemoryMailboxStore, MemoryRecordStore},
        MailboxStore, MessageKey, RecordStore,
    },
    sync::{plan::UidInterval, report::MessageSyncOutcome, SyncBuilder},
    Result,
};

const ACCOUNT: &str = "acc-1";

/// A scripted in-memory mail session.
#[derive(Default)]
struct MockSession {
    caps: Capabilities,
    uid_validity: u32,
    inventory: Vec<String>,
    messages: BTreeMap<u32, RemoteMessage>,
    fail_examine: HashSet<String>,
    examined: Vec<String>,
    selected: Vec<String>,
    store_log: Vec<String>,
}

impl MockSession {
    fn new(uid_validity: u32) -> Self {
        Self {
            caps: Capabilities { label_ext: true },
            uid_validity,
            inventory: vec![
                "INBOX".into(),
                "Support".into(),
                "Work".into(),
                "[Gmail]/All Mail".into(),
                "[Gmail]/Sent".into(),
            ],
            ..Default::default()
        }
    }

    fn without_label_ext(mut self) -> Self {
        self.caps.label_ext = false;
        self
    }

    fn failing_examine(mut self, mailbox: &str) -> Self {
        self.fail_examine.insert(mailbox.to_string());
        self
    }

    fn message(mut self, uid: u32, flags: &[Flag], labels: &[&str], raw: Option<&str>) -> Self {
        self.messages.insert(
            uid,
            RemoteMessage {
                uid,
                flags: Flags::from_iter(flags.iter().cloned()),
                labels: labels.iter().map(|l| l.to_string()).collect(),
                raw: raw.map(|r| r.as_bytes().to_vec()),
            },
        );
        self
    }
}

impl MailSession for MockSession {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn list_mailbox_names(&mut self) -> Result<Vec<String>> {
        Ok(self.inventory.clone())
    }

    fn examine(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        if self.fail_examine.contains(mailbox) {
            anyhow::bail!("EXAMINE refused for {mailbox}");
        }
        self.examined.push(mailbox.to_string());
        Ok(MailboxStatus {
            uid_validity: self.uid_validity,
        })
    }

    fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        self.selected.push(mailbox.to_string());
        Ok(MailboxStatus {
            uid_validity: self.uid_validity,
        })
    }

    fn uid_search(&mut self, interval: &UidInterval) -> Result<Vec<u32>> {
        let mut uids: Vec<u32> = self
            .messages
            .keys()
            .copied()
            .filter(|&uid| interval.contains(uid))
            .collect();

        // A `n:*` search always matches the highest-numbered message,
        // even when its uid is below `n`.
        if interval.last.is_none() {
            if let Some(&max) = self.messages.keys().next_back() {
                if !uids.contains(&max) {
                    uids.push(max);
                }
            }
        }

        uids.sort_unstable();
        Ok(uids)
    }

    fn uid_fetch_meta(&mut self, uids: &[u32], with_labels: bool) -> Result<Vec<RemoteMessage>> {
        Ok(uids
            .iter()
            .filter_map(|uid| self.messages.get(uid))
            .map(|message| RemoteMessage {
                raw: None,
                labels: if with_labels {
                    message.labels.clone()
                } else {
                    Vec::new()
                },
                ..message.clone()
            })
            .collect())
    }

    fn uid_fetch_full(&mut self, uids: &[u32], with_labels: bool) -> Result<Vec<RemoteMessage>> {
        Ok(uids
            .iter()
            .filter_map(|uid| self.messages.get(uid))
            .map(|message| RemoteMessage {
                labels: if with_labels {
                    message.labels.clone()
                } else {
                    Vec::new()
                },
                ..message.clone()
            })
            .collect())
    }

    fn uid_store_flags(&mut self, uid: u32, action: StoreAction, flags: &Flags) -> Result<()> {
        self.store_log.push(format!(
            "{}FLAGS {uid} ({})",
            action.sign(),
            flags.to_imap_query(),
        ));

        if let Some(message) = self.messages.get_mut(&uid) {
            for flag in flags.iter() {
                match action {
                    StoreAction::Add => {
                        message.flags.insert(flag.clone());
                    }
                    StoreAction::Remove => {
                        message.flags.remove(flag);
                    }
                }
            }
        }

        Ok(())
    }

    fn uid_store_labels(&mut self, uid: u32, action: StoreAction, labels: &[String]) -> Result<()> {
        self.store_log.push(format!(
            "{}X-GM-LABELS {uid} ({})",
            action.sign(),
            labels.join(" "),
        ));

        if let Some(message) = self.messages.get_mut(&uid) {
            for label in labels {
                match action {
                    StoreAction::Add => {
                        if !message.labels.contains(label) {
                            message.labels.push(label.clone());
                        }
                    }
                    StoreAction::Remove => message.labels.retain(|l| l != label),
                }
            }
        }

        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Ingestion pipeline creating one conversation per uid, with a
/// configurable set of rejected uids.
#[derive(Default)]
struct MockPipeline {
    fail: HashSet<u32>,
    processed: Mutex<Vec<u32>>,
}

impl MockPipeline {
    fn failing_on(uids: &[u32]) -> Self {
        Self {
            fail: uids.iter().copied().collect(),
            processed: Mutex::default(),
        }
    }

    fn processed(&self) -> Vec<u32> {
        self.processed.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestionPipeline for MockPipeline {
    async fn process(
        &self,
        _raw: &[u8],
        _account_id: &str,
        key: MessageKey,
    ) -> std::result::Result<ConversationRef, IngestionError> {
        if self.fail.contains(&key.uid) {
            return Err(IngestionError::Rejected("scripted failure".into()));
        }

        self.processed.lock().unwrap().push(key.uid);
        Ok(ConversationRef::new(format!("c{}", key.uid)))
    }
}

#[derive(Default)]
struct MockTagStore {
    tags: Mutex<HashMap<ConversationRef, BTreeSet<String>>>,
}

impl MockTagStore {
    fn preset(&self, conversation: &str, tags: &[&str]) {
        self.tags.lock().unwrap().insert(
            ConversationRef::new(conversation),
            tags.iter().map(|t| t.to_string()).collect(),
        );
    }

    fn get(&self, conversation: &str) -> BTreeSet<String> {
        self.tags
            .lock()
            .unwrap()
            .get(&ConversationRef::new(conversation))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl TagStore for MockTagStore {
    async fn tags(&self, conversation: &ConversationRef) -> Result<BTreeSet<String>> {
        Ok(self
            .tags
            .lock()
            .unwrap()
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn apply_tags(
        &self,
        _actor: &ActorRef,
        conversation: &ConversationRef,
        tags: BTreeSet<String>,
    ) -> Result<()> {
        self.tags.lock().unwrap().insert(conversation.clone(), tags);
        Ok(())
    }
}

#[derive(Default)]
struct MockArchiveStore {
    archived: Mutex<HashMap<ConversationRef, bool>>,
    changes: Mutex<Vec<(ConversationRef, bool)>>,
}

impl MockArchiveStore {
    fn preset(&self, conversation: &str, archived: bool) {
        self.archived
            .lock()
            .unwrap()
            .insert(ConversationRef::new(conversation), archived);
    }

    fn get(&self, conversation: &str) -> bool {
        self.archived
            .lock()
            .unwrap()
            .get(&ConversationRef::new(conversation))
            .copied()
            .unwrap_or(false)
    }

    fn changes(&self) -> Vec<(ConversationRef, bool)> {
        self.changes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveStore for MockArchiveStore {
    async fn is_archived(
        &self,
        _account_id: &str,
        conversation: &ConversationRef,
    ) -> Result<bool> {
        Ok(self
            .archived
            .lock()
            .unwrap()
            .get(conversation)
            .copied()
            .unwrap_or(false))
    }

    async fn set_archived(
        &self,
        _actor: &ActorRef,
        _account_id: &str,
        conversation: &ConversationRef,
        archived: bool,
    ) -> Result<()> {
        self.archived
            .lock()
            .unwrap()
            .insert(conversation.clone(), archived);
        self.changes
            .lock()
            .unwrap()
            .push((conversation.clone(), archived));
        Ok(())
    }
}

struct Fixture {
    builder: SyncBuilder,
    mailboxes: Arc<MemoryMailboxStore>,
    records: Arc<MemoryRecordStore>,
    pipeline: Arc<MockPipeline>,
    tags: Arc<MockTagStore>,
    archive: Arc<MockArchiveStore>,
}

fn fixture(rule: ArchiveRule, pipeline: MockPipeline) -> Fixture {
    let account =
        AccountConfig::new(ACCOUNT, "support", ImapConfig::default()).with_archive_rule(rule);

    let mailboxes = Arc::new(MemoryMailboxStore::new());
    let records = Arc::new(MemoryRecordStore::new());
    let pipeline = Arc::new(pipeline);
    let tags = Arc::new(MockTagStore::default());
    let archive = Arc::new(MockArchiveStore::default());

    let builder = SyncBuilder::new(
        account,
        ActorRef::new("system"),
        mailboxes.clone(),
        records.clone(),
        pipeline.clone(),
        tags.clone(),
        archive.clone(),
    );

    Fixture {
        builder,
        mailboxes,
        records,
        pipeline,
        tags,
        archive,
    }
}

fn support_mailbox(cursor: Cursor) -> Mailbox {
    let mut mailbox = Mailbox::new(ACCOUNT, "Support");
    mailbox.cursor = cursor;
    mailbox
}

#[test_log::test(tokio::test)]
async fn full_cycle_reconciles_old_and_ingests_new() {
    // Cursor (555, 100): uid 57 was seen before, uid 101 is new.
    let mut session = MockSession::new(555)
        .message(57, &[], &["\\Inbox"], None)
        .message(101, &[], &["\\Inbox"], Some("From: a@b\r\n\r\nhello"));

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::default());
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 100)));
    f.records
        .insert(mailbox_sync::store::MessageRecord::new(
            MessageKey::new(555, 57),
            ConversationRef::new("c57"),
        ))
        .await
        .unwrap();

    let report = f.builder.sync_with_session(&mut session).await.unwrap();

    // Old range: archived stays false, tags become the mailbox tag.
    assert!(!f.archive.get("c57"));
    assert!(f.archive.changes().is_empty());
    assert_eq!(f.tags.get("c57"), BTreeSet::from(["support".into()]));

    // New range: ingested, record created, cursor advanced.
    assert_eq!(f.pipeline.processed(), vec![101]);
    let record = f
        .records
        .find(MessageKey::new(555, 101))
        .await
        .unwrap()
        .expect("record for (555, 101)");
    assert_eq!(record.conversation, ConversationRef::new("c101"));
    assert_eq!(
        f.mailboxes.cursor(ACCOUNT, "Support"),
        Some(Cursor::new(555, 101)),
    );

    assert_eq!(report.mailboxes.len(), 1);
    assert!(!report.mailboxes[0].invalidated);
    assert_eq!(report.ingested_count(), 1);
    assert_eq!(report.skipped_count(), 0);
}

#[test_log::test(tokio::test)]
async fn invalidation_treats_every_id_as_new() {
    let mut session = MockSession::new(666)
        .message(5, &[], &["\\Inbox"], Some("m5"))
        .message(6, &[], &["\\Inbox"], Some("m6"));

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::default());
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 100)));

    let report = f.builder.sync_with_session(&mut session).await.unwrap();

    assert!(report.mailboxes[0].invalidated);
    assert_eq!(f.pipeline.processed(), vec![5, 6]);
    assert_eq!(
        f.mailboxes.cursor(ACCOUNT, "Support"),
        Some(Cursor::new(666, 6)),
    );
}

#[test_log::test(tokio::test)]
async fn watermark_advances_past_failed_ingestion() {
    let mut session = MockSession::new(555)
        .message(1, &[], &["\\Inbox"], Some("m1"))
        .message(2, &[], &["\\Inbox"], Some("m2"))
        .message(3, &[], &["\\Inbox"], Some("m3"));

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::failing_on(&[2]));
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 0)));

    let report = f.builder.sync_with_session(&mut session).await.unwrap();

    assert_eq!(f.pipeline.processed(), vec![1, 3]);
    assert!(f.records.find(MessageKey::new(555, 2)).await.unwrap().is_none());

    // The skipped message does not hold the watermark back.
    assert_eq!(
        f.mailboxes.cursor(ACCOUNT, "Support"),
        Some(Cursor::new(555, 3)),
    );

    let outcomes = &report.mailboxes[0].messages;
    assert!(matches!(
        outcomes[1],
        (2, MessageSyncOutcome::SkippedIngestion(_)),
    ));
}

#[test_log::test(tokio::test)]
async fn replayed_interval_is_idempotent() {
    let mut session = MockSession::new(555)
        .message(1, &[], &["\\Inbox"], Some("m1"))
        .message(2, &[], &["\\Inbox"], Some("m2"));

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::default());
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 0)));

    f.builder.sync_with_session(&mut session).await.unwrap();
    assert_eq!(f.records.len(), 2);

    // Simulate a crash before cursor persistence: rewind the cursor
    // and replay the same interval.
    f.mailboxes
        .persist_cursor(ACCOUNT, "Support", Cursor::new(555, 0))
        .await
        .unwrap();

    let report = f.builder.sync_with_session(&mut session).await.unwrap();

    // Nothing is re-ingested and no second record shows up.
    assert_eq!(f.pipeline.processed(), vec![1, 2]);
    assert_eq!(f.records.len(), 2);
    assert_eq!(report.ingested_count(), 0);
    assert_eq!(f.mailboxes.cursor(ACCOUNT, "Support"), Some(Cursor::new(555, 2)));
}

#[test_log::test(tokio::test)]
async fn unknown_old_messages_are_a_benign_gap() {
    let mut session = MockSession::new(555).message(57, &[], &["\\Inbox"], None);

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::default());
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 100)));

    let report = f.builder.sync_with_session(&mut session).await.unwrap();

    assert!(report.mailboxes[0].error.is_none());
    assert!(matches!(
        report.mailboxes[0].messages[0],
        (57, MessageSyncOutcome::SkippedMissingRecord),
    ));
}

#[test_log::test(tokio::test)]
async fn group_mailbox_rule_archives_unread_messages() {
    // Seen message in the inbox stays put; unseen message in the
    // inbox is archived under the group mailbox rule.
    let mut session = MockSession::new(555)
        .message(1, &[Flag::Seen], &["\\Inbox"], None)
        .message(2, &[], &["\\Inbox"], None);

    let f = fixture(
        ArchiveRule::OutsideInboxOrUnseen,
        MockPipeline::default(),
    );
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 10)));
    for uid in [1, 2] {
        f.records
            .insert(mailbox_sync::store::MessageRecord::new(
                MessageKey::new(555, uid),
                ConversationRef::new(format!("c{uid}")),
            ))
            .await
            .unwrap();
    }

    f.builder.sync_with_session(&mut session).await.unwrap();

    assert!(!f.archive.get("c1"));
    assert!(f.archive.get("c2"));
    assert_eq!(
        f.tags.get("c1"),
        BTreeSet::from(["support".into(), "seen".into()]),
    );
}

#[test_log::test(tokio::test)]
async fn uplink_issues_minimal_mutations() {
    let mut session = MockSession::new(555).message(
        57,
        &[Flag::Seen],
        &["\\Inbox", "Work"],
        None,
    );

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::default());
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 100)));
    f.records
        .insert(mailbox_sync::store::MessageRecord::new(
            MessageKey::new(555, 57),
            ConversationRef::new("c57"),
        ))
        .await
        .unwrap();
    f.records.mark_dirty(MessageKey::new(555, 57));

    // Local state already matches remote state: seen + work + not
    // archived. No mutation may be issued.
    f.tags.preset("c57", &["seen", "work"]);
    f.archive.preset("c57", false);

    f.builder.sync_with_session(&mut session).await.unwrap();

    assert!(session.store_log.is_empty(), "got {:?}", session.store_log);
    assert!(!f
        .records
        .find(MessageKey::new(555, 57))
        .await
        .unwrap()
        .unwrap()
        .dirty);

    // The downlink re-selected the mailbox writable before pushing.
    assert_eq!(session.selected, vec!["Support"]);
}

#[test_log::test(tokio::test)]
async fn uplink_pushes_local_changes() {
    let mut session = MockSession::new(555).message(
        57,
        &[Flag::Seen],
        &["\\Inbox", "Work"],
        None,
    );

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::default());
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 100)));
    f.records
        .insert(mailbox_sync::store::MessageRecord::new(
            MessageKey::new(555, 57),
            ConversationRef::new("c57"),
        ))
        .await
        .unwrap();
    f.records.mark_dirty(MessageKey::new(555, 57));

    // Locally the conversation was untagged, marked unread and
    // archived.
    f.tags.preset("c57", &[]);
    f.archive.preset("c57", true);

    f.builder.sync_with_session(&mut session).await.unwrap();

    assert_eq!(
        session.store_log,
        vec![
            String::from("-FLAGS 57 (\\Seen)"),
            // BTreeSet order: `W` sorts before `\`.
            String::from("-X-GM-LABELS 57 (Work \\Inbox)"),
        ],
    );

    let message = &session.messages[&57];
    assert!(message.flags.is_empty());
    assert!(message.labels.is_empty());
}

#[test_log::test(tokio::test)]
async fn without_label_ext_the_label_channel_is_skipped() {
    let mut session = MockSession::new(555)
        .message(57, &[Flag::Seen], &["\\Inbox"], None)
        .without_label_ext();

    let f = fixture(
        ArchiveRule::OutsideInboxOrUnseen,
        MockPipeline::default(),
    );
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 100)));
    f.records
        .insert(mailbox_sync::store::MessageRecord::new(
            MessageKey::new(555, 57),
            ConversationRef::new("c57"),
        ))
        .await
        .unwrap();

    f.builder.sync_with_session(&mut session).await.unwrap();

    // No label-derived archive state, flag tags still apply.
    assert!(f.archive.changes().is_empty());
    assert_eq!(
        f.tags.get("c57"),
        BTreeSet::from(["support".into(), "seen".into()]),
    );

    // Uplink never touches the label channel either.
    f.records.mark_dirty(MessageKey::new(555, 57));
    f.tags.preset("c57", &[]);
    f.builder.sync_with_session(&mut session).await.unwrap();

    assert!(session
        .store_log
        .iter()
        .all(|command| !command.contains("X-GM-LABELS")));
}

#[test_log::test(tokio::test)]
async fn abort_flag_is_honored_between_mailboxes() {
    let mut session = MockSession::new(555).message(1, &[], &["\\Inbox"], Some("m1"));

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::default());
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 0)));

    let abort = Arc::new(AtomicBool::new(true));
    abort.store(true, Ordering::SeqCst);

    let report = f
        .builder
        .clone()
        .with_abort_flag(abort)
        .sync_with_session(&mut session)
        .await
        .unwrap();

    assert!(report.aborted);
    assert!(report.mailboxes.is_empty());
    assert!(session.examined.is_empty());
    assert!(f.pipeline.processed().is_empty());
}

#[test_log::test(tokio::test)]
async fn examine_failure_does_not_abort_sibling_mailboxes() {
    let mut session = MockSession::new(555)
        .message(1, &[], &["\\Inbox"], Some("m1"))
        .failing_examine("Broken");

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::default());
    f.mailboxes.add_mailbox({
        let mut mailbox = Mailbox::new(ACCOUNT, "Broken");
        mailbox.cursor = Cursor::new(555, 0);
        mailbox
    });
    f.mailboxes.add_mailbox(support_mailbox(Cursor::new(555, 0)));

    let report = f.builder.sync_with_session(&mut session).await.unwrap();

    assert_eq!(report.mailboxes.len(), 2);
    assert!(report.mailboxes[0].error.is_some());
    assert!(report.mailboxes[1].error.is_none());
    assert_eq!(f.pipeline.processed(), vec![1]);
}

#[test_log::test(tokio::test)]
async fn disabled_mailboxes_are_not_processed() {
    let mut session = MockSession::new(555).message(1, &[], &["\\Inbox"], Some("m1"));

    let f = fixture(ArchiveRule::OutsideInbox, MockPipeline::default());
    f.mailboxes.add_mailbox({
        let mut mailbox = support_mailbox(Cursor::new(555, 0));
        mailbox.sync_enabled = false;
        mailbox
    });

    let report = f.builder.sync_with_session(&mut session).await.unwrap();

    assert!(report.mailboxes.is_empty());
    assert!(session.examined.is_empty());
}

/// A mailbox store whose cursor persistence always fails.
struct BrokenCursorStore(MemoryMailboxStore);

#[async_trait]
impl MailboxStore for BrokenCursorStore {
    async fn list_mailboxes(
        &self,
        account_id: &str,
    ) -> std::result::Result<Vec<Mailbox>, mailbox_sync::store::Error> {
        self.0.list_mailboxes(account_id).await
    }

    async fn persist_cursor(
        &self,
        _account_id: &str,
        mailbox: &str,
        _cursor: Cursor,
    ) -> std::result::Result<(), mailbox_sync::store::Error> {
        Err(mailbox_sync::store::Error::PersistCursorError(
            "disk full".into(),
            mailbox.to_string(),
        ))
    }
}

#[test_log::test(tokio::test)]
async fn cursor_persistence_failure_is_fatal_for_the_account() {
    let mut session = MockSession::new(555).message(1, &[], &["\\Inbox"], Some("m1"));

    let inner = MemoryMailboxStore::new();
    inner.add_mailbox(support_mailbox(Cursor::new(555, 0)));
    inner.add_mailbox({
        let mut mailbox = Mailbox::new(ACCOUNT, "Second");
        mailbox.cursor = Cursor::new(555, 0);
        mailbox
    });

    let account = AccountConfig::new(ACCOUNT, "support", ImapConfig::default());
    let builder = SyncBuilder::new(
        account,
        ActorRef::new("system"),
        Arc::new(BrokenCursorStore(inner)),
        Arc::new(MemoryRecordStore::new()),
        Arc::new(MockPipeline::default()),
        Arc::new(MockTagStore::default()),
        Arc::new(MockArchiveStore::default()),
    );

    let result = builder.sync_with_session(&mut session).await;

    assert!(result.is_err());
    // The first mailbox was examined, the second never was.
    assert_eq!(session.examined, vec!["Support"]);
}
