//! Module dedicated to in-memory synchronization state.
//!
//! These implementations back the store traits with plain maps behind
//! mutexes. They are mostly used by tests, but also fit embedded
//! setups where cursors may be rebuilt from scratch at every start.

use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;

use super::{Error, MailboxStore, MessageKey, MessageRecord, RecordStore};
use crate::mailbox::{Cursor, Mailbox};

/// In-memory mailbox store.
#[derive(Debug, Default)]
pub struct MemoryMailboxStore {
    mailboxes: Mutex<Vec<Mailbox>>,
}

impl MemoryMailboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mailbox for synchronization.
    pub fn add_mailbox(&self, mailbox: Mailbox) {
        self.mailboxes.lock().unwrap().push(mailbox);
    }

    /// Returns the current cursor of the given mailbox, if known.
    pub fn cursor(&self, account_id: &str, mailbox: &str) -> Option<Cursor> {
        self.mailboxes
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.account_id == account_id && m.name == mailbox)
            .map(|m| m.cursor)
    }
}

#[async_trait]
impl MailboxStore for MemoryMailboxStore {
    async fn list_mailboxes(&self, account_id: &str) -> Result<Vec<Mailbox>, Error> {
        let mailboxes = self.mailboxes.lock().unwrap();
        Ok(mailboxes
            .iter()
            .filter(|m| m.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn persist_cursor(
        &self,
        account_id: &str,
        mailbox: &str,
        cursor: Cursor,
    ) -> Result<(), Error> {
        let mut mailboxes = self.mailboxes.lock().unwrap();

        match mailboxes
            .iter_mut()
            .find(|m| m.account_id == account_id && m.name == mailbox)
        {
            Some(m) => m.cursor = cursor,
            None => {
                // First successful session for this mailbox.
                let mut m = Mailbox::new(account_id, mailbox);
                m.cursor = cursor;
                mailboxes.push(m);
            }
        }

        Ok(())
    }
}

/// In-memory message record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<MessageKey, MessageRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a record dirty, as the host application would after a
    /// local tag or archive change.
    pub fn mark_dirty(&self, key: MessageKey) {
        if let Some(record) = self.records.lock().unwrap().get_mut(&key) {
            record.dirty = true;
        }
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find(&self, key: MessageKey) -> Result<Option<MessageRecord>, Error> {
        Ok(self.records.lock().unwrap().get(&key).cloned())
    }

    async fn insert(&self, record: MessageRecord) -> Result<(), Error> {
        self.records
            .lock()
            .unwrap()
            .entry(record.key)
            .or_insert(record);
        Ok(())
    }

    async fn list_dirty(&self, uid_validity: u32) -> Result<Vec<MessageRecord>, Error> {
        let records = self.records.lock().unwrap();
        let mut dirty: Vec<_> = records
            .values()
            .filter(|r| r.dirty && r.key.uid_validity == uid_validity)
            .cloned()
            .collect();
        dirty.sort_by_key(|r| r.key);
        Ok(dirty)
    }

    async fn clear_dirty(&self, key: MessageKey) -> Result<(), Error> {
        if let Some(record) = self.records.lock().unwrap().get_mut(&key) {
            record.dirty = false;
        }
        Ok(())
    }
}
