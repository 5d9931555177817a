//! Module dedicated to the IMAP session.
//!
//! This is the production implementation of the
//! [`MailSession`](crate::session::MailSession) seam: one
//! authenticated connection against one account, opened with
//! [`ImapSession::open`]. Capabilities are detected once at open and
//! the session is released on drop, so that it ends on every exit
//! path.

pub mod config;
pub mod gmail;

use std::{collections::HashMap, net::TcpStream};

use native_tls::{TlsConnector, TlsStream};
use thiserror::Error;
use tracing::{debug, info, trace};
use utf7_imap::{decode_utf7_imap as decode_utf7, encode_utf7_imap as encode_utf7};

use crate::{
    flag::Flags,
    session::{Capabilities, MailSession, MailboxStatus, RemoteMessage, StoreAction},
    sync::plan::UidInterval,
    Result,
};

use self::config::{ImapConfig, ImapEncryptionKind};

/// Errors related to the IMAP session.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot build tls connector")]
    TlsConnectorError(#[source] native_tls::Error),
    #[error("cannot connect to imap server {1}:{2}")]
    ConnectError(#[source] imap::Error, String, u16),
    #[error("cannot login to imap server")]
    LoginError(#[source] imap::Error),
    #[error("cannot get capabilities of imap server")]
    GetCapabilitiesError(#[source] imap::Error),
    #[error("cannot list imap mailboxes")]
    ListMailboxesError(#[source] imap::Error),
    #[error("cannot select imap mailbox {1}")]
    SelectMailboxError(#[source] imap::Error, String),
    #[error("cannot get uid validity of mailbox {0}")]
    GetUidValidityError(String),
    #[error("cannot search messages by {1}")]
    SearchError(#[source] imap::Error, String),
    #[error("cannot fetch messages {1}")]
    FetchError(#[source] imap::Error, String),
    #[error("cannot fetch labels of messages {1}")]
    FetchLabelsError(#[source] imap::Error, String),
    #[error("cannot store flags on message {1}")]
    StoreFlagsError(#[source] imap::Error, u32),
    #[error("cannot store labels on message {1}")]
    StoreLabelsError(#[source] imap::Error, u32),
    #[error("cannot logout from imap server")]
    LogoutError(#[source] imap::Error),
}

/// Wrapper around the two transport-specific session types.
///
/// The underlying session is generic over its stream, so encrypted
/// and cleartext sessions have different types and every operation
/// dispatches once here.
enum Transport {
    Tls(imap::Session<TlsStream<TcpStream>>),
    Tcp(imap::Session<TcpStream>),
}

impl Transport {
    fn examine(&mut self, mailbox: &str) -> imap::Result<imap::types::Mailbox> {
        match self {
            Self::Tls(session) => session.examine(mailbox),
            Self::Tcp(session) => session.examine(mailbox),
        }
    }

    fn select(&mut self, mailbox: &str) -> imap::Result<imap::types::Mailbox> {
        match self {
            Self::Tls(session) => session.select(mailbox),
            Self::Tcp(session) => session.select(mailbox),
        }
    }

    fn capabilities(
        &mut self,
    ) -> imap::Result<imap::types::ZeroCopy<imap::types::Capabilities>> {
        match self {
            Self::Tls(session) => session.capabilities(),
            Self::Tcp(session) => session.capabilities(),
        }
    }

    fn list(&mut self) -> imap::Result<imap::types::ZeroCopy<Vec<imap::types::Name>>> {
        match self {
            Self::Tls(session) => session.list(Some(""), Some("*")),
            Self::Tcp(session) => session.list(Some(""), Some("*")),
        }
    }

    fn uid_search(&mut self, query: &str) -> imap::Result<std::collections::HashSet<u32>> {
        match self {
            Self::Tls(session) => session.uid_search(query),
            Self::Tcp(session) => session.uid_search(query),
        }
    }

    fn uid_fetch(
        &mut self,
        uid_set: &str,
        query: &str,
    ) -> imap::Result<imap::types::ZeroCopy<Vec<imap::types::Fetch>>> {
        match self {
            Self::Tls(session) => session.uid_fetch(uid_set, query),
            Self::Tcp(session) => session.uid_fetch(uid_set, query),
        }
    }

    fn uid_store(
        &mut self,
        uid_set: &str,
        query: &str,
    ) -> imap::Result<imap::types::ZeroCopy<Vec<imap::types::Fetch>>> {
        match self {
            Self::Tls(session) => session.uid_store(uid_set, query),
            Self::Tcp(session) => session.uid_store(uid_set, query),
        }
    }

    fn run_command_and_read_response(&mut self, command: &str) -> imap::Result<Vec<u8>> {
        match self {
            Self::Tls(session) => session.run_command_and_read_response(command),
            Self::Tcp(session) => session.run_command_and_read_response(command),
        }
    }

    fn close(&mut self) -> imap::Result<()> {
        match self {
            Self::Tls(session) => session.close(),
            Self::Tcp(session) => session.close(),
        }
    }

    fn logout(&mut self) -> imap::Result<()> {
        match self {
            Self::Tls(session) => session.logout(),
            Self::Tcp(session) => session.logout(),
        }
    }
}

/// The IMAP session of one synchronization cycle.
pub struct ImapSession {
    /// The session capabilities, detected once at open.
    caps: Capabilities,

    /// The underlying authenticated session.
    transport: Transport,

    /// Whether the session was already closed explicitly, so that
    /// drop does not try again.
    closed: bool,
}

impl ImapSession {
    /// Opens a new authenticated session from the given
    /// configuration.
    pub fn open(config: &ImapConfig) -> Result<Self> {
        info!("opening imap session to {}:{}", config.host, config.port);

        let addr = (config.host.as_str(), config.port);

        let transport = match config.encryption.clone().unwrap_or_default() {
            ImapEncryptionKind::Tls => {
                debug!("connecting using tls");
                let tls = TlsConnector::builder()
                    .build()
                    .map_err(Error::TlsConnectorError)?;
                let client = imap::connect(addr, &config.host, &tls)
                    .map_err(|err| Error::ConnectError(err, config.host.clone(), config.port))?;
                let session = client
                    .login(&config.login, &config.passwd)
                    .map_err(|res| Error::LoginError(res.0))?;
                Transport::Tls(session)
            }
            ImapEncryptionKind::None => {
                debug!("connecting using cleartext tcp");
                let stream = TcpStream::connect(addr).map_err(|err| {
                    Error::ConnectError(imap::Error::Io(err), config.host.clone(), config.port)
                })?;
                let client = imap::Client::new(stream);
                let session = client
                    .login(&config.login, &config.passwd)
                    .map_err(|res| Error::LoginError(res.0))?;
                Transport::Tcp(session)
            }
        };

        let mut session = Self {
            caps: Capabilities::default(),
            transport,
            closed: false,
        };

        let caps = session
            .transport
            .capabilities()
            .map_err(Error::GetCapabilitiesError)?;
        session.caps.label_ext = caps.has_str(gmail::LABEL_EXT_CAPABILITY);
        debug!(label_ext = session.caps.label_ext, "detected capabilities");

        Ok(session)
    }

    /// Fetches the given messages, with or without their content, and
    /// merges in labels when asked to.
    fn fetch(
        &mut self,
        uids: &[u32],
        with_content: bool,
        with_labels: bool,
    ) -> Result<Vec<RemoteMessage>> {
        let set = uid_set(uids);
        let query = if with_content {
            "(UID FLAGS RFC822)"
        } else {
            "(UID FLAGS)"
        };

        trace!("fetching messages {set} with query {query}");
        let fetches = self
            .transport
            .uid_fetch(&set, query)
            .map_err(|err| Error::FetchError(err, set.clone()))?;

        let mut messages = Vec::new();
        for fetch in fetches.iter() {
            let uid = match fetch.uid {
                Some(uid) => uid,
                None => continue,
            };

            messages.push(RemoteMessage {
                uid,
                flags: Flags::from(fetch.flags()),
                labels: Vec::new(),
                raw: match with_content {
                    true => fetch.body().map(<[u8]>::to_vec),
                    false => None,
                },
            });
        }

        if with_labels {
            let command = format!("UID FETCH {set} (UID {})", gmail::LABELS_ATTRIBUTE);
            let response = self
                .transport
                .run_command_and_read_response(&command)
                .map_err(|err| Error::FetchLabelsError(err, set.clone()))?;

            let mut labels: HashMap<u32, Vec<String>> =
                gmail::parse_fetch_labels(&response).into_iter().collect();
            for message in &mut messages {
                if let Some(labels) = labels.remove(&message.uid) {
                    message.labels = labels;
                }
            }
        }

        Ok(messages)
    }
}

impl MailSession for ImapSession {
    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn list_mailbox_names(&mut self) -> Result<Vec<String>> {
        let names = self
            .transport
            .list()
            .map_err(Error::ListMailboxesError)?;

        Ok(names
            .iter()
            .map(|name| decode_utf7(name.name().to_string()))
            .collect())
    }

    fn examine(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        debug!("selecting mailbox {mailbox} read-only");

        let mailbox_encoded = encode_utf7(mailbox.to_string());
        let status = self
            .transport
            .examine(&mailbox_encoded)
            .map_err(|err| Error::SelectMailboxError(err, mailbox.to_string()))?;

        Ok(MailboxStatus {
            uid_validity: status
                .uid_validity
                .ok_or_else(|| Error::GetUidValidityError(mailbox.to_string()))?,
        })
    }

    fn select(&mut self, mailbox: &str) -> Result<MailboxStatus> {
        debug!("selecting mailbox {mailbox} writable");

        let mailbox_encoded = encode_utf7(mailbox.to_string());
        let status = self
            .transport
            .select(&mailbox_encoded)
            .map_err(|err| Error::SelectMailboxError(err, mailbox.to_string()))?;

        Ok(MailboxStatus {
            uid_validity: status
                .uid_validity
                .ok_or_else(|| Error::GetUidValidityError(mailbox.to_string()))?,
        })
    }

    fn uid_search(&mut self, interval: &UidInterval) -> Result<Vec<u32>> {
        let query = format!("UID {interval}");

        let mut uids: Vec<u32> = self
            .transport
            .uid_search(&query)
            .map_err(|err| Error::SearchError(err, query.clone()))?
            .into_iter()
            .collect();
        uids.sort_unstable();

        Ok(uids)
    }

    fn uid_fetch_meta(&mut self, uids: &[u32], with_labels: bool) -> Result<Vec<RemoteMessage>> {
        self.fetch(uids, false, with_labels)
    }

    fn uid_fetch_full(&mut self, uids: &[u32], with_labels: bool) -> Result<Vec<RemoteMessage>> {
        self.fetch(uids, true, with_labels)
    }

    fn uid_store_flags(&mut self, uid: u32, action: StoreAction, flags: &Flags) -> Result<()> {
        let query = format!("{}FLAGS ({})", action.sign(), flags.to_imap_query());

        debug!("storing {query} on message {uid}");
        self.transport
            .uid_store(&uid.to_string(), &query)
            .map_err(|err| Error::StoreFlagsError(err, uid))?;

        Ok(())
    }

    fn uid_store_labels(&mut self, uid: u32, action: StoreAction, labels: &[String]) -> Result<()> {
        let command = format!(
            "UID STORE {uid} {}{} ({})",
            action.sign(),
            gmail::LABELS_ATTRIBUTE,
            gmail::format_label_list(labels),
        );

        debug!("storing labels on message {uid}");
        self.transport
            .run_command_and_read_response(&command)
            .map_err(|err| Error::StoreLabelsError(err, uid))?;

        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        debug!("closing imap session");
        if let Err(err) = self.transport.close() {
            debug!("cannot close imap session: {err}");
        }
        self.transport.logout().map_err(Error::LogoutError)?;

        Ok(())
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        if let Err(err) = self.transport.close() {
            debug!("cannot close imap session: {err}");
        }
        if let Err(err) = self.transport.logout() {
            debug!("cannot logout from imap session: {err}");
        }
    }
}

/// Renders a uid list in the wire set syntax.
fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::uid_set;

    #[test]
    fn uid_set_syntax() {
        assert_eq!(uid_set(&[57]), "57");
        assert_eq!(uid_set(&[1, 2, 30]), "1,2,30");
    }
}
