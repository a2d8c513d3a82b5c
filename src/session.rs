//! Process-wide session registry and the document status state machine.
//!
//! A [`SessionStore`] is constructed once and shared by handle. It maps
//! client-supplied session ids to per-session state behind its own mutex, so
//! operations on different sessions never contend beyond the short map
//! lookup.
//!
//! # Generations
//!
//! Every accepted upload bumps the session's generation and hands the
//! ingestion run an [`UploadTicket`] carrying that generation. Pipeline
//! writes ([`SessionStore::advance`], [`SessionStore::complete`],
//! [`SessionStore::fail`]) apply only if the ticket is still current and
//! the transition is legal; a superseded run's writes are dropped.
//!
//! # Events
//!
//! Each committed transition is published on the session's broadcast
//! channel while the session lock is still held, so subscribers observe
//! transitions in commit order and a status read after a publish never
//! sees an older state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::UnknownSessionPolicy;
use crate::error::{RagError, Result};
use crate::index::VectorIndex;
use crate::models::{Chunk, DocumentStatus, StatusSnapshot};

const EVENT_CAPACITY: usize = 16;

/// A successfully processed document: its chunks and their index.
///
/// Immutable once built; readers share it through an `Arc`.
pub struct IndexedDocument {
    pub filename: String,
    /// Hex SHA-256 of the uploaded bytes.
    pub digest: String,
    pub chunks: Vec<Chunk>,
    pub index: Box<dyn VectorIndex>,
}

impl IndexedDocument {
    pub fn new(
        filename: String,
        digest: String,
        chunks: Vec<Chunk>,
        index: Box<dyn VectorIndex>,
    ) -> Self {
        Self {
            filename,
            digest,
            chunks,
            index,
        }
    }

    pub fn chunk(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }
}

impl std::fmt::Debug for IndexedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedDocument")
            .field("filename", &self.filename)
            .field("digest", &self.digest)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

/// Hex SHA-256 of `bytes`.
pub fn digest_hex(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Authority for one ingestion run's writes.
#[derive(Debug, Clone)]
pub struct UploadTicket {
    pub session_id: String,
    pub filename: String,
    pub generation: u64,
    cancel: CancellationToken,
}

impl UploadTicket {
    /// Fires when a newer upload supersedes this run.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// One session's state. Only reachable through the store's lock.
struct Session {
    id: String,
    generation: u64,
    status: DocumentStatus,
    filename: Option<String>,
    error: Option<String>,
    document: Option<Arc<IndexedDocument>>,
    cancel: Option<CancellationToken>,
    updated_at: DateTime<Utc>,
    events: broadcast::Sender<StatusSnapshot>,
}

impl Session {
    fn new(id: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: id.to_string(),
            generation: 0,
            status: DocumentStatus::NotUploaded,
            filename: None,
            error: None,
            document: None,
            cancel: None,
            updated_at: Utc::now(),
            events,
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            session_id: self.id.clone(),
            status: self.status,
            filename: self.filename.clone(),
            error: self.error.clone(),
            chunk_count: self.document.as_ref().map(|d| d.chunks.len()),
            digest: self.document.as_ref().map(|d| d.digest.clone()),
            updated_at: self.updated_at,
        }
    }

    /// Stamp and broadcast the current state. Call with the lock held.
    fn publish(&mut self) {
        self.updated_at = Utc::now();
        // No subscribers is fine.
        let _ = self.events.send(self.snapshot());
        debug!(
            session_id = %self.id,
            generation = self.generation,
            status = %self.status,
            "session status changed"
        );
    }

    fn accepts(&self, ticket: &UploadTicket, next: DocumentStatus) -> bool {
        ticket.generation == self.generation && self.status.can_advance_to(next)
    }
}

type SessionHandle = Arc<Mutex<Session>>;

fn lock(session: &SessionHandle) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct SessionStore {
    policy: UnknownSessionPolicy,
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new(policy: UnknownSessionPolicy) -> Self {
        Self {
            policy,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn existing(&self, id: &str) -> Option<SessionHandle> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn get_or_create(&self, id: &str) -> SessionHandle {
        if let Some(session) = self.existing(id) {
            return session;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sessions
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Session::new(id)))),
        )
    }

    /// Resolve a session for a read, honouring the unknown-session policy.
    fn resolve(&self, id: &str) -> Result<SessionHandle> {
        match self.policy {
            UnknownSessionPolicy::Create => Ok(self.get_or_create(id)),
            UnknownSessionPolicy::Reject => self
                .existing(id)
                .ok_or_else(|| RagError::SessionNotFound(id.to_string())),
        }
    }

    /// Accept a new upload: supersede any in-flight run, drop the previous
    /// document, and move to `Uploading`. Always creates the session.
    pub fn begin_upload(&self, id: &str, filename: &str) -> UploadTicket {
        let handle = self.get_or_create(id);
        let mut session = lock(&handle);

        if let Some(previous) = session.cancel.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        session.generation += 1;
        session.cancel = Some(cancel.clone());
        session.status = DocumentStatus::Uploading;
        session.filename = Some(filename.to_string());
        session.error = None;
        session.document = None;
        session.publish();

        UploadTicket {
            session_id: id.to_string(),
            filename: filename.to_string(),
            generation: session.generation,
            cancel,
        }
    }

    /// Apply a non-terminal pipeline transition. Returns whether it applied.
    pub fn advance(&self, ticket: &UploadTicket, next: DocumentStatus) -> bool {
        if next.is_terminal() {
            return false;
        }
        self.write(ticket, next, |_| {})
    }

    /// Publish the processed document. Returns whether it applied.
    pub fn complete(&self, ticket: &UploadTicket, document: IndexedDocument) -> bool {
        self.write(ticket, DocumentStatus::Processed, |session| {
            session.document = Some(Arc::new(document));
            session.error = None;
        })
    }

    /// Record a failure message. Returns whether it applied.
    pub fn fail(&self, ticket: &UploadTicket, message: &str) -> bool {
        self.write(ticket, DocumentStatus::Error, |session| {
            session.document = None;
            session.error = Some(message.to_string());
        })
    }

    fn write(
        &self,
        ticket: &UploadTicket,
        next: DocumentStatus,
        apply: impl FnOnce(&mut Session),
    ) -> bool {
        let Some(handle) = self.existing(&ticket.session_id) else {
            return false;
        };
        let mut session = lock(&handle);
        if !session.accepts(ticket, next) {
            debug!(
                session_id = %ticket.session_id,
                ticket_generation = ticket.generation,
                current_generation = session.generation,
                from = %session.status,
                to = %next,
                "discarding stale or illegal status write"
            );
            return false;
        }
        apply(&mut *session);
        session.status = next;
        if next.is_terminal() {
            session.cancel = None;
        }
        session.publish();
        true
    }

    pub fn snapshot(&self, id: &str) -> Result<StatusSnapshot> {
        let handle = self.resolve(id)?;
        let session = lock(&handle);
        Ok(session.snapshot())
    }

    /// The processed document, or `DocumentNotReady` with the current status.
    pub fn ready_document(&self, id: &str) -> Result<Arc<IndexedDocument>> {
        let handle = self.resolve(id)?;
        let session = lock(&handle);
        match (&session.status, &session.document) {
            (DocumentStatus::Processed, Some(document)) => Ok(Arc::clone(document)),
            (status, _) => Err(RagError::DocumentNotReady {
                status: *status,
                error: session.error.clone(),
            }),
        }
    }

    /// Current snapshot plus a receiver for every later transition.
    ///
    /// Both are taken under the session lock so no transition falls
    /// between them.
    pub fn subscribe(&self, id: &str) -> Result<(StatusSnapshot, broadcast::Receiver<StatusSnapshot>)> {
        let handle = self.resolve(id)?;
        let session = lock(&handle);
        Ok((session.snapshot(), session.events.subscribe()))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(UnknownSessionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Metric;
    use crate::index::build_index;

    fn document(n: usize) -> IndexedDocument {
        let chunks: Vec<Chunk> = (0..n)
            .map(|i| Chunk {
                index: i,
                text: format!("chunk {}", i),
                embedding: Arc::from(vec![i as f32, 1.0]),
            })
            .collect();
        let index = build_index(&chunks, Metric::Cosine).unwrap();
        IndexedDocument::new("doc.txt".to_string(), digest_hex(b"bytes"), chunks, index)
    }

    #[test]
    fn unknown_sessions_are_created_lazily() {
        let store = SessionStore::default();
        let snap = store.snapshot("abc").unwrap();
        assert_eq!(snap.status, DocumentStatus::NotUploaded);
        assert_eq!(snap.filename, None);
    }

    #[test]
    fn reject_policy_reports_missing_session() {
        let store = SessionStore::new(UnknownSessionPolicy::Reject);
        assert!(matches!(
            store.snapshot("nope"),
            Err(RagError::SessionNotFound(_))
        ));
        store.begin_upload("nope", "a.txt");
        assert!(store.snapshot("nope").is_ok());
    }

    #[test]
    fn full_lifecycle() {
        let store = SessionStore::default();
        let ticket = store.begin_upload("s", "doc.txt");
        assert_eq!(store.snapshot("s").unwrap().status, DocumentStatus::Uploading);

        assert!(store.advance(&ticket, DocumentStatus::Processing));
        assert!(matches!(
            store.ready_document("s"),
            Err(RagError::DocumentNotReady {
                status: DocumentStatus::Processing,
                ..
            })
        ));

        assert!(store.complete(&ticket, document(2)));
        let snap = store.snapshot("s").unwrap();
        assert_eq!(snap.status, DocumentStatus::Processed);
        assert_eq!(snap.chunk_count, Some(2));
        assert_eq!(store.ready_document("s").unwrap().chunks.len(), 2);
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let store = SessionStore::default();
        let ticket = store.begin_upload("s", "doc.txt");
        // Uploading -> Processed skips Processing.
        assert!(!store.complete(&ticket, document(1)));
        assert!(store.fail(&ticket, "bad"));
        // Error is stable until the next upload.
        assert!(!store.advance(&ticket, DocumentStatus::Processing));
        let snap = store.snapshot("s").unwrap();
        assert_eq!(snap.status, DocumentStatus::Error);
        assert_eq!(snap.error.as_deref(), Some("bad"));
    }

    #[test]
    fn superseded_ticket_cannot_write() {
        let store = SessionStore::default();
        let first = store.begin_upload("s", "a.txt");
        assert!(store.advance(&first, DocumentStatus::Processing));

        let second = store.begin_upload("s", "b.txt");
        assert!(first.cancellation().is_cancelled());
        assert!(!second.cancellation().is_cancelled());
        assert!(second.generation > first.generation);

        assert!(!store.complete(&first, document(1)));
        assert!(!store.fail(&first, "late failure"));
        let snap = store.snapshot("s").unwrap();
        assert_eq!(snap.status, DocumentStatus::Uploading);
        assert_eq!(snap.filename.as_deref(), Some("b.txt"));
        assert_eq!(snap.error, None);
    }

    #[test]
    fn reupload_discards_previous_document() {
        let store = SessionStore::default();
        let ticket = store.begin_upload("s", "a.txt");
        store.advance(&ticket, DocumentStatus::Processing);
        store.complete(&ticket, document(3));
        assert!(store.ready_document("s").is_ok());

        store.begin_upload("s", "b.txt");
        assert!(matches!(
            store.ready_document("s"),
            Err(RagError::DocumentNotReady {
                status: DocumentStatus::Uploading,
                ..
            })
        ));
        assert_eq!(store.snapshot("s").unwrap().chunk_count, None);
    }

    #[tokio::test]
    async fn subscribers_see_transitions_in_order() {
        let store = SessionStore::default();
        let (initial, mut rx) = store.subscribe("s").unwrap();
        assert_eq!(initial.status, DocumentStatus::NotUploaded);

        let ticket = store.begin_upload("s", "doc.txt");
        store.advance(&ticket, DocumentStatus::Processing);
        store.complete(&ticket, document(1));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv().await.unwrap().status);
        }
        assert_eq!(
            seen,
            vec![
                DocumentStatus::Uploading,
                DocumentStatus::Processing,
                DocumentStatus::Processed
            ]
        );
    }

    #[test]
    fn sessions_are_independent() {
        let store = SessionStore::default();
        let a = store.begin_upload("a", "a.txt");
        store.begin_upload("b", "b.txt");
        assert!(store.advance(&a, DocumentStatus::Processing));
        assert_eq!(store.snapshot("b").unwrap().status, DocumentStatus::Uploading);
    }

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            digest_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
