use futures::future::join_all;
use tracing::{debug, warn};

use opencode2go_api_types::SessionInfo;
use opencode2go_core::{Endpoint, Session, SessionForest, SessionKey};

use crate::transport::{Transport, TransportResult};

/// Sessions per endpoint, plus the parent/child index over them.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Vec<Session>,
    forest: SessionForest,
}

/// Fetch `endpoint`'s sessions in server order.
pub async fn fetch_sessions(
    transport: &dyn Transport,
    endpoint: &Endpoint,
) -> TransportResult<Vec<Session>> {
    let infos = transport.list_sessions(&endpoint.url()).await?;
    Ok(infos
        .into_iter()
        .map(|info| info.into_session(&endpoint.id, &endpoint.name))
        .collect())
}

pub async fn create_remote(
    transport: &dyn Transport,
    endpoint: &Endpoint,
) -> TransportResult<Session> {
    let info = transport.create_session(&endpoint.url()).await?;
    Ok(info.into_session(&endpoint.id, &endpoint.name))
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored session, grouped by endpoint in load order.
    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn sessions_for<'a>(
        &'a self,
        endpoint_id: &str,
    ) -> impl Iterator<Item = &'a Session> + use<'a> {
        let endpoint_id = endpoint_id.to_string();
        self.sessions
            .iter()
            .filter(move |s| s.endpoint_id == endpoint_id)
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions
            .iter()
            .find(|s| s.endpoint_id == key.endpoint_id && s.id == key.session_id)
    }

    pub fn forest(&self) -> &SessionForest {
        &self.forest
    }

    /// The endpoint's most recently updated session.
    pub fn most_recent(&self, endpoint_id: &str) -> Option<&Session> {
        self.sessions_for(endpoint_id)
            .fold(None, |best: Option<&Session>, s| match best {
                Some(b) if b.updated_at >= s.updated_at => Some(b),
                _ => Some(s),
            })
    }

    /// Fetch and store `endpoint`'s sessions. Failures are logged and yield
    /// an empty list.
    pub async fn load_sessions(
        &mut self,
        transport: &dyn Transport,
        endpoint: &Endpoint,
    ) -> Vec<Session> {
        let sessions = match fetch_sessions(transport, endpoint).await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("failed to load sessions from {}: {e}", endpoint.url());
                Vec::new()
            }
        };
        self.replace_endpoint(&endpoint.id, sessions.clone());
        sessions
    }

    /// Fetch every endpoint concurrently. Unreachable endpoints contribute
    /// nothing. The result is sorted by `updated_at`, newest first.
    pub async fn load_all_sessions(
        &mut self,
        transport: &dyn Transport,
        endpoints: &[Endpoint],
    ) -> Vec<Session> {
        let results = join_all(endpoints.iter().map(|ep| fetch_sessions(transport, ep))).await;
        let mut merged = Vec::new();
        for (endpoint, result) in endpoints.iter().zip(results) {
            match result {
                Ok(sessions) => {
                    self.replace_endpoint(&endpoint.id, sessions.clone());
                    merged.extend(sessions);
                }
                Err(e) => {
                    warn!("skipping sessions of {}: {e}", endpoint.url());
                    self.replace_endpoint(&endpoint.id, Vec::new());
                }
            }
        }
        sort_newest_first(&mut merged);
        merged
    }

    /// Create a session on the server and put it first.
    pub async fn create(&mut self, transport: &dyn Transport, endpoint: &Endpoint) -> Option<Session> {
        match create_remote(transport, endpoint).await {
            Ok(session) => {
                self.insert_front(session.clone());
                Some(session)
            }
            Err(e) => {
                warn!("failed to create session on {}: {e}", endpoint.url());
                None
            }
        }
    }

    /// Delete on the server; the local copy goes only once the server agrees.
    pub async fn delete(
        &mut self,
        transport: &dyn Transport,
        endpoint: &Endpoint,
        session_id: &str,
    ) -> bool {
        match transport.delete_session(&endpoint.url(), session_id).await {
            Ok(()) => {
                self.remove(&SessionKey::new(&endpoint.id, session_id));
                true
            }
            Err(e) => {
                warn!("failed to delete session {session_id}: {e}");
                false
            }
        }
    }

    /// Replace everything stored for `endpoint_id`.
    pub fn replace_endpoint(&mut self, endpoint_id: &str, sessions: Vec<Session>) {
        self.sessions.retain(|s| s.endpoint_id != endpoint_id);
        self.sessions.extend(sessions);
        self.reindex();
    }

    pub fn insert_front(&mut self, session: Session) {
        let key = session.key();
        self.sessions
            .retain(|s| !(s.endpoint_id == key.endpoint_id && s.id == key.session_id));
        self.sessions.insert(0, session);
        self.reindex();
    }

    pub fn remove(&mut self, key: &SessionKey) -> bool {
        let before = self.sessions.len();
        self.sessions
            .retain(|s| !(s.endpoint_id == key.endpoint_id && s.id == key.session_id));
        let removed = self.sessions.len() != before;
        if removed {
            self.reindex();
        }
        removed
    }

    /// Apply a `session.updated` push: title and `updated_at` only.
    /// Unknown sessions are ignored.
    pub fn apply_update_event(&mut self, endpoint_id: &str, info: &SessionInfo) -> bool {
        let Some(session) = self
            .sessions
            .iter_mut()
            .find(|s| s.endpoint_id == endpoint_id && s.id == info.id)
        else {
            debug!("session.updated for untracked session {endpoint_id}/{}", info.id);
            return false;
        };
        session.title = info.title.clone();
        if let Some(updated) = info.time.updated_at() {
            session.updated_at = updated;
        }
        true
    }

    /// Apply a `session.deleted` push.
    pub fn apply_delete_event(&mut self, endpoint_id: &str, session_id: &str) -> bool {
        self.remove(&SessionKey::new(endpoint_id, session_id))
    }

    fn reindex(&mut self) {
        self.forest = SessionForest::build(&self.sessions);
    }
}

pub fn sort_newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use opencode2go_core::testing::{at, endpoint, session};

    #[tokio::test]
    async fn load_sessions_keeps_server_order() {
        let fake = FakeTransport::new();
        let ep = endpoint("e1.local", 4096);
        fake.add_session(&ep, "ses_old", "Old", 10);
        fake.add_session(&ep, "ses_new", "New", 90);

        let mut store = SessionStore::new();
        let loaded = store.load_sessions(&fake, &ep).await;
        let ids: Vec<_> = loaded.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ses_old", "ses_new"]);
        assert_eq!(store.most_recent(&ep.id).map(|s| s.id.as_str()), Some("ses_new"));
        assert_eq!(loaded[0].endpoint_id, ep.id);
    }

    #[tokio::test]
    async fn unreachable_endpoint_yields_empty() {
        let fake = FakeTransport::new();
        let ep = endpoint("down.local", 4096);
        fake.set_reachable(&ep, false);
        let mut store = SessionStore::new();
        assert!(store.load_sessions(&fake, &ep).await.is_empty());
    }

    #[tokio::test]
    async fn load_all_merges_and_tolerates_failures() {
        let fake = FakeTransport::new();
        let a = endpoint("a.local", 4096);
        let b = endpoint("b.local", 4096);
        let down = endpoint("down.local", 4096);
        fake.add_session(&a, "same", "A", 10);
        fake.add_session(&b, "same", "B", 50);
        fake.add_session(&a, "a2", "A2", 30);
        fake.set_reachable(&down, false);

        let mut store = SessionStore::new();
        let all = store
            .load_all_sessions(&fake, &[a.clone(), down.clone(), b.clone()])
            .await;
        let keys: Vec<_> = all.iter().map(|s| (s.endpoint_id.clone(), s.id.clone())).collect();
        assert_eq!(
            keys,
            vec![
                (b.id.clone(), "same".to_string()),
                (a.id.clone(), "a2".to_string()),
                (a.id.clone(), "same".to_string()),
            ]
        );
        assert_eq!(store.sessions().len(), 3);
    }

    #[tokio::test]
    async fn create_and_delete_mirror_the_server() {
        let fake = FakeTransport::new();
        let ep = endpoint("e1.local", 4096);
        fake.add_session(&ep, "ses_1", "One", 10);
        let mut store = SessionStore::new();
        store.load_sessions(&fake, &ep).await;

        let created = store.create(&fake, &ep).await.expect("created");
        assert_eq!(store.sessions()[0].id, created.id);

        assert!(!store.delete(&fake, &ep, "ses_missing").await);
        assert!(store.delete(&fake, &ep, "ses_1").await);
        assert!(store.get(&SessionKey::new(&ep.id, "ses_1")).is_none());

        fake.set_reachable(&ep, false);
        assert!(store.create(&fake, &ep).await.is_none());
    }

    #[test]
    fn update_event_touches_title_and_time_only() {
        let mut store = SessionStore::new();
        let mut child = session("ep", "child", 5);
        child.parent_id = Some("root".to_string());
        store.replace_endpoint("ep", vec![session("ep", "root", 1), child]);

        let info: SessionInfo = serde_json::from_value(serde_json::json!({
            "id": "child",
            "title": "Renamed",
            "parentID": "somewhere-else",
            "time": {"created": 0, "updated": at(99).timestamp()}
        }))
        .expect("info");
        assert!(store.apply_update_event("ep", &info));
        let updated = store.get(&SessionKey::new("ep", "child")).expect("present");
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.updated_at, at(99));
        assert_eq!(updated.parent_id.as_deref(), Some("root"));
        assert_eq!(store.forest().children(0), &[1]);

        let unknown: SessionInfo =
            serde_json::from_value(serde_json::json!({"id": "ghost", "title": "x"})).expect("info");
        assert!(!store.apply_update_event("ep", &unknown));
        assert!(!store.apply_update_event("other-ep", &info));
    }

    #[test]
    fn lookups_do_not_borrow_the_endpoint_id() {
        let mut store = SessionStore::new();
        store.replace_endpoint(
            "ep",
            vec![session("ep", "a", 1), session("ep", "b", 5)],
        );
        store.replace_endpoint("other", vec![session("other", "c", 9)]);
        let latest = store.most_recent(&String::from("ep"));
        let listed: Vec<&Session> = store.sessions_for(&format!("e{}", "p")).collect();
        assert_eq!(latest.map(|s| s.id.as_str()), Some("b"));
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn delete_event_reindexes_forest() {
        let mut store = SessionStore::new();
        let mut child = session("ep", "child", 5);
        child.parent_id = Some("root".to_string());
        store.replace_endpoint("ep", vec![session("ep", "root", 1), child]);
        assert!(store.apply_delete_event("ep", "root"));
        assert_eq!(store.forest().roots(), &[0]);
    }
}
