//! Bidirectional resource subscription index
//!
//! Both maps are always updated together: a uri lists a session exactly when that session
//! lists the uri. Empty sets are removed as soon as they drain.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_uri: HashMap<String, BTreeSet<String>>,
    by_session: HashMap<String, BTreeSet<String>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records interest in `uri`. Subscribing twice is not an error. Returns false only for an
    /// empty uri or session id.
    pub fn subscribe(&mut self, uri: &str, session_id: &str) -> bool {
        if uri.is_empty() || session_id.is_empty() {
            return false;
        }

        self.by_uri
            .entry(uri.to_string())
            .or_default()
            .insert(session_id.to_string());
        self.by_session
            .entry(session_id.to_string())
            .or_default()
            .insert(uri.to_string());

        debug!(target: "mcp::resource", uri = %uri, session_id = %session_id, "subscribed");
        true
    }

    /// Returns false when the session was not subscribed to `uri`.
    pub fn unsubscribe(&mut self, uri: &str, session_id: &str) -> bool {
        let removed = remove_pair(&mut self.by_uri, uri, session_id);
        if removed {
            remove_pair(&mut self.by_session, session_id, uri);
            debug!(target: "mcp::resource", uri = %uri, session_id = %session_id, "unsubscribed");
        }
        removed
    }

    /// Drops every subscription held by a session. Returns the uris it was subscribed to.
    pub fn unsubscribe_all(&mut self, session_id: &str) -> Vec<String> {
        let Some(uris) = self.by_session.remove(session_id) else {
            return Vec::new();
        };

        for uri in &uris {
            remove_pair(&mut self.by_uri, uri, session_id);
        }
        uris.into_iter().collect()
    }

    /// Forgets every subscriber of `uri`. Returns the sessions that were subscribed.
    pub fn clear_uri(&mut self, uri: &str) -> Vec<String> {
        let Some(sessions) = self.by_uri.remove(uri) else {
            return Vec::new();
        };

        for session_id in &sessions {
            remove_pair(&mut self.by_session, session_id, uri);
        }
        sessions.into_iter().collect()
    }

    pub fn subscribers(&self, uri: &str) -> Vec<String> {
        self.by_uri
            .get(uri)
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriptions(&self, session_id: &str) -> Vec<String> {
        self.by_session
            .get(session_id)
            .map(|uris| uris.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, uri: &str, session_id: &str) -> bool {
        self.by_uri
            .get(uri)
            .is_some_and(|sessions| sessions.contains(session_id))
    }

    pub fn is_empty(&self) -> bool {
        self.by_uri.is_empty() && self.by_session.is_empty()
    }
}

fn remove_pair(map: &mut HashMap<String, BTreeSet<String>>, key: &str, member: &str) -> bool {
    let Some(members) = map.get_mut(key) else {
        return false;
    };
    let removed = members.remove(member);
    if members.is_empty() {
        map.remove(key);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_consistent(index: &SubscriptionIndex) {
        for (uri, sessions) in &index.by_uri {
            assert!(!sessions.is_empty());
            for session_id in sessions {
                assert!(index.by_session[session_id].contains(uri));
            }
        }
        for (session_id, uris) in &index.by_session {
            assert!(!uris.is_empty());
            for uri in uris {
                assert!(index.by_uri[uri].contains(session_id));
            }
        }
    }

    #[test]
    fn unsubscribe_twice_fails_the_second_time() {
        let mut index = SubscriptionIndex::new();
        assert!(index.subscribe("file:///a.txt", "s1"));

        assert!(index.unsubscribe("file:///a.txt", "s1"));
        assert!(!index.unsubscribe("file:///a.txt", "s1"));
        assert!(index.is_empty());
    }

    #[test]
    fn repeated_subscribe_is_idempotent() {
        let mut index = SubscriptionIndex::new();
        assert!(index.subscribe("file:///a.txt", "s1"));
        assert!(index.subscribe("file:///a.txt", "s1"));

        assert_eq!(index.subscribers("file:///a.txt"), vec!["s1".to_string()]);
        assert_consistent(&index);
    }

    #[test]
    fn empty_arguments_are_rejected() {
        let mut index = SubscriptionIndex::new();
        assert!(!index.subscribe("", "s1"));
        assert!(!index.subscribe("file:///a.txt", ""));
        assert!(index.is_empty());
    }

    #[test]
    fn unsubscribe_all_cleans_both_sides() {
        let mut index = SubscriptionIndex::new();
        index.subscribe("file:///a.txt", "s1");
        index.subscribe("file:///b.txt", "s1");
        index.subscribe("file:///a.txt", "s2");

        let mut dropped = index.unsubscribe_all("s1");
        dropped.sort();
        assert_eq!(dropped, vec!["file:///a.txt", "file:///b.txt"]);
        assert_eq!(index.subscribers("file:///a.txt"), vec!["s2".to_string()]);
        assert!(index.subscribers("file:///b.txt").is_empty());
        assert!(index.subscriptions("s1").is_empty());
        assert_consistent(&index);
    }

    #[test]
    fn clear_uri_removes_every_subscriber() {
        let mut index = SubscriptionIndex::new();
        index.subscribe("file:///a.txt", "s1");
        index.subscribe("file:///a.txt", "s2");
        index.subscribe("file:///b.txt", "s2");

        let cleared = index.clear_uri("file:///a.txt");
        assert_eq!(cleared.len(), 2);
        assert!(!index.is_subscribed("file:///a.txt", "s2"));
        assert_eq!(index.subscriptions("s2"), vec!["file:///b.txt".to_string()]);
        assert!(index.subscriptions("s1").is_empty());
        assert_consistent(&index);
    }
}
