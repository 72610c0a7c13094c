use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sessions are only unique per endpoint, so anything aggregating across
/// endpoints keys by this pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub endpoint_id: String,
    pub session_id: String,
}

impl SessionKey {
    pub fn new(endpoint_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.endpoint_id, self.session_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub endpoint_id: String,
    pub endpoint_name: String,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(&self.endpoint_id, &self.id)
    }

    /// Short label for pickers: the title, or the id tail when untitled.
    pub fn label(&self, max_chars: usize) -> String {
        let title = self.title.trim();
        if title.is_empty() {
            let tail: String = self
                .id
                .chars()
                .rev()
                .take(8)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return format!("Session …{tail}");
        }
        if title.chars().count() <= max_chars {
            return title.to_string();
        }
        let cut: String = title.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

/// Parent/child view over a flat session list.
///
/// Indices refer to the slice the forest was built from. A session whose
/// parent is not in the list is treated as a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionForest {
    roots: Vec<usize>,
    children: HashMap<usize, Vec<usize>>,
}

impl SessionForest {
    pub fn build(sessions: &[Session]) -> Self {
        let index: HashMap<SessionKey, usize> = sessions
            .iter()
            .enumerate()
            .map(|(i, s)| (s.key(), i))
            .collect();

        let mut forest = Self::default();
        for (i, session) in sessions.iter().enumerate() {
            let parent = session
                .parent_id
                .as_ref()
                .and_then(|pid| index.get(&SessionKey::new(&session.endpoint_id, pid)))
                .copied()
                .filter(|&p| p != i);
            match parent {
                Some(p) => forest.children.entry(p).or_default().push(i),
                None => forest.roots.push(i),
            }
        }
        forest
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn children(&self, index: usize) -> &[usize] {
        self.children.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Depth-first pre-order walk as `(index, depth)`.
    ///
    /// Sessions caught in a parent cycle never reach a root; they are
    /// appended at depth 0 so nothing disappears from the listing.
    pub fn walk(&self, len: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::with_capacity(len);
        let mut seen = HashSet::with_capacity(len);
        for &root in &self.roots {
            self.walk_from(root, 0, &mut seen, &mut out);
        }
        for i in 0..len {
            if !seen.contains(&i) {
                self.walk_from(i, 0, &mut seen, &mut out);
            }
        }
        out
    }

    fn walk_from(
        &self,
        start: usize,
        depth: usize,
        seen: &mut HashSet<usize>,
        out: &mut Vec<(usize, usize)>,
    ) {
        let mut stack = vec![(start, depth)];
        while let Some((index, depth)) = stack.pop() {
            if !seen.insert(index) {
                continue;
            }
            out.push((index, depth));
            for &child in self.children(index).iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, parent: Option<&str>) -> Session {
        let now = Utc::now();
        Session {
            id: id.to_string(),
            title: format!("title {id}"),
            created_at: now,
            updated_at: now,
            parent_id: parent.map(str::to_string),
            endpoint_id: "default".to_string(),
            endpoint_name: "Local Server".to_string(),
        }
    }

    #[test]
    fn builds_forest_from_flat_list() {
        let sessions = vec![
            session("a", None),
            session("b", Some("a")),
            session("c", Some("b")),
            session("d", None),
            session("e", Some("missing")),
        ];
        let forest = SessionForest::build(&sessions);
        assert_eq!(forest.roots(), &[0, 3, 4]);
        assert_eq!(forest.children(0), &[1]);
        assert_eq!(
            forest.walk(sessions.len()),
            vec![(0, 0), (1, 1), (2, 2), (3, 0), (4, 0)]
        );
    }

    #[test]
    fn parent_cycles_are_still_listed() {
        let sessions = vec![session("a", Some("b")), session("b", Some("a"))];
        let forest = SessionForest::build(&sessions);
        assert!(forest.roots().is_empty());
        assert_eq!(forest.walk(sessions.len()).len(), 2);
    }

    #[test]
    fn parents_do_not_cross_endpoints() {
        let mut child = session("b", Some("a"));
        child.endpoint_id = "other".to_string();
        let sessions = vec![session("a", None), child];
        let forest = SessionForest::build(&sessions);
        assert_eq!(forest.roots(), &[0, 1]);
    }

    #[test]
    fn label_truncates_and_falls_back_to_id() {
        let mut s = session("ses_0123456789abcdef", None);
        s.title = "A very long session title".to_string();
        assert_eq!(s.label(10), "A very lo…");
        s.title = "  ".to_string();
        assert_eq!(s.label(10), "Session …89abcdef");
    }
}
