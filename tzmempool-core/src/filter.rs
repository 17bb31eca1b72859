//! Kind and account interest filter.

use std::collections::HashSet;

use crate::operation::{ConfirmedOperation, OperationContent, OperationKind};

/// Which operations a network is configured to track.
///
/// An empty account set means "every account".
#[derive(Debug, Clone, Default)]
pub struct Interest {
    kinds: HashSet<OperationKind>,
    accounts: HashSet<String>,
}

impl Interest {
    /// Create a filter for the given kinds and accounts.
    pub fn new(
        kinds: impl IntoIterator<Item = OperationKind>,
        accounts: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            accounts: accounts.into_iter().collect(),
        }
    }

    /// Whether the kind is tracked at all.
    pub fn tracks(&self, kind: OperationKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Tracked kinds, sorted.
    pub fn kinds(&self) -> Vec<OperationKind> {
        let mut kinds: Vec<_> = self.kinds.iter().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    /// Whether a mempool content should be persisted.
    pub fn accepts_content(&self, content: &OperationContent) -> bool {
        self.tracks(content.kind)
            && (self.accounts.is_empty() || content.accounts().any(|a| self.accounts.contains(a)))
    }

    /// Whether a confirmed operation should be persisted.
    pub fn accepts_confirmed(&self, operation: &ConfirmedOperation) -> bool {
        if !self.tracks(operation.kind) {
            return false;
        }
        if self.accounts.is_empty() {
            return true;
        }
        [&operation.sender, &operation.target]
            .into_iter()
            .flatten()
            .any(|a| self.accounts.contains(a))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn content(kind: OperationKind, source: &str) -> OperationContent {
        let mut fields = Map::new();
        fields.insert("source".into(), Value::from(source));
        OperationContent { kind, fields }
    }

    #[test]
    fn test_kind_filter() {
        let interest = Interest::new([OperationKind::Transaction], Vec::new());
        assert!(interest.accepts_content(&content(OperationKind::Transaction, "tz1a")));
        assert!(!interest.accepts_content(&content(OperationKind::Reveal, "tz1a")));
    }

    #[test]
    fn test_account_filter() {
        let interest = Interest::new([OperationKind::Transaction], vec!["tz1a".to_string()]);
        assert!(interest.accepts_content(&content(OperationKind::Transaction, "tz1a")));
        assert!(!interest.accepts_content(&content(OperationKind::Transaction, "tz1b")));

        let confirmed = ConfirmedOperation {
            id: 1,
            hash: "oo".into(),
            level: 5,
            block: "BL".into(),
            kind: OperationKind::Transaction,
            sender: Some("tz1b".into()),
            target: Some("tz1a".into()),
        };
        assert!(interest.accepts_confirmed(&confirmed));
    }
}
