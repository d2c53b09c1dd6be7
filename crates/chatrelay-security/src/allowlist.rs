use std::collections::HashSet;

use tracing::debug;

/// Set of platform user ids permitted to talk to the bot.
///
/// Registration is only offered to listed ids; an empty list admits nobody.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    ids: HashSet<i64>,
}

impl Allowlist {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn is_allowed(&self, user_id: i64) -> bool {
        let allowed = self.ids.contains(&user_id);
        if !allowed {
            debug!(user_id, "sender not in allowlist");
        }
        allowed
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listed_ids_are_allowed() {
        let list = Allowlist::new([10, 20]);
        assert!(list.is_allowed(10));
        assert!(list.is_allowed(20));
        assert!(!list.is_allowed(30));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn empty_list_denies_everyone() {
        let list = Allowlist::default();
        assert!(list.is_empty());
        assert!(!list.is_allowed(1));
    }
}
