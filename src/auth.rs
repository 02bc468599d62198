//! Bearer-token sessions. Tokens are opaque ULIDs handed out at
//! registration (or seeded from config for the admin) and held in memory;
//! a restart invalidates them, which is acceptable for session tokens.

use dashmap::DashMap;
use ulid::Ulid;

use crate::policy::Actor;

#[derive(Default)]
pub struct TokenStore {
    tokens: DashMap<String, Actor>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh token for the actor.
    pub fn issue(&self, actor: Actor) -> String {
        let token = Ulid::new().to_string();
        self.tokens.insert(token.clone(), actor);
        token
    }

    /// Register a caller-chosen token, e.g. the configured admin token.
    pub fn insert(&self, token: String, actor: Actor) {
        self.tokens.insert(token, actor);
    }

    pub fn resolve(&self, token: &str) -> Option<Actor> {
        self.tokens.get(token).map(|e| *e.value())
    }

    pub fn revoke(&self, token: &str) {
        self.tokens.remove(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn issue_and_resolve() {
        let store = TokenStore::new();
        let actor = Actor {
            user_id: Ulid::new(),
            role: Role::User,
        };
        let token = store.issue(actor);
        assert_eq!(store.resolve(&token), Some(actor));
        assert_eq!(store.resolve("nonsense"), None);

        store.revoke(&token);
        assert_eq!(store.resolve(&token), None);
    }
}
