//! Session snapshots: what consumers of a live session observe.

use lifeline_backend::Token;

use crate::AuthenticatedClient;

/// One observable state of a session.
///
/// A new snapshot is published whenever the token changes. `generation`
/// counts how many times the scheduled refresh has rebuilt the session
/// (the first build is generation 0); `version` is the token's version
/// inside that generation. Together they order every snapshot a session
/// ever publishes.
pub struct SessionSnapshot<B> {
    pub token: Token,
    pub version: u64,
    pub generation: u64,
    pub client: AuthenticatedClient<B>,
}

impl<B> Clone for SessionSnapshot<B> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            version: self.version,
            generation: self.generation,
            client: self.client.clone(),
        }
    }
}

impl<B> std::fmt::Debug for SessionSnapshot<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSnapshot")
            .field("token", &self.token)
            .field("version", &self.version)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl<B> SessionSnapshot<B> {
    /// `(generation, version)`, which increases with every publish.
    pub fn position(&self) -> (u64, u64) {
        (self.generation, self.version)
    }
}
