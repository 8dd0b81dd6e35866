//! Client-local outbound content policy.
//!
//! Sends rejected here are surfaced inline to the user and never leave the
//! device. The server treats content as opaque; screening is a courtesy of
//! the client, not an authorization boundary.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("message contains a blocked term: {term}")]
pub struct BlockedTerm {
    pub term: String,
}

/// Case-insensitive list of terms a message may not contain.
#[derive(Debug, Default, Clone)]
pub struct Blocklist {
    terms: Vec<String>,
}

impl Blocklist {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|t| t.into().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Screen an outgoing message. `Err` names the first offending term.
    pub fn screen(&self, text: &str) -> Result<(), BlockedTerm> {
        let lowered = text.to_lowercase();
        for term in &self.terms {
            if lowered.contains(term.as_str()) {
                return Err(BlockedTerm { term: term.clone() });
            }
        }
        Ok(())
    }
}
