//! Natural-language intent routing: normalization, pattern matching,
//! contextual re-weighting, entity extraction, and bounded conversation
//! history.

pub mod entities;
pub mod history;
pub mod matcher;
pub mod router;

pub use entities::{EntityKind, ExtractedEntity, extract_entities};
pub use history::{
    ConversationHistory, ConversationStore, ConversationStoreError, ConversationTurn, Speaker,
};
pub use matcher::{CommandCategory, IntentMatch, IntentMatcher, PatternMatcher, default_matchers};
pub use router::{IntentRouter, RoutedIntent, ScoredIntent, normalize};
