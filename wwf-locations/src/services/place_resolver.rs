//! Place Resolver
//!
//! Normalizes a user-facing movie identifier into the canonical title id
//! (`tt` + digits) the locations fetcher needs.
//!
//! Resolution order:
//! 1. URL-encoded movie ids are decoded first; a decoded value is only used
//!    when it has a title-id, knowledge-base-id or token shape.
//! 2. Knowledge-base ids (`Q…`) are looked up and the linked title id is read
//!    from the entity claims.
//! 3. Token-shaped values are verified; a failed verification falls back to
//!    treating the raw value as a literal title id.
//! 4. Anything else is a literal title id.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::services::movie_id::decode_movie_id;
use crate::services::title_token::TokenSigner;
use crate::services::wikidata_client::{KnowledgeBase, TitleMeta};
use crate::types::{is_knowledge_base_id, is_title_id, is_token_shape, TitleId, TitleReference};

/// Resolution failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Invalid title id: {0}")]
    InvalidId(String),

    #[error("No title linked to {0}")]
    NotFound(String),

    #[error("Knowledge base unavailable: {0}")]
    Upstream(String),
}

/// Outcome of a successful resolution
#[derive(Debug, Clone)]
pub struct ResolvedTitle {
    pub title_id: TitleId,
    pub reference: TitleReference,
    /// Title label when the knowledge base supplied one
    pub title: Option<String>,
    pub meta: Option<TitleMeta>,
}

pub struct PlaceResolver {
    knowledge_base: Arc<dyn KnowledgeBase>,
    signer: TokenSigner,
}

impl PlaceResolver {
    pub fn new(knowledge_base: Arc<dyn KnowledgeBase>, signer: TokenSigner) -> Self {
        Self {
            knowledge_base,
            signer,
        }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// Resolve a user-facing id to the canonical title id
    pub async fn resolve(&self, user_id: &str) -> Result<ResolvedTitle, ResolutionError> {
        let raw = user_id.trim();
        if raw.is_empty() {
            return Err(ResolutionError::InvalidId(String::new()));
        }

        let candidate = match decode_movie_id(raw) {
            Some(decoded)
                if is_title_id(&decoded)
                    || is_knowledge_base_id(&decoded)
                    || is_token_shape(&decoded) =>
            {
                debug!(encoded = %raw, decoded = %decoded, "Decoded movie id");
                decoded
            }
            _ => raw.to_string(),
        };

        let reference = TitleReference::classify(&candidate);
        match &reference {
            TitleReference::KnowledgeBase(entity_id) => {
                let entity = self
                    .knowledge_base
                    .entity(entity_id)
                    .await
                    .map_err(|e| ResolutionError::Upstream(e.to_string()))?
                    .ok_or_else(|| ResolutionError::NotFound(entity_id.clone()))?;

                let title_id = entity
                    .linked_title_id()
                    .ok_or_else(|| ResolutionError::NotFound(entity_id.clone()))?;

                info!(entity_id = %entity_id, title_id = %title_id, "Resolved knowledge-base id");
                Ok(ResolvedTitle {
                    title_id,
                    title: entity.english_label(),
                    meta: entity.meta(),
                    reference,
                })
            }
            TitleReference::Token(token) => {
                let title_id = match self.signer.verify(token) {
                    Ok(verified) => verified.title_id,
                    Err(e) => {
                        warn!("Token verification failed ({}); treating value as literal id", e);
                        TitleId::parse(token)
                            .ok_or_else(|| ResolutionError::InvalidId(token.clone()))?
                    }
                };
                Ok(ResolvedTitle {
                    title_id,
                    reference,
                    title: None,
                    meta: None,
                })
            }
            TitleReference::Direct(literal) => {
                let title_id = TitleId::parse(literal)
                    .ok_or_else(|| ResolutionError::InvalidId(literal.clone()))?;
                Ok(ResolvedTitle {
                    title_id,
                    reference,
                    title: None,
                    meta: None,
                })
            }
        }
    }

    /// Title label lookup for titles that arrived without one
    pub async fn title_label(&self, title_id: &TitleId) -> Option<String> {
        self.knowledge_base.title_label(title_id).await
    }
}
