//! Knowledge-base (Wikidata) client
//!
//! Resolves `Q…` entity ids to the linked external title id (claim `P345`)
//! and extracts presentation metadata from the entity. Also looks up a
//! title's English label by title id through the SPARQL endpoint.
//!
//! # API Reference
//! - Entity data: `https://www.wikidata.org/wiki/Special:EntityData/{id}.json`
//! - SPARQL: `https://query.wikidata.org/sparql`

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::TitleId;

const ENTITY_DATA_BASE_URL: &str = "https://www.wikidata.org/wiki/Special:EntityData";
const SPARQL_URL: &str = "https://query.wikidata.org/sparql";
const COMMONS_FILE_PATH_URL: &str = "https://commons.wikimedia.org/wiki/Special:FilePath/";

const TITLE_ID_PROPERTY: &str = "P345";
const IMAGE_PROPERTY: &str = "P18";
const LOGO_PROPERTY: &str = "P154";
const DURATION_PROPERTY: &str = "P2047";
const PUBLICATION_DATE_PROPERTY: &str = "P577";

/// Wikidata unit entity for seconds; any other unit is read as minutes
const SECOND_UNIT_SUFFIX: &str = "/Q11574";

/// Knowledge-base lookup failures
#[derive(Debug, Error)]
pub enum KnowledgeBaseError {
    #[error("Knowledge base request failed: {0}")]
    Transport(String),

    #[error("Knowledge base returned status {0}")]
    Status(u16),

    #[error("Failed to parse knowledge base response: {0}")]
    Parse(String),
}

/// Knowledge-base seam used by the place resolver
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Fetch an entity by id; `Ok(None)` when the entity does not exist
    async fn entity(&self, entity_id: &str) -> Result<Option<KnowledgeEntity>, KnowledgeBaseError>;

    /// English label for a title id; `None` on any failure
    async fn title_label(&self, title_id: &TitleId) -> Option<String>;
}

/// Presentation metadata extracted from an entity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo_icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

impl TitleMeta {
    pub fn is_empty(&self) -> bool {
        self == &TitleMeta::default()
    }
}

/// Raw knowledge-base entity JSON
#[derive(Debug, Clone)]
pub struct KnowledgeEntity(Value);

impl KnowledgeEntity {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// First claim value of a property
    fn first_claim(&self, property: &str) -> Option<&Value> {
        self.0
            .get("claims")?
            .get(property)?
            .get(0)?
            .get("mainsnak")?
            .get("datavalue")?
            .get("value")
    }

    /// Linked external title id (`P345`), if it has the canonical shape
    pub fn linked_title_id(&self) -> Option<TitleId> {
        self.first_claim(TITLE_ID_PROPERTY)
            .and_then(Value::as_str)
            .and_then(TitleId::parse)
    }

    /// English label
    pub fn english_label(&self) -> Option<String> {
        self.0
            .pointer("/labels/en/value")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Presentation metadata; `None` when the entity carries none of it
    pub fn meta(&self) -> Option<TitleMeta> {
        let meta = TitleMeta {
            logo: self
                .first_claim(IMAGE_PROPERTY)
                .and_then(Value::as_str)
                .and_then(|f| commons_image_url(f, 480)),
            logo_icon: self
                .first_claim(LOGO_PROPERTY)
                .and_then(Value::as_str)
                .and_then(|f| commons_image_url(f, 80)),
            duration: self.first_claim(DURATION_PROPERTY).and_then(format_duration),
            description: self
                .0
                .pointer("/descriptions/en/value")
                .and_then(Value::as_str)
                .map(str::to_string),
            year: self.first_claim(PUBLICATION_DATE_PROPERTY).and_then(parse_year),
        };

        if meta.is_empty() {
            None
        } else {
            Some(meta)
        }
    }
}

/// Commons `Special:FilePath` URL for an image file name
pub fn commons_image_url(file_name: &str, width: u32) -> Option<String> {
    let name = file_name.trim();
    if name.is_empty() {
        return None;
    }
    let mut url = Url::parse(COMMONS_FILE_PATH_URL).ok()?;
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .push(&name.replace(' ', "_"));
    url.query_pairs_mut().append_pair("width", &width.to_string());
    Some(url.to_string())
}

/// Year from a time value (`{"time": "+1977-05-25T00:00:00Z"}` → 1977)
pub fn parse_year(time_value: &Value) -> Option<i32> {
    let time = time_value.get("time")?.as_str()?;
    let (sign, rest) = match time.as_bytes().first()? {
        b'+' => (1, &time[1..]),
        b'-' => (-1, &time[1..]),
        _ => (1, time),
    };
    let year: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if year.len() < 4 || !rest[year.len()..].starts_with('-') {
        return None;
    }
    year.parse::<i32>().ok().map(|y| sign * y)
}

/// Human duration from a quantity value ("X min", "X h", "X h Y min")
pub fn format_duration(quantity: &Value) -> Option<String> {
    let amount = match quantity.get("amount")? {
        Value::String(s) => s.trim_start_matches('+').parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }

    let in_seconds = quantity
        .get("unit")
        .and_then(Value::as_str)
        .is_some_and(|unit| unit.ends_with(SECOND_UNIT_SUFFIX));
    let minutes = if in_seconds {
        (amount / 60.0).round() as u64
    } else {
        amount.round() as u64
    };

    if minutes < 60 {
        return Some(format!("{} min", minutes));
    }
    let hours = minutes / 60;
    let rest = minutes % 60;
    if rest == 0 {
        Some(format!("{} h", hours))
    } else {
        Some(format!("{} h {} min", hours, rest))
    }
}

/// Wikidata HTTP client
pub struct WikidataClient {
    http_client: Client,
    entity_base_url: String,
    sparql_url: String,
    entity_timeout: Duration,
    label_timeout: Duration,
}

impl WikidataClient {
    pub fn new(
        user_agent: &str,
        entity_timeout: Duration,
        label_timeout: Duration,
    ) -> Result<Self, KnowledgeBaseError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        if let Ok(value) = header::HeaderValue::from_str(user_agent) {
            headers.insert("Api-User-Agent", value);
        }

        let http_client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| KnowledgeBaseError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            entity_base_url: ENTITY_DATA_BASE_URL.to_string(),
            sparql_url: SPARQL_URL.to_string(),
            entity_timeout,
            label_timeout,
        })
    }

    /// Point the client at other endpoints (tests, mirrors)
    pub fn with_endpoints(mut self, entity_base_url: &str, sparql_url: &str) -> Self {
        self.entity_base_url = entity_base_url.trim_end_matches('/').to_string();
        self.sparql_url = sparql_url.to_string();
        self
    }
}

#[async_trait]
impl KnowledgeBase for WikidataClient {
    async fn entity(&self, entity_id: &str) -> Result<Option<KnowledgeEntity>, KnowledgeBaseError> {
        let entity_id = entity_id.trim();
        let url = format!("{}/{}.json", self.entity_base_url, entity_id);
        debug!(entity_id = %entity_id, "Fetching knowledge-base entity");

        let response = self
            .http_client
            .get(&url)
            .timeout(self.entity_timeout)
            .send()
            .await
            .map_err(|e| KnowledgeBaseError::Transport(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(KnowledgeBaseError::Status(response.status().as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| KnowledgeBaseError::Parse(e.to_string()))?;

        let entities = body
            .get("entities")
            .ok_or_else(|| KnowledgeBaseError::Parse("missing entities".to_string()))?;
        let entity = entities
            .get(entity_id)
            .or_else(|| entities.get(entity_id.to_uppercase()))
            .cloned()
            .map(KnowledgeEntity::new);

        Ok(entity)
    }

    async fn title_label(&self, title_id: &TitleId) -> Option<String> {
        let query = format!(
            "SELECT ?label WHERE {{ ?item wdt:{} \"{}\". ?item rdfs:label ?label. FILTER(LANG(?label) = \"en\") }} LIMIT 1",
            TITLE_ID_PROPERTY,
            title_id.as_str()
        );

        let response = self
            .http_client
            .get(&self.sparql_url)
            .query(&[("query", query.as_str()), ("format", "json")])
            .timeout(self.label_timeout)
            .send()
            .await;

        let body: Value = match response {
            Ok(r) if r.status().is_success() => match r.json().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(title_id = %title_id, "Title label parse failed: {}", e);
                    return None;
                }
            },
            Ok(r) => {
                warn!(title_id = %title_id, status = %r.status(), "Title label lookup failed");
                return None;
            }
            Err(e) => {
                warn!(title_id = %title_id, "Title label lookup failed: {}", e);
                return None;
            }
        };

        body.pointer("/results/bindings/0/label/value")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}
