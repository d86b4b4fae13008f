//! Core domain types for the filming-locations pipeline
//!
//! - [`PlaceRecord`]: raw place text from the locations service
//! - [`GeocodedLocation`]: rendering-ready location (possibly without coordinates)
//! - [`TitleId`]: canonical external title identifier (`tt` + digits)
//! - [`TitleReference`]: user-facing identifier classified by shape
//! - [`PipelineProgress`]: observable progress counters

use serde::{Deserialize, Serialize};
use wwf_common::events::ProgressStatus;

/// Fallback scene description when the locations service gives none
pub const NO_DESCRIPTION: &str = "No description available";

/// Raw location entry returned by the locations service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceRecord {
    /// Free-text place as displayed by the service
    pub raw_text: String,
    /// First qualifier of the entry (scene), if any
    pub scene_description: Option<String>,
}

impl PlaceRecord {
    pub fn new(raw_text: impl Into<String>, scene_description: Option<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            scene_description: scene_description
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }

    /// Scene description with the literal fallback applied
    pub fn description(&self) -> &str {
        self.scene_description.as_deref().unwrap_or(NO_DESCRIPTION)
    }
}

/// Successful geocode of one place string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodeHit {
    pub lon: f64,
    pub lat: f64,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: Option<[f64; 4]>,
    pub place_type: Option<String>,
    pub formatted: String,
}

/// Rendering-ready location
///
/// Coordinates are either both present (plottable) or both absent. A record
/// whose geocode failed is kept with null coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeocodedLocation {
    pub place: String,
    pub desc: String,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    pub bbox: Option<[f64; 4]>,
    pub place_type: Option<String>,
    pub formatted: String,
}

impl GeocodedLocation {
    /// Un-geocoded record for a place (all coordinate fields null)
    pub fn pending(record: &PlaceRecord) -> Self {
        Self {
            place: record.raw_text.clone(),
            desc: record.description().to_string(),
            lon: None,
            lat: None,
            bbox: None,
            place_type: None,
            formatted: record.raw_text.clone(),
        }
    }

    /// Fill coordinate fields from a geocode hit
    pub fn apply(&mut self, hit: &GeocodeHit) {
        self.lon = Some(hit.lon);
        self.lat = Some(hit.lat);
        self.bbox = hit.bbox;
        self.place_type = hit.place_type.clone();
        self.formatted = if hit.formatted.trim().is_empty() {
            self.place.clone()
        } else {
            hit.formatted.clone()
        };
    }

    pub fn is_plottable(&self) -> bool {
        self.lon.is_some() && self.lat.is_some()
    }

    /// Whether the record carries a real scene description
    pub fn has_scene_description(&self) -> bool {
        let desc = self.desc.trim();
        !desc.is_empty() && desc != NO_DESCRIPTION
    }

    /// Label shown for the location (formatted address, else raw place)
    pub fn label(&self) -> &str {
        if self.formatted.trim().is_empty() {
            &self.place
        } else {
            &self.formatted
        }
    }
}

/// Canonical external title identifier: `tt` followed by digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TitleId(String);

impl TitleId {
    /// Parse a canonical title id; `None` for anything else
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if is_title_id(raw) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TitleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TitleId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TitleId::parse(&value).ok_or_else(|| format!("not a title id: {}", value))
    }
}

impl From<TitleId> for String {
    fn from(id: TitleId) -> Self {
        id.0
    }
}

/// `^tt\d+$`
pub fn is_title_id(raw: &str) -> bool {
    raw.strip_prefix("tt")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// `^Q\d+$`, case-insensitive
pub fn is_knowledge_base_id(raw: &str) -> bool {
    let raw = raw.trim();
    let mut chars = raw.chars();
    matches!(chars.next(), Some('Q') | Some('q'))
        && raw.len() > 1
        && chars.all(|c| c.is_ascii_digit())
}

/// `<base64url payload>.<base64url signature>`
pub fn is_token_shape(raw: &str) -> bool {
    let is_b64url = |s: &str| {
        !s.is_empty()
            && s
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    };
    match raw.trim().split_once('.') {
        Some((payload, sig)) => is_b64url(payload) && is_b64url(sig),
        None => false,
    }
}

/// User-facing identifier, classified by its shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TitleReference {
    /// Knowledge-base entity id (`Q…`) that links to a title id
    KnowledgeBase(String),
    /// Signed, time-bucketed token wrapping a title id
    Token(String),
    /// Literal title id (validated later)
    Direct(String),
}

impl TitleReference {
    pub fn classify(raw: &str) -> Self {
        let raw = raw.trim();
        if is_knowledge_base_id(raw) {
            TitleReference::KnowledgeBase(raw.to_uppercase())
        } else if is_token_shape(raw) {
            TitleReference::Token(raw.to_string())
        } else {
            TitleReference::Direct(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TitleReference::KnowledgeBase(s)
            | TitleReference::Token(s)
            | TitleReference::Direct(s) => s,
        }
    }
}

/// Progress counters observed by UI consumers
///
/// Invariants: `processed <= total`, `found <= processed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineProgress {
    pub total: usize,
    pub processed: usize,
    pub found: usize,
    pub status: ProgressStatus,
}

impl PipelineProgress {
    /// Fresh running state for a run of `total` items
    pub fn running(total: usize) -> Self {
        Self {
            total,
            processed: 0,
            found: 0,
            status: ProgressStatus::Running,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.processed <= self.total && self.found <= self.processed
    }

    pub fn is_done(&self) -> bool {
        self.status == ProgressStatus::Done
    }
}

/// Where a run's locations came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationsOrigin {
    /// Pre-geocoded rows from storage (geocoding skipped)
    Stored,
    /// Raw places from the locations service (geocoded in this run)
    External,
}

impl LocationsOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationsOrigin::Stored => "stored",
            LocationsOrigin::External => "external",
        }
    }
}
