use std::{collections::HashSet, fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

/// Opaque, stable identifier of a track.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Immutable description of a playable track.
///
/// `is_local_origin` is computed once from the locator so the analysis tap can
/// decide whether to attach without touching a playback resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TrackRecord")]
pub struct TrackDescriptor {
    id: TrackId,
    source: String,
    is_local_origin: bool,
    known_duration_seconds: Option<f64>,
    title: Option<String>,
    artist: Option<String>,
}

impl TrackDescriptor {
    pub fn new(id: impl Into<TrackId>, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            id: id.into(),
            is_local_origin: is_local_locator(&source),
            source,
            known_duration_seconds: None,
            title: None,
            artist: None,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.known_duration_seconds = Some(seconds).filter(|d| d.is_finite() && *d >= 0.0);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self
    }

    /// Overrides the origin policy derived from the locator, for hosts that
    /// know a remote server sends permissive cross-origin headers.
    pub fn with_local_origin(mut self, local: bool) -> Self {
        self.is_local_origin = local;
        self
    }

    pub fn id(&self) -> &TrackId {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_local_origin(&self) -> bool {
        self.is_local_origin
    }

    /// Whether the analysis tap may read this track's signal.
    pub fn analysis_permitted(&self) -> bool {
        self.is_local_origin
    }

    pub fn known_duration_seconds(&self) -> Option<f64> {
        self.known_duration_seconds
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn artist(&self) -> Option<&str> {
        self.artist.as_deref()
    }
}

/// Wire shape of a catalog entry.
#[derive(Debug, Deserialize)]
struct TrackRecord {
    id: TrackId,
    #[serde(alias = "src")]
    source: String,
    #[serde(default, alias = "duration")]
    known_duration_seconds: Option<f64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default, alias = "local_origin")]
    is_local_origin: Option<bool>,
}

impl From<TrackRecord> for TrackDescriptor {
    fn from(record: TrackRecord) -> Self {
        let mut track = TrackDescriptor::new(record.id, record.source);
        if let Some(seconds) = record.known_duration_seconds {
            track = track.with_duration(seconds);
        }
        if let Some(local) = record.is_local_origin {
            track = track.with_local_origin(local);
        }
        track.title = record.title;
        track.artist = record.artist;
        track
    }
}

/// Scheme-less paths and `file:` URIs are local; anything with another scheme
/// is treated as an untrusted remote origin.
pub fn is_local_locator(locator: &str) -> bool {
    let locator = locator.trim();
    if locator.is_empty() {
        return false;
    }
    match scheme_of(locator) {
        None => true,
        Some(scheme) => scheme.eq_ignore_ascii_case("file"),
    }
}

fn scheme_of(locator: &str) -> Option<&str> {
    let (scheme, _) = locator.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    let valid = first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    // A single letter is a Windows drive, not a scheme.
    if valid && scheme.len() > 1 {
        Some(scheme)
    } else {
        None
    }
}

/// Ordered list of tracks supplied by the catalog provider. It is replaced
/// wholesale, never edited in place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackCatalog {
    tracks: Vec<TrackDescriptor>,
}

impl TrackCatalog {
    pub fn new(tracks: Vec<TrackDescriptor>) -> Result<Self> {
        let mut catalog = Self::default();
        catalog.replace(tracks)?;
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let tracks: Vec<TrackDescriptor> = serde_json::from_str(json)?;
        Self::new(tracks)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Swaps in a new track list. The previous list is kept if the new one
    /// contains duplicate ids.
    pub fn replace(&mut self, tracks: Vec<TrackDescriptor>) -> Result<()> {
        let mut seen = HashSet::new();
        for track in &tracks {
            if !seen.insert(track.id()) {
                return Err(EngineError::invalid(format!(
                    "duplicate track id `{}` in catalog",
                    track.id()
                )));
            }
        }
        self.tracks = tracks;
        Ok(())
    }

    pub fn tracks(&self) -> &[TrackDescriptor] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn first(&self) -> Option<&TrackDescriptor> {
        self.tracks.first()
    }

    pub fn get(&self, id: &TrackId) -> Option<&TrackDescriptor> {
        self.tracks.iter().find(|track| track.id() == id)
    }

    /// Track following `id` in catalog order, wrapping around at the end.
    pub fn next_after(&self, id: &TrackId) -> Option<&TrackDescriptor> {
        let index = self.tracks.iter().position(|track| track.id() == id)?;
        self.tracks.get((index + 1) % self.tracks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_origin_from_locator() {
        assert!(is_local_locator("/music/track.mp3"));
        assert!(is_local_locator("./music/track.mp3"));
        assert!(is_local_locator("music/track.mp3"));
        assert!(is_local_locator("file:///srv/music/track.mp3"));
        assert!(is_local_locator(r"C:\music\track.mp3"));
        assert!(!is_local_locator("https://cdn.example.com/track.mp3"));
        assert!(!is_local_locator("http://example.com/a.ogg"));
        assert!(!is_local_locator(""));
    }

    #[test]
    fn parses_catalog_json() {
        let catalog = TrackCatalog::from_json_str(
            r#"[
                { "id": "t1", "src": "/music/one.mp3", "duration": 180, "title": "One" },
                { "id": "t2", "source": "https://cdn.example.com/two.mp3" },
                { "id": "t3", "source": "https://cors.example.com/three.mp3", "local_origin": true }
            ]"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 3);
        let one = catalog.get(&TrackId::from("t1")).unwrap();
        assert!(one.is_local_origin());
        assert_eq!(one.known_duration_seconds(), Some(180.0));
        assert_eq!(one.title(), Some("One"));
        assert!(!catalog.tracks()[1].is_local_origin());
        assert!(catalog.tracks()[2].analysis_permitted());
    }

    #[test]
    fn rejects_duplicate_ids_and_keeps_previous_list() {
        let mut catalog = TrackCatalog::new(vec![TrackDescriptor::new("a", "/a.mp3")]).unwrap();
        let err = catalog
            .replace(vec![
                TrackDescriptor::new("b", "/b.mp3"),
                TrackDescriptor::new("b", "/c.mp3"),
            ])
            .unwrap_err();

        assert!(format!("{err}").contains("duplicate"));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.first().unwrap().id().as_str(), "a");
    }

    #[test]
    fn next_after_wraps() {
        let catalog = TrackCatalog::new(vec![
            TrackDescriptor::new("a", "/a.mp3"),
            TrackDescriptor::new("b", "/b.mp3"),
        ])
        .unwrap();

        assert_eq!(catalog.next_after(&"a".into()).unwrap().id().as_str(), "b");
        assert_eq!(catalog.next_after(&"b".into()).unwrap().id().as_str(), "a");
        assert!(catalog.next_after(&"zzz".into()).is_none());
    }
}
