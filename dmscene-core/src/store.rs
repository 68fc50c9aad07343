//! Entity store adapter.
//!
//! The assembler reads characters, locations and lore through [`EntityStore`].
//! Lookups return empty results for "not found"; turning emptiness into a
//! typed error is the partitioner's job.
//!
//! [`InMemoryStore`] holds an immutable [`Snapshot`] behind an `Arc`. Edits
//! replace the whole snapshot, so a reader sees either the old or the new
//! data, never a half-written record. [`JsonDirectoryLoader`] fills a
//! snapshot from `npcs/`, `locations/` and `lore/` directories of JSON files.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::DataConfig;
use crate::error::StoreError;
use crate::types::{Character, CharacterKind, Location, LoreEntry, Room};

/// Read-only lookups of world entities.
pub trait EntityStore: Send + Sync {
    /// All characters whose name is in `names`, in the store's own order.
    ///
    /// # Errors
    /// Adapter-level failures only; unknown names are simply absent.
    fn find_characters_by_name(&self, names: &[String]) -> Result<Vec<Character>, StoreError>;

    /// The location with this exact name.
    ///
    /// # Errors
    /// Adapter-level failures only.
    fn find_location_by_name(&self, name: &str) -> Result<Option<Location>, StoreError>;

    /// All lore entries whose id is in `ids`, in the store's own order.
    ///
    /// # Errors
    /// Adapter-level failures only; unknown ids are simply absent.
    fn find_lore_by_ids(&self, ids: &[String]) -> Result<Vec<LoreEntry>, StoreError>;

    /// Every character, for listings.
    ///
    /// # Errors
    /// Adapter-level failures only.
    fn list_characters(&self) -> Result<Vec<Character>, StoreError>;

    /// Every location, for listings.
    ///
    /// # Errors
    /// Adapter-level failures only.
    fn list_locations(&self) -> Result<Vec<Location>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// An immutable set of entities.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Characters in load order.
    pub characters: Vec<Character>,
    /// Locations in load order.
    pub locations: Vec<Location>,
    /// Lore entries in load order.
    pub lore: Vec<LoreEntry>,
}

/// Thread-safe in-memory entity store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl InMemoryStore {
    /// Create a store serving `snapshot`.
    #[must_use]
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The snapshot currently being served.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Atomically replace the whole data set.
    pub fn replace(&self, snapshot: Snapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    /// Copy-on-write edit: clone the current snapshot, apply `edit`, publish.
    pub fn edit<F>(&self, edit: F)
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut guard = self.snapshot.write();
        let mut next: Snapshot = (**guard).clone();
        edit(&mut next);
        *guard = Arc::new(next);
    }
}

impl EntityStore for InMemoryStore {
    fn find_characters_by_name(&self, names: &[String]) -> Result<Vec<Character>, StoreError> {
        let snap = self.snapshot();
        Ok(snap
            .characters
            .iter()
            .filter(|c| names.contains(&c.name))
            .cloned()
            .collect())
    }

    fn find_location_by_name(&self, name: &str) -> Result<Option<Location>, StoreError> {
        let snap = self.snapshot();
        Ok(snap.locations.iter().find(|l| l.name == name).cloned())
    }

    fn find_lore_by_ids(&self, ids: &[String]) -> Result<Vec<LoreEntry>, StoreError> {
        let snap = self.snapshot();
        Ok(snap
            .lore
            .iter()
            .filter(|l| ids.contains(&l.lore_id))
            .cloned()
            .collect())
    }

    fn list_characters(&self) -> Result<Vec<Character>, StoreError> {
        Ok(self.snapshot().characters.clone())
    }

    fn list_locations(&self) -> Result<Vec<Location>, StoreError> {
        Ok(self.snapshot().locations.clone())
    }
}

// ---------------------------------------------------------------------------
// Loose document shapes
// ---------------------------------------------------------------------------

/// A field that data files write either as a single string or as a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) if s.trim().is_empty() => Vec::new(),
            Self::One(s) => vec![s],
            Self::Many(v) => v.into_iter().filter(|s| !s.trim().is_empty()).collect(),
        }
    }
}

fn list(field: Option<OneOrMany>) -> Vec<String> {
    field.map(OneOrMany::into_vec).unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct CharacterDocument {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "motivation")]
    motivations: Option<OneOrMany>,
    #[serde(default, alias = "personality", alias = "personalityTraits")]
    personality_traits: Option<OneOrMany>,
    #[serde(default)]
    behavior: Option<String>,
    #[serde(default, alias = "language")]
    languages: Option<OneOrMany>,
    #[serde(default, alias = "lore_id", alias = "loreRefs")]
    lore_refs: Option<OneOrMany>,
    #[serde(default, alias = "type")]
    kind: Option<String>,
}

impl CharacterDocument {
    fn into_character(self, source: &str) -> Result<Character, StoreError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::InvalidDocument {
                source_name: source.to_string(),
                reason: "character has no name".into(),
            });
        }
        let kind = match self.kind.as_deref().map(str::to_lowercase).as_deref() {
            Some("monster") => CharacterKind::Monster,
            _ => CharacterKind::Npc,
        };
        Ok(Character {
            name,
            description: self.description,
            motivations: list(self.motivations),
            personality_traits: list(self.personality_traits),
            behavior: self.behavior.filter(|b| !b.trim().is_empty()),
            languages: list(self.languages),
            lore_refs: list(self.lore_refs),
            kind,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RoomDocument {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "npcs", alias = "presentCharacterNames", alias = "npc_names")]
    present_character_names: Option<OneOrMany>,
}

#[derive(Debug, Deserialize)]
struct LocationDocument {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    rooms: Vec<RoomDocument>,
}

impl LocationDocument {
    fn into_location(self, source: &str) -> Result<Location, StoreError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::InvalidDocument {
                source_name: source.to_string(),
                reason: "location has no name".into(),
            });
        }
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for room in self.rooms {
            let room_name = room.name.trim().to_string();
            if room_name.is_empty() {
                return Err(StoreError::InvalidDocument {
                    source_name: source.to_string(),
                    reason: format!("room without a name in location '{name}'"),
                });
            }
            rooms.push(Room {
                name: room_name,
                description: room.description,
                present_character_names: list(room.present_character_names),
            });
        }
        Ok(Location {
            name,
            description: self.description,
            rooms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct LoreDocument {
    #[serde(default, alias = "loreId", alias = "id")]
    lore_id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

impl LoreDocument {
    fn into_lore(self, source: &str) -> Result<LoreEntry, StoreError> {
        let lore_id = self.lore_id.trim().to_string();
        if lore_id.is_empty() {
            return Err(StoreError::InvalidDocument {
                source_name: source.to_string(),
                reason: "lore entry has no lore_id".into(),
            });
        }
        Ok(LoreEntry {
            lore_id,
            title: self.title,
            content: self.content,
        })
    }
}

/// Parse one JSON file body that holds either one document or a list.
fn parse_documents<T: serde::de::DeserializeOwned>(
    body: &str,
    source: &str,
) -> Result<Vec<T>, StoreError> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Body<T> {
        Many(Vec<T>),
        One(T),
    }

    let parsed: Body<T> =
        serde_json::from_str(body).map_err(|e| StoreError::InvalidDocument {
            source_name: source.to_string(),
            reason: e.to_string(),
        })?;
    Ok(match parsed {
        Body::Many(v) => v,
        Body::One(d) => vec![d],
    })
}

/// Parse a character file body (single object or list).
///
/// # Errors
/// Returns [`StoreError::InvalidDocument`] for bad JSON or a nameless character.
pub fn parse_characters(body: &str, source: &str) -> Result<Vec<Character>, StoreError> {
    parse_documents::<CharacterDocument>(body, source)?
        .into_iter()
        .map(|d| d.into_character(source))
        .collect()
}

/// Parse a location file body (single object or list).
///
/// # Errors
/// Returns [`StoreError::InvalidDocument`] for bad JSON or a nameless location/room.
pub fn parse_locations(body: &str, source: &str) -> Result<Vec<Location>, StoreError> {
    parse_documents::<LocationDocument>(body, source)?
        .into_iter()
        .map(|d| d.into_location(source))
        .collect()
}

/// Parse a lore file body (single object or list).
///
/// # Errors
/// Returns [`StoreError::InvalidDocument`] for bad JSON or a missing `lore_id`.
pub fn parse_lore(body: &str, source: &str) -> Result<Vec<LoreEntry>, StoreError> {
    parse_documents::<LoreDocument>(body, source)?
        .into_iter()
        .map(|d| d.into_lore(source))
        .collect()
}

// ---------------------------------------------------------------------------
// JSON directory loader
// ---------------------------------------------------------------------------

/// Summary of one directory load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Files parsed successfully.
    pub files_loaded: usize,
    /// Files skipped because they failed to parse.
    pub files_skipped: usize,
    /// Documents added.
    pub documents: usize,
}

/// Builds a [`Snapshot`] from directories of `.json` files.
///
/// A file that fails to parse is logged and skipped; the rest still load.
/// A missing directory is logged and treated as empty.
#[derive(Debug, Clone)]
pub struct JsonDirectoryLoader {
    data: DataConfig,
}

impl JsonDirectoryLoader {
    /// Create a loader for the configured directories.
    #[must_use]
    pub fn new(data: DataConfig) -> Self {
        Self { data }
    }

    /// Load all three directories into a fresh snapshot.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] if a directory exists but cannot be listed.
    pub fn load(&self) -> Result<Snapshot, StoreError> {
        let (characters, report) = load_directory(&self.data.npcs_dir, parse_characters)?;
        log_report("npcs", &self.data.npcs_dir, report);
        let (locations, report) = load_directory(&self.data.locations_dir, parse_locations)?;
        log_report("locations", &self.data.locations_dir, report);
        let (lore, report) = load_directory(&self.data.lore_dir, parse_lore)?;
        log_report("lore", &self.data.lore_dir, report);

        Ok(Snapshot {
            characters: dedupe_by(characters, |c| c.name.clone(), "character"),
            locations: dedupe_by(locations, |l| l.name.clone(), "location"),
            lore: dedupe_by(lore, |l| l.lore_id.clone(), "lore"),
        })
    }

    /// Load the directories and wrap them in an [`InMemoryStore`].
    ///
    /// # Errors
    /// See [`Self::load`].
    pub fn load_store(&self) -> Result<InMemoryStore, StoreError> {
        Ok(InMemoryStore::new(self.load()?))
    }
}

fn log_report(collection: &str, dir: &Path, report: LoadReport) {
    info!(
        collection,
        dir = %dir.display(),
        files = report.files_loaded,
        skipped = report.files_skipped,
        documents = report.documents,
        "Loaded entity files"
    );
}

/// Load every `.json` file in `dir`, sorted by file name for a stable order.
fn load_directory<T, F>(dir: &Path, parse: F) -> Result<(Vec<T>, LoadReport), StoreError>
where
    F: Fn(&str, &str) -> Result<Vec<T>, StoreError>,
{
    let mut report = LoadReport::default();
    if !dir.is_dir() {
        warn!(dir = %dir.display(), "Data directory not found");
        return Ok((Vec::new(), report));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut out = Vec::new();
    for path in paths {
        let source = path.display().to_string();
        let parsed = std::fs::read_to_string(&path)
            .map_err(StoreError::from)
            .and_then(|body| parse(&body, &source));
        match parsed {
            Ok(docs) => {
                debug!(file = %source, documents = docs.len(), "Parsed entity file");
                report.files_loaded += 1;
                report.documents += docs.len();
                out.extend(docs);
            }
            Err(e) => {
                warn!(file = %source, error = %e, "Skipping entity file");
                report.files_skipped += 1;
            }
        }
    }
    Ok((out, report))
}

/// Keep the first document per key; later duplicates are logged and dropped.
fn dedupe_by<T, K>(items: Vec<T>, key: K, what: &str) -> Vec<T>
where
    K: Fn(&T) -> String,
{
    let mut seen = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let k = key(&item);
        if !seen.insert(k.clone()) {
            warn!(kind = what, key = %k, "Duplicate entity ignored");
            continue;
        }
        out.push(item);
    }
    out
}
