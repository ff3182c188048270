//! Codec negotiation preference model
//!
//! A [`CodecDescription`] identifies one audio or video encoding; a
//! [`CodecList`] is an ordered sequence of descriptions whose insertion
//! order defines negotiation preference. Lists are plain values: they are
//! cloned whenever they cross a component boundary, so a manager's working
//! copy never aliases the orchestrator's view.
//!
//! Codec identity is the `name` field alone. Two descriptions with the
//! same name are the same codec regardless of clock rate, activation flag
//! or protocol list; this is what makes [`CodecList::append`] a stable
//! merge of a user's saved preference order with a backend's full
//! supported set.
//!
//! # Persisted form
//!
//! Each entry round-trips through a flat `:`-separated string:
//!
//! - `PCMU`: name only, active, default clock rate
//! - `PCMU:1`: name and activation flag
//! - `PCMU:8000:1`: name, clock rate, activation flag
//! - `PCMU:8000:1:sip h323`: plus the supporting protocol names
//!
//! The flat form only describes audio codecs; video descriptions are
//! constructed programmatically by the backend that supports them.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Clock rate assumed when the persisted form omits one
const DEFAULT_CLOCK_RATE: u32 = 8_000;

/// Kind of media a codec encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecKind {
    Audio,
    Video,
}

/// Description of one audio or video codec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecDescription {
    /// Unique symbolic identifier, e.g. "PCMU" or "H.264"
    pub name: String,
    /// Sampling rate in Hz
    pub clock_rate: u32,
    /// Whether the codec encodes audio or video
    pub kind: CodecKind,
    /// Whether the codec is currently enabled for negotiation
    pub active: bool,
    /// Ordered list of protocol names that can carry this codec
    pub protocols: Vec<String>,
    /// Nicer name for UI display, when it differs from the technical name
    pub display_info: Option<String>,
}

impl CodecDescription {
    /// Create an active codec description
    pub fn new(name: impl Into<String>, kind: CodecKind, clock_rate: u32) -> Self {
        Self {
            name: name.into(),
            clock_rate,
            kind,
            active: true,
            protocols: Vec::new(),
            display_info: None,
        }
    }

    /// Create an active audio description with the default clock rate
    pub fn audio(name: impl Into<String>) -> Self {
        Self::new(name, CodecKind::Audio, DEFAULT_CLOCK_RATE)
    }

    /// Create an active video description
    pub fn video(name: impl Into<String>, clock_rate: u32) -> Self {
        Self::new(name, CodecKind::Video, clock_rate)
    }

    /// Attach a display name for UI lookup
    pub fn with_display_info(mut self, info: impl Into<String>) -> Self {
        self.display_info = Some(info.into());
        self
    }

    /// Attach the supporting protocol names
    pub fn with_protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = protocols;
        self
    }

    /// Set the activation flag
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Parse one entry of the persisted flat form
    pub fn from_config_str(entry: &str) -> CoreResult<Self> {
        let parts: Vec<&str> = entry.split(':').collect();
        let name = parts[0].trim();
        if name.is_empty() {
            return Err(CoreError::invalid_codec_entry(entry));
        }

        let parse_active = |field: &str| -> CoreResult<bool> {
            match field.trim() {
                "1" | "true" => Ok(true),
                "0" | "false" => Ok(false),
                _ => Err(CoreError::invalid_codec_entry(entry)),
            }
        };

        let (clock_rate, active) = match parts.len() {
            1 => (DEFAULT_CLOCK_RATE, true),
            2 => (DEFAULT_CLOCK_RATE, parse_active(parts[1])?),
            _ => {
                let rate = parts[1]
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| CoreError::invalid_codec_entry(entry))?;
                (rate, parse_active(parts[2])?)
            }
        };

        let protocols = if parts.len() > 3 {
            parts[3].split_whitespace().map(str::to_string).collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            name: name.to_string(),
            clock_rate,
            kind: CodecKind::Audio,
            active,
            protocols,
            display_info: None,
        })
    }

    /// Render the persisted flat form of this entry
    pub fn to_config_string(&self) -> String {
        let active = if self.active { "1" } else { "0" };
        if self.protocols.is_empty() {
            format!("{}:{}:{}", self.name, self.clock_rate, active)
        } else {
            format!(
                "{}:{}:{}:{}",
                self.name,
                self.clock_rate,
                active,
                self.protocols.join(" ")
            )
        }
    }
}

/// Codec identity is the name alone
impl PartialEq for CodecDescription {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for CodecDescription {}

impl std::hash::Hash for CodecDescription {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Ordered codec preference list
///
/// Equality requires identical length and pairwise name-equal entries in
/// the same order: reordering two distinct codecs yields a different list,
/// even though [`CodecList::append`] deduplicates purely by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecList {
    items: Vec<CodecDescription>,
}

impl CodecList {
    /// Create an empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a list from the persisted flat form
    ///
    /// Entry order is preserved; it is the user's negotiation preference.
    pub fn load(entries: &[String]) -> CoreResult<Self> {
        let mut list = Self::new();
        for entry in entries {
            list.push(CodecDescription::from_config_str(entry)?);
        }
        Ok(list)
    }

    /// Render the persisted flat form of the whole list
    pub fn store(&self) -> Vec<String> {
        self.items.iter().map(CodecDescription::to_config_string).collect()
    }

    /// Append one description without deduplication
    ///
    /// The caller is responsible for not introducing duplicates.
    pub fn push(&mut self, desc: CodecDescription) {
        self.items.push(desc);
    }

    /// Concatenate `other`, then drop duplicates by name keeping the
    /// earliest occurrence
    ///
    /// Appending the full supported set to a saved preference list yields
    /// every supported codec exactly once, in stable preference order.
    pub fn append(&mut self, other: CodecList) {
        self.items.extend(other.items);
        let mut seen = std::collections::HashSet::new();
        self.items.retain(|c| seen.insert(c.name.clone()));
    }

    /// Reconcile this list against a backend's supported set
    ///
    /// Entries the backend does not support are kept in place but flagged
    /// inactive; supported codecs missing from the list are appended
    /// active, after the existing preference order.
    pub fn merge_supported(&mut self, supported: &CodecList) {
        for entry in &mut self.items {
            if !supported.contains_name(&entry.name) {
                entry.active = false;
            }
        }
        for sup in supported.iter() {
            if !self.contains_name(&sup.name) {
                self.items.push(sup.clone().with_active(true));
            }
        }
    }

    /// Find an entry by its UI display name
    ///
    /// Lookup is by the nice display name; the technical name only matches
    /// for entries that never set one.
    pub fn find(&self, display_name: &str) -> Option<&CodecDescription> {
        self.items.iter().find(|c| match &c.display_info {
            Some(info) => info == display_name,
            None => c.name == display_name,
        })
    }

    /// Whether an entry with this technical name is present
    pub fn contains_name(&self, name: &str) -> bool {
        self.items.iter().any(|c| c.name == name)
    }

    /// Filtered copy holding only the audio entries
    pub fn audio_list(&self) -> CodecList {
        CodecList {
            items: self
                .items
                .iter()
                .filter(|c| c.kind == CodecKind::Audio)
                .cloned()
                .collect(),
        }
    }

    /// Filtered copy holding only the video entries
    pub fn video_list(&self) -> CodecList {
        CodecList {
            items: self
                .items
                .iter()
                .filter(|c| c.kind == CodecKind::Video)
                .cloned()
                .collect(),
        }
    }

    /// First active entry of the given kind, in preference order
    pub fn first_active(&self, kind: CodecKind) -> Option<&CodecDescription> {
        self.items.iter().find(|c| c.kind == kind && c.active)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CodecDescription> {
        self.items.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CodecDescription> {
        self.items.iter()
    }
}

impl From<Vec<CodecDescription>> for CodecList {
    fn from(items: Vec<CodecDescription>) -> Self {
        Self { items }
    }
}

impl<'a> IntoIterator for &'a CodecList {
    type Item = &'a CodecDescription;
    type IntoIter = std::slice::Iter<'a, CodecDescription>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl IntoIterator for CodecList {
    type Item = CodecDescription;
    type IntoIter = std::vec::IntoIter<CodecDescription>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
