//! Production library selection
//!
//! Rules are applied in order: explicit code mapping, alphabetic range rules,
//! then the configured fallback strategy. A rule whose library is locked or
//! unknown does not match and evaluation moves on to the next rule.

use sha2::{Digest, Sha256};
use stacks_common::config::{PlacementConfig, PlacementStrategyKind, RangeRule};
use stacks_common::db::{Library, LibraryType};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("no unlocked production library available for code '{0}'")]
    NoEligibleLibrary(String),
}

/// A production library plus what placement may need to know about it
#[derive(Debug, Clone)]
pub struct PlacementCandidate {
    pub library: Library,
    /// Bytes already placed in the library
    pub used_bytes: u64,
}

impl PlacementCandidate {
    pub fn new(library: Library, used_bytes: u64) -> Self {
        Self { library, used_bytes }
    }
}

/// Which rule produced a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRule {
    Explicit,
    Range,
    Fallback(PlacementStrategyKind),
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub library: Library,
    pub rule: SelectionRule,
}

/// One fallback strategy; `candidates` are eligible and sorted by name
pub trait Placement: Send + Sync + fmt::Debug {
    fn kind(&self) -> PlacementStrategyKind;

    fn choose<'a>(&self, code: &str, candidates: &'a [PlacementCandidate]) -> Option<&'a PlacementCandidate>;
}

/// Rendezvous hashing: every library scores `sha256(salt, code, library id)`
/// and the highest score wins. Adding or removing a library only moves the
/// codes that scored highest on it.
#[derive(Debug, Clone)]
pub struct ConsistentHashPlacement {
    salt: String,
}

impl ConsistentHashPlacement {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    fn score(&self, code: &str, library: &Library) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update([0u8]);
        hasher.update(code.as_bytes());
        hasher.update([0u8]);
        hasher.update(library.id.as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }
}

impl Placement for ConsistentHashPlacement {
    fn kind(&self) -> PlacementStrategyKind {
        PlacementStrategyKind::ConsistentHash
    }

    fn choose<'a>(&self, code: &str, candidates: &'a [PlacementCandidate]) -> Option<&'a PlacementCandidate> {
        candidates
            .iter()
            .max_by_key(|c| (self.score(code, &c.library), std::cmp::Reverse(c.library.id)))
    }
}

/// Rotates through candidates; not deterministic across calls
#[derive(Debug, Default)]
pub struct RoundRobinPlacement {
    next: AtomicUsize,
}

impl Placement for RoundRobinPlacement {
    fn kind(&self) -> PlacementStrategyKind {
        PlacementStrategyKind::RoundRobin
    }

    fn choose<'a>(&self, _code: &str, candidates: &'a [PlacementCandidate]) -> Option<&'a PlacementCandidate> {
        if candidates.is_empty() {
            return None;
        }
        let slot = self.next.fetch_add(1, Ordering::Relaxed);
        candidates.get(slot % candidates.len())
    }
}

/// First character's code point modulo the candidate count
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstCharModuloPlacement;

impl Placement for FirstCharModuloPlacement {
    fn kind(&self) -> PlacementStrategyKind {
        PlacementStrategyKind::FirstCharModulo
    }

    fn choose<'a>(&self, code: &str, candidates: &'a [PlacementCandidate]) -> Option<&'a PlacementCandidate> {
        if candidates.is_empty() {
            return None;
        }
        let first = code.chars().next().map(|c| c.to_ascii_uppercase() as usize).unwrap_or(0);
        candidates.get(first % candidates.len())
    }
}

/// Library with the fewest bytes placed; ties go to the first by name
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastSizePlacement;

impl Placement for LeastSizePlacement {
    fn kind(&self) -> PlacementStrategyKind {
        PlacementStrategyKind::LeastSize
    }

    fn choose<'a>(&self, _code: &str, candidates: &'a [PlacementCandidate]) -> Option<&'a PlacementCandidate> {
        // min_by_key keeps the first minimum, and candidates are name-sorted
        candidates.iter().min_by_key(|c| c.used_bytes)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FirstAvailablePlacement;

impl Placement for FirstAvailablePlacement {
    fn kind(&self) -> PlacementStrategyKind {
        PlacementStrategyKind::FirstAvailable
    }

    fn choose<'a>(&self, _code: &str, candidates: &'a [PlacementCandidate]) -> Option<&'a PlacementCandidate> {
        candidates.first()
    }
}

/// Build the fallback strategy for `kind`
pub fn placement_for(kind: PlacementStrategyKind, salt: &str) -> Box<dyn Placement> {
    match kind {
        PlacementStrategyKind::ConsistentHash => Box::new(ConsistentHashPlacement::new(salt)),
        PlacementStrategyKind::RoundRobin => Box::new(RoundRobinPlacement::default()),
        PlacementStrategyKind::FirstCharModulo => Box::new(FirstCharModuloPlacement),
        PlacementStrategyKind::LeastSize => Box::new(LeastSizePlacement),
        PlacementStrategyKind::FirstAvailable => Box::new(FirstAvailablePlacement),
    }
}

/// Library selector
#[derive(Debug)]
pub struct LibrarySelector {
    /// Uppercased directory code → library name
    explicit: BTreeMap<String, String>,
    ranges: Vec<RangeRule>,
    fallback: Box<dyn Placement>,
}

impl LibrarySelector {
    pub fn new(explicit: BTreeMap<String, String>, ranges: Vec<RangeRule>, fallback: Box<dyn Placement>) -> Self {
        let explicit = explicit
            .into_iter()
            .map(|(code, library)| (code.to_uppercase(), library))
            .collect();
        Self {
            explicit,
            ranges,
            fallback,
        }
    }

    pub fn from_config(config: &PlacementConfig) -> Self {
        Self::new(
            config.explicit.clone(),
            config.ranges.clone(),
            placement_for(config.strategy, &config.hash_salt),
        )
    }

    /// Pick the production library for `code` among `libraries`
    pub fn select(&self, code: &str, libraries: &[PlacementCandidate]) -> Result<Selection, PlacementError> {
        let mut candidates: Vec<PlacementCandidate> = libraries
            .iter()
            .filter(|c| c.library.library_type == LibraryType::Production && !c.library.locked)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.library.name.cmp(&b.library.name).then(a.library.id.cmp(&b.library.id)));

        if candidates.is_empty() {
            return Err(PlacementError::NoEligibleLibrary(code.to_string()));
        }

        let code_upper = code.to_uppercase();

        if let Some(name) = self.explicit.get(&code_upper) {
            match find_by_name(&candidates, name) {
                Some(candidate) => return Ok(selection(candidate, SelectionRule::Explicit)),
                None => tracing::warn!(
                    code,
                    library = %name,
                    "Explicitly mapped library is locked or missing, trying next rule"
                ),
            }
        }

        if let Some(first) = code_upper.chars().next() {
            for rule in &self.ranges {
                let start = rule.start.to_ascii_uppercase();
                let end = rule.end.to_ascii_uppercase();
                if first < start || first > end {
                    continue;
                }
                match find_by_name(&candidates, &rule.library) {
                    Some(candidate) => return Ok(selection(candidate, SelectionRule::Range)),
                    None => tracing::warn!(
                        code,
                        library = %rule.library,
                        range = %format!("{}-{}", rule.start, rule.end),
                        "Range-mapped library is locked or missing, trying next rule"
                    ),
                }
            }
        }

        self.fallback
            .choose(&code_upper, &candidates)
            .map(|candidate| selection(candidate, SelectionRule::Fallback(self.fallback.kind())))
            .ok_or_else(|| PlacementError::NoEligibleLibrary(code.to_string()))
    }
}

fn find_by_name<'a>(candidates: &'a [PlacementCandidate], name: &str) -> Option<&'a PlacementCandidate> {
    candidates.iter().find(|c| c.library.name == name)
}

fn selection(candidate: &PlacementCandidate, rule: SelectionRule) -> Selection {
    Selection {
        library: candidate.library.clone(),
        rule,
    }
}
