//! Persona rotation
//!
//! The rotation is a fixed, ordered list of persona ids. Position in the
//! rotation is never stored; it is recovered every tick from the newest
//! agent branch whose name mentions a persona.

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("persona rotation is empty")]
    EmptyRotation,

    #[error("persona '{0}' appears more than once in the rotation")]
    DuplicatePersona(String),

    #[error("invalid persona id '{id}': {source}")]
    InvalidPersona {
        id: String,
        #[source]
        source: regex::Error,
    },
}

/// Snapshot of where the rotation stands. Recomputed each tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleState {
    pub last_session_id: Option<String>,
    pub last_persona_id: Option<String>,
    pub next_persona_id: String,
    pub next_persona_index: usize,
    pub should_increment_sprint: bool,
    pub base_pr_number: Option<u64>,
}

/// Ordered persona table with one delimiter-bounded matcher per persona.
///
/// Matchers are compiled once. A persona matches a branch when its id
/// appears bounded by start/end or one of `-`, `_`, `/`, so `qa` does not
/// match `jules-qatar-fix`.
#[derive(Debug, Clone)]
pub struct PersonaMatcher {
    personas: Vec<String>,
    matchers: Vec<Regex>,
}

impl PersonaMatcher {
    pub fn new<I, S>(personas: I) -> Result<Self, CycleError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let personas: Vec<String> = personas.into_iter().map(Into::into).collect();
        if personas.is_empty() {
            return Err(CycleError::EmptyRotation);
        }

        let mut matchers = Vec::with_capacity(personas.len());
        for (i, id) in personas.iter().enumerate() {
            if personas[..i].contains(id) {
                return Err(CycleError::DuplicatePersona(id.clone()));
            }
            let pattern = format!(
                r"(?:^|[-_/]){}(?:$|[-_/])",
                regex::escape(&id.to_lowercase())
            );
            let re = Regex::new(&pattern).map_err(|source| CycleError::InvalidPersona {
                id: id.clone(),
                source,
            })?;
            matchers.push(re);
        }

        Ok(Self { personas, matchers })
    }

    pub fn personas(&self) -> &[String] {
        &self.personas
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn index_of(&self, persona_id: &str) -> Option<usize> {
        self.personas.iter().position(|p| p == persona_id)
    }

    pub fn persona_at(&self, index: usize) -> Option<&str> {
        self.personas.get(index).map(String::as_str)
    }

    /// First persona (in rotation order) whose id appears in `branch`.
    pub fn match_branch(&self, branch: &str) -> Option<&str> {
        let branch = branch.to_lowercase();
        self.matchers
            .iter()
            .position(|re| re.is_match(&branch))
            .map(|i| self.personas[i].as_str())
    }

    /// Index after `current` and whether the step wraps into a new sprint.
    pub fn advance(&self, current: &str) -> (usize, bool) {
        advance_cycle(&self.personas, current)
    }

    /// Initial state when no history links to any persona.
    pub fn fresh_state(&self) -> CycleState {
        CycleState {
            next_persona_id: self.personas[0].clone(),
            next_persona_index: 0,
            ..CycleState::default()
        }
    }
}

/// `(next_index, should_increment_sprint)` for the persona after `current`.
///
/// Unknown personas restart the rotation at 0 without signalling a new
/// sprint.
pub fn advance_cycle<S: AsRef<str>>(personas: &[S], current: &str) -> (usize, bool) {
    match personas.iter().position(|p| p.as_ref() == current) {
        Some(index) => {
            let next = (index + 1) % personas.len();
            (next, next == 0)
        }
        None => (0, false),
    }
}
