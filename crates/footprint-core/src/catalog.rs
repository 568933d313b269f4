//! # Stage Catalog
//!
//! The fixed, ordered sequence of work stages a project chain moves through.
//!
//! | Position | Stage       | Next        |
//! |----------|-------------|-------------|
//! | 0        | Design      | Development |
//! | 1        | Development | Testing     |
//! | 2        | Testing     | (terminal)  |
//!
//! Stages are not user-definable. Text forms are compared by exact identity.

use crate::FootprintError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// STAGE ENUM
// =============================================================================

/// A work stage. Declaration order is catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Design,
    Development,
    Testing,
}

impl Stage {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Stage::Design => "Design",
            Stage::Development => "Development",
            Stage::Testing => "Testing",
        }
    }

    /// Stable one-byte code used in storage keys.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            Stage::Design => 0,
            Stage::Development => 1,
            Stage::Testing => 2,
        }
    }

    /// Inverse of [`Stage::code`].
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Stage> {
        match code {
            0 => Some(Stage::Design),
            1 => Some(Stage::Development),
            2 => Some(Stage::Testing),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = FootprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageCatalog::STAGES
            .iter()
            .copied()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| FootprintError::InvalidInput(format!("unknown stage '{s}'")))
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Transition rules over the fixed stage list.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageCatalog;

impl StageCatalog {
    pub const STAGES: [Stage; 3] = [Stage::Design, Stage::Development, Stage::Testing];

    #[must_use]
    pub const fn first() -> Stage {
        Self::STAGES[0]
    }

    #[must_use]
    pub fn stages() -> &'static [Stage] {
        &Self::STAGES
    }

    #[must_use]
    pub fn position(stage: Stage) -> usize {
        usize::from(stage.code())
    }

    /// The stage after `stage`, or `None` if `stage` is last.
    #[must_use]
    pub fn next(stage: Stage) -> Option<Stage> {
        Self::STAGES.get(Self::position(stage).saturating_add(1)).copied()
    }

    #[must_use]
    pub fn is_last(stage: Stage) -> bool {
        Self::next(stage).is_none()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_ordering() {
        assert!(Stage::Design < Stage::Development);
        assert!(Stage::Development < Stage::Testing);
    }

    #[test]
    fn next_walks_the_list() {
        assert_eq!(StageCatalog::next(Stage::Design), Some(Stage::Development));
        assert_eq!(StageCatalog::next(Stage::Development), Some(Stage::Testing));
        assert_eq!(StageCatalog::next(Stage::Testing), None);
    }

    #[test]
    fn only_testing_is_last() {
        assert!(!StageCatalog::is_last(Stage::Design));
        assert!(!StageCatalog::is_last(Stage::Development));
        assert!(StageCatalog::is_last(Stage::Testing));
    }

    #[test]
    fn codes_roundtrip() {
        for stage in StageCatalog::stages() {
            assert_eq!(Stage::from_code(stage.code()), Some(*stage));
        }
        assert_eq!(Stage::from_code(3), None);
    }

    #[test]
    fn parse_is_exact_identity() {
        assert_eq!("Development".parse::<Stage>().expect("parse"), Stage::Development);
        assert!("development".parse::<Stage>().is_err());
        assert!(" Design".parse::<Stage>().is_err());
    }

    #[test]
    fn stage_display() {
        assert_eq!(format!("{}", Stage::Design), "Design");
        assert_eq!(StageCatalog::first(), Stage::Design);
    }
}
