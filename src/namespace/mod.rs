// Maps a learner's (exam level, study mode) selection onto a vector index partition.


use std::fmt;
use std::str::FromStr;

use crate::{RagError, Result};

/// Eiken grades the study material is organised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExamLevel {
    Grade5,
    Grade4,
    Grade3,
    GradePre2,
    Grade2,
}

/// Kind of content being studied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StudyMode {
    Vocabulary,
    Passages,
    Listening,
}

impl ExamLevel {
    pub const ALL: [Self; 5] = [
        Self::Grade5,
        Self::Grade4,
        Self::Grade3,
        Self::GradePre2,
        Self::Grade2,
    ];

    /// Label shown to learners, e.g. `準2級`
    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Grade5 => "5級",
            Self::Grade4 => "4級",
            Self::Grade3 => "3級",
            Self::GradePre2 => "準2級",
            Self::Grade2 => "2級",
        }
    }

    /// Suffix used in namespace strings, e.g. `pre2`
    #[inline]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Grade5 => "5",
            Self::Grade4 => "4",
            Self::Grade3 => "3",
            Self::GradePre2 => "pre2",
            Self::Grade2 => "2",
        }
    }
}

impl StudyMode {
    pub const ALL: [Self; 3] = [Self::Vocabulary, Self::Passages, Self::Listening];

    #[inline]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Vocabulary => "語彙",
            Self::Passages => "長文",
            Self::Listening => "リスニング",
        }
    }

    #[inline]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Vocabulary => "vocab",
            Self::Passages => "passages",
            Self::Listening => "listening",
        }
    }
}

impl FromStr for ExamLevel {
    type Err = RagError;

    /// Accepts either the label (`3級`) or the code (`3`). No trimming or case folding.
    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|level| level.label() == value || level.code() == value)
            .ok_or_else(|| RagError::UnknownSelection {
                field: "level",
                value: value.to_string(),
            })
    }
}

impl FromStr for StudyMode {
    type Err = RagError;

    fn from_str(value: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.label() == value || mode.code() == value)
            .ok_or_else(|| RagError::UnknownSelection {
                field: "mode",
                value: value.to_string(),
            })
    }
}

impl fmt::Display for ExamLevel {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl fmt::Display for StudyMode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Partition key of the vector index, always `{mode-code}-{level-code}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(String);

impl Namespace {
    #[inline]
    pub fn new(level: ExamLevel, mode: StudyMode) -> Self {
        Self(format!("{}-{}", mode.code(), level.code()))
    }

    /// Every partition the application can address, grouped by mode.
    #[inline]
    pub fn all() -> Vec<(ExamLevel, StudyMode, Self)> {
        StudyMode::ALL
            .into_iter()
            .flat_map(|mode| {
                ExamLevel::ALL
                    .into_iter()
                    .map(move |level| (level, mode, Self::new(level, mode)))
            })
            .collect()
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Namespace {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve raw user selections into a namespace.
///
/// Fails with [`RagError::UnknownSelection`] when either value is outside its
/// enumeration; there is no fallback partition.
#[inline]
pub fn resolve_namespace(level: &str, mode: &str) -> Result<Namespace> {
    let level = level.parse::<ExamLevel>()?;
    let mode = mode.parse::<StudyMode>()?;
    Ok(Namespace::new(level, mode))
}
