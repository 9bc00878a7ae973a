//! Dice formulas like `1d20+5`, `2d6-1`, `d100`.
//!
//! The narrative layer asks for rolls in formula form; the orchestrator
//! expands a formula into one committed roll per die.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest number of dice accepted in one formula.
pub const MAX_DICE: u32 = 100;

/// Error when parsing a dice formula.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceParseError {
    /// The formula string is empty.
    #[error("empty dice formula")]
    Empty,
    /// Not of the form `XdY`, `XdY+Z` or `XdY-Z`.
    #[error("invalid dice format: {0}")]
    InvalidFormat(String),
    /// Dice count outside `1..=MAX_DICE`.
    #[error("dice count must be between 1 and {MAX_DICE}")]
    InvalidDiceCount,
    /// Die size must be at least 1.
    #[error("die size must be at least 1")]
    InvalidDieSize,
}

/// A parsed dice formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceFormula {
    /// Number of dice (X in XdY).
    pub count: u32,
    /// Sides per die (Y in XdY).
    pub sides: u32,
    /// Flat modifier added to the sum.
    pub modifier: i32,
}

impl DiceFormula {
    /// Build a validated formula.
    pub fn new(count: u32, sides: u32, modifier: i32) -> Result<Self, DiceParseError> {
        if count == 0 || count > MAX_DICE {
            return Err(DiceParseError::InvalidDiceCount);
        }
        if sides == 0 {
            return Err(DiceParseError::InvalidDieSize);
        }
        Ok(Self {
            count,
            sides,
            modifier,
        })
    }

    /// Single d20 with a modifier.
    pub fn d20(modifier: i32) -> Self {
        Self {
            count: 1,
            sides: 20,
            modifier,
        }
    }

    /// Parse `XdY`, `XdY+Z`, `XdY-Z` or `dY`.
    pub fn parse(input: &str) -> Result<Self, DiceParseError> {
        let input: String = input
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        if input.is_empty() {
            return Err(DiceParseError::Empty);
        }

        let (count_str, rest) = input
            .split_once('d')
            .ok_or_else(|| DiceParseError::InvalidFormat(input.clone()))?;

        let count = if count_str.is_empty() {
            1
        } else {
            count_str
                .parse::<u32>()
                .map_err(|_| DiceParseError::InvalidFormat(input.clone()))?
        };

        let (sides_str, modifier) = match rest.find(['+', '-']) {
            Some(pos) => {
                let (sides, signed) = rest.split_at(pos);
                let magnitude: i32 = signed[1..]
                    .parse()
                    .map_err(|_| DiceParseError::InvalidFormat(input.clone()))?;
                let modifier = if signed.starts_with('-') {
                    -magnitude
                } else {
                    magnitude
                };
                (sides, modifier)
            }
            None => (rest, 0),
        };

        let sides = sides_str
            .parse::<u32>()
            .map_err(|_| DiceParseError::InvalidFormat(input.clone()))?;

        Self::new(count, sides, modifier)
    }

    /// Lowest achievable total.
    pub fn min_total(&self) -> i64 {
        self.count as i64 + self.modifier as i64
    }

    /// Highest achievable total.
    pub fn max_total(&self) -> i64 {
        self.count as i64 * self.sides as i64 + self.modifier as i64
    }
}

impl FromStr for DiceFormula {
    type Err = DiceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DiceFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}
