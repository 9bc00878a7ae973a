//! Rule Validation
//!
//! One closed variant per rule category, matched exhaustively. Adding a
//! category is a compile-time-checked change rather than a string switch.
//! Numbers follow fifth-edition conventions.

use serde::{Deserialize, Serialize};

/// Standard array of ability scores.
pub const STANDARD_ARRAY: [u8; 6] = [15, 14, 13, 12, 10, 8];

/// Point-buy budget.
pub const POINT_BUY_BUDGET: u32 = 27;

/// Highest character level.
pub const MAX_LEVEL: u8 = 20;

/// How ability scores were generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbilityMethod {
    /// Fixed standard array, any order.
    StandardArray,
    /// 27-point buy, scores 8..=15.
    PointBuy,
    /// Rolled, scores 3..=18.
    Rolled,
}

/// A rules question to validate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RuleCheck {
    /// New character basics.
    CharacterCreation {
        /// Character name.
        name: String,
        /// Starting level.
        level: u8,
        /// Class name.
        class: String,
    },
    /// Ability score assignment.
    AbilityScores {
        /// STR, DEX, CON, INT, WIS, CHA.
        scores: [u8; 6],
        /// Generation method.
        method: AbilityMethod,
    },
    /// Attack roll against armor class.
    Combat {
        /// Natural d20 value.
        natural: u32,
        /// Total attack bonus.
        attack_bonus: i32,
        /// Target armor class.
        armor_class: i32,
    },
    /// Casting a leveled spell.
    Spellcasting {
        /// Slot level used.
        slot_level: u8,
        /// Remaining slots at that level.
        slots_remaining: u8,
        /// Highest slot level the caster has.
        max_slot_level: u8,
    },
}

/// Outcome of a combat check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitResult {
    /// Natural 1.
    CriticalMiss,
    /// Total below AC.
    Miss,
    /// Total at or above AC.
    Hit,
    /// Natural 20.
    CriticalHit,
}

/// Validation verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleVerdict {
    /// Everything checks out.
    Valid,
    /// Combat resolved.
    Attack(HitResult),
    /// One or more problems.
    Invalid(Vec<String>),
}

impl RuleVerdict {
    /// Whether the check passed (a miss is still a valid attack).
    pub fn is_valid(&self) -> bool {
        !matches!(self, RuleVerdict::Invalid(_))
    }
}

/// Number a roll must reach.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RollTarget {
    /// Difficulty class of a check or save; met when the total reaches it.
    Dc(i32),
    /// Armor class of an attack; natural 1 and 20 decide on their own.
    ArmorClass(i32),
}

impl RollTarget {
    /// Whether a roll of `natural` plus `modifier` meets the target.
    pub fn is_met(self, natural: u32, modifier: i32) -> bool {
        let total = i64::from(natural) + i64::from(modifier);
        match self {
            RollTarget::Dc(dc) => total >= i64::from(dc),
            RollTarget::ArmorClass(armor_class) => {
                let check = RuleCheck::Combat {
                    natural,
                    attack_bonus: modifier,
                    armor_class,
                };
                match check.validate() {
                    RuleVerdict::Attack(HitResult::Hit | HitResult::CriticalHit) => true,
                    RuleVerdict::Attack(HitResult::Miss | HitResult::CriticalMiss) => false,
                    // Not a d20: plain comparison.
                    _ => total >= i64::from(armor_class),
                }
            }
        }
    }
}

/// Point-buy cost of one score, `None` if outside 8..=15.
pub fn point_buy_cost(score: u8) -> Option<u32> {
    match score {
        8..=13 => Some(score as u32 - 8),
        14 => Some(7),
        15 => Some(9),
        _ => None,
    }
}

impl RuleCheck {
    /// Validate this check.
    pub fn validate(&self) -> RuleVerdict {
        match self {
            RuleCheck::CharacterCreation { name, level, class } => {
                let mut problems = Vec::new();
                if name.trim().is_empty() {
                    problems.push("character needs a name".to_owned());
                }
                if class.trim().is_empty() {
                    problems.push("character needs a class".to_owned());
                }
                if !(1..=MAX_LEVEL).contains(level) {
                    problems.push(format!("level {level} outside 1..={MAX_LEVEL}"));
                }
                verdict(problems)
            }
            RuleCheck::AbilityScores { scores, method } => {
                verdict(validate_scores(scores, *method))
            }
            RuleCheck::Combat {
                natural,
                attack_bonus,
                armor_class,
            } => {
                if !(1..=20).contains(natural) {
                    return RuleVerdict::Invalid(vec![format!("natural roll {natural} is not a d20 face")]);
                }
                let result = match natural {
                    1 => HitResult::CriticalMiss,
                    20 => HitResult::CriticalHit,
                    n if *n as i32 + attack_bonus >= *armor_class => HitResult::Hit,
                    _ => HitResult::Miss,
                };
                RuleVerdict::Attack(result)
            }
            RuleCheck::Spellcasting {
                slot_level,
                slots_remaining,
                max_slot_level,
            } => {
                let mut problems = Vec::new();
                if *slot_level == 0 || *slot_level > 9 {
                    problems.push(format!("slot level {slot_level} does not exist"));
                } else if slot_level > max_slot_level {
                    problems.push(format!("caster cannot use level {slot_level} slots"));
                } else if *slots_remaining == 0 {
                    problems.push(format!("no level {slot_level} slots remaining"));
                }
                verdict(problems)
            }
        }
    }
}

fn validate_scores(scores: &[u8; 6], method: AbilityMethod) -> Vec<String> {
    match method {
        AbilityMethod::StandardArray => {
            let mut sorted = *scores;
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            if sorted == STANDARD_ARRAY {
                Vec::new()
            } else {
                vec!["scores are not a permutation of the standard array".to_owned()]
            }
        }
        AbilityMethod::PointBuy => {
            let mut problems = Vec::new();
            let mut total = 0;
            for score in scores {
                match point_buy_cost(*score) {
                    Some(cost) => total += cost,
                    None => problems.push(format!("score {score} outside point-buy range 8..=15")),
                }
            }
            if problems.is_empty() && total > POINT_BUY_BUDGET {
                problems.push(format!("point buy spends {total} of {POINT_BUY_BUDGET} points"));
            }
            problems
        }
        AbilityMethod::Rolled => scores
            .iter()
            .filter(|s| !(3..=18).contains(*s))
            .map(|s| format!("rolled score {s} outside 3..=18"))
            .collect(),
    }
}

fn verdict(problems: Vec<String>) -> RuleVerdict {
    if problems.is_empty() {
        RuleVerdict::Valid
    } else {
        RuleVerdict::Invalid(problems)
    }
}
