//! Dice scoring.
//!
//! The reducer never hard-codes combination rules; it asks a [`Scorer`].
//! [`ThousandScorer`] implements the usual "Thousand" table:
//!
//! | Combination            | Score          |
//! |------------------------|----------------|
//! | 1-2-3-4-5              | 125            |
//! | 2-3-4-5-6              | 250            |
//! | three of a kind        | 100 for ones, face × 10 otherwise |
//! | four of a kind         | three × 2      |
//! | five of a kind         | three × 10     |
//! | single 1               | 10             |
//! | single 5               | 5              |

use super::player::{Player, ScoreEntry, SlotId};

/// Number of dice in a full roll.
pub const DICE_COUNT: usize = 5;

/// Dice that score together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringGroup {
    pub faces: Vec<u8>,
    pub score: i32,
}

/// Result of validating a set of dice a player wants to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub is_valid: bool,
    pub score: i32,
}

impl Selection {
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn valid(score: i32) -> Self {
        Self {
            is_valid: true,
            score,
        }
    }
}

/// Score bands that freeze progress until cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrelBand {
    /// 200–299
    Low,
    /// 700–799
    High,
}

impl BarrelBand {
    /// Band containing `total`, if any.
    pub fn for_total(total: i32) -> Option<Self> {
        match total {
            200..=299 => Some(Self::Low),
            700..=799 => Some(Self::High),
            _ => None,
        }
    }

    /// Total a player is pushed back to when forced off the barrel.
    pub fn forfeit_target(&self) -> i32 {
        match self {
            Self::Low => 150,
            Self::High => 650,
        }
    }

    /// Total a banked turn must reach to get off the barrel.
    pub fn clearing_total(&self) -> i32 {
        match self {
            Self::Low => 300,
            Self::High => 800,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "200-300",
            Self::High => "700-800",
        }
    }
}

/// Pure scoring rules consumed by the reducer.
///
/// Only the combination rules are required; the remaining lookups have
/// defaults every rule set so far shares.
pub trait Scorer {
    /// Every scoring group present in a roll.
    fn analyze_dice(&self, faces: &[u8]) -> Vec<ScoringGroup>;

    /// Whether `faces` may be kept as a whole, and for how much.
    fn validate_selection(&self, faces: &[u8]) -> Selection;

    /// Sum of a player's score sheet.
    fn total_score(&self, player: &Player) -> i32 {
        player.scores.iter().map(ScoreEntry::points).sum()
    }

    fn barrel_status(&self, player: &Player) -> Option<BarrelBand> {
        BarrelBand::for_total(self.total_score(player))
    }

    /// First slot able to hold host authority.
    fn find_next_host(&self, players: &[Player]) -> Option<SlotId> {
        players
            .iter()
            .find(|p| p.is_active() && p.status.can_host())
            .map(|p| p.slot_id)
    }
}

/// Standard "Thousand" rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThousandScorer;

impl ThousandScorer {
    fn straight(faces: &[u8]) -> Option<i32> {
        if faces.len() != DICE_COUNT {
            return None;
        }
        let mut sorted = faces.to_vec();
        sorted.sort_unstable();
        match sorted.as_slice() {
            [1, 2, 3, 4, 5] => Some(125),
            [2, 3, 4, 5, 6] => Some(250),
            _ => None,
        }
    }

    fn of_a_kind(face: u8, count: usize) -> i32 {
        let base = if face == 1 { 100 } else { i32::from(face) * 10 };
        match count {
            3 => base,
            4 => base * 2,
            _ => base * 10,
        }
    }
}

impl Scorer for ThousandScorer {
    fn analyze_dice(&self, faces: &[u8]) -> Vec<ScoringGroup> {
        if let Some(score) = Self::straight(faces) {
            return vec![ScoringGroup {
                faces: faces.to_vec(),
                score,
            }];
        }

        let mut counts = [0usize; 7];
        for &f in faces {
            if (1..=6).contains(&f) {
                counts[usize::from(f)] += 1;
            }
        }

        let mut groups = Vec::new();
        for face in 1..=6u8 {
            let count = counts[usize::from(face)];
            let score = match (face, count) {
                (_, 0) => continue,
                (_, c) if c >= 3 => Self::of_a_kind(face, c),
                (1, c) => 10 * c as i32,
                (5, c) => 5 * c as i32,
                _ => continue,
            };
            groups.push(ScoringGroup {
                faces: vec![face; count],
                score,
            });
        }
        groups
    }

    fn validate_selection(&self, faces: &[u8]) -> Selection {
        if faces.is_empty() {
            return Selection::invalid();
        }
        let groups = self.analyze_dice(faces);
        let covered: usize = groups.iter().map(|g| g.faces.len()).sum();
        if covered != faces.len() {
            return Selection::invalid();
        }
        Selection::valid(groups.iter().map(|g| g.score).sum())
    }
}
