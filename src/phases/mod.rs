//! The four phases of the tiled shortest-path computation
//!
//! 1. [`load`]: validate the cost grid, split it into interior stream + boundary store
//! 2. [`substitute`]: per-tile b2b and s2b distances
//! 3. [`inter_tile`]: global Dijkstra over boundary points only
//! 4. [`final_pass`]: per-tile propagation of resolved boundary distances to interiors
//!
//! Each phase reads its inputs from the work directory and writes its outputs there, so
//! consecutive phases may run in separate invocations.

pub mod final_pass;
pub mod inter_tile;
pub mod load;
pub mod substitute;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::boundary::BoundaryIndex;
use crate::core::{Error, TilePlan};
use crate::dijkstra::TravMult;
use crate::pqueue::PriorityQueue;

/// Progress callback: `(done, total)` in phase-specific units
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Load,
    Substitute,
    InterTile,
    Final,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Load, Phase::Substitute, Phase::InterTile, Phase::Final];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Load => "load",
            Phase::Substitute => "substitute",
            Phase::InterTile => "inter-tile",
            Phase::Final => "final",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Phase::Load => RunMode::LOAD.0,
            Phase::Substitute => RunMode::SUBSTITUTE.0,
            Phase::InterTile => RunMode::INTER_TILE.0,
            Phase::Final => RunMode::FINAL.0,
        }
    }

    /// Phase whose outputs this one consumes
    pub fn prerequisite(self) -> Option<Phase> {
        match self {
            Phase::Load => None,
            Phase::Substitute => Some(Phase::Load),
            Phase::InterTile => Some(Phase::Substitute),
            Phase::Final => Some(Phase::InterTile),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of phases to execute in one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMode(u8);

impl RunMode {
    pub const LOAD: RunMode = RunMode(1);
    pub const SUBSTITUTE: RunMode = RunMode(2);
    pub const INTER_TILE: RunMode = RunMode(4);
    pub const FINAL: RunMode = RunMode(8);
    pub const ALL: RunMode = RunMode(15);

    pub fn from_bits(bits: u8) -> Option<Self> {
        (bits != 0 && bits & !Self::ALL.0 == 0).then_some(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, phase: Phase) -> bool {
        self.0 & phase.bit() != 0
    }

    /// Selected phases in execution order
    pub fn phases(self) -> impl Iterator<Item = Phase> {
        Phase::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

impl Default for RunMode {
    fn default() -> Self {
        Self::ALL
    }
}

impl From<Phase> for RunMode {
    fn from(phase: Phase) -> Self {
        RunMode(phase.bit())
    }
}

impl std::ops::BitOr for RunMode {
    type Output = RunMode;

    fn bitor(self, rhs: Self) -> Self {
        RunMode(self.0 | rhs.0)
    }
}

impl FromStr for RunMode {
    type Err = Error;

    /// `all`, a bitmask (`1`..`15`), or a comma list such as `load,substitute`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::ALL);
        }
        if let Ok(bits) = s.parse::<u8>() {
            return Self::from_bits(bits)
                .ok_or_else(|| Error::InvalidConfig(format!("run mode bitmask {bits} out of range 1..=15")));
        }
        let mut bits = 0u8;
        for part in s.split(',') {
            let phase = match part.trim().to_ascii_lowercase().as_str() {
                "load" => Phase::Load,
                "substitute" | "sub" => Phase::Substitute,
                "inter-tile" | "inter_tile" | "intertile" => Phase::InterTile,
                "final" => Phase::Final,
                other => {
                    return Err(Error::InvalidConfig(format!("unknown phase '{other}'")));
                }
            };
            bits |= phase.bit();
        }
        Ok(Self(bits))
    }
}

/// Everything a phase needs besides its own inputs
pub struct PhaseContext<'a> {
    pub plan: &'a TilePlan,
    pub index: &'a BoundaryIndex,
    pub trav: TravMult,
    pub work_dir: &'a Path,
    pub max_queue_entries: Option<usize>,
    pub progress: Option<&'a ProgressCallback>,
}

impl PhaseContext<'_> {
    pub fn report(&self, done: u64, total: u64) {
        if let Some(cb) = self.progress {
            cb(done, total);
        }
    }

    /// Queue sized for one tile's frontier
    pub fn tile_queue(&self) -> PriorityQueue {
        let l = &self.plan.layout;
        PriorityQueue::new(
            (l.tile_rows as usize + l.tile_cols as usize) * 4,
            self.max_queue_entries,
        )
    }
}
