// pum_command.rs — Compiled in-memory compute commands
//
// A command applies to every bitline inside `bitline_mask` of every tile
// inside `tile_mask`. Both masks are boxes: bitline masks in tile-local
// element coordinates, tile masks in tile coordinates. Inter-array moves
// carry their destination through `tile_dist` (plus `reuse` multicast), and
// after bank mapping each command knows which banks execute it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::affine::Rect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Min,
    Max,
}

impl fmt::Display for ComputeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComputeOp::Add => "add",
            ComputeOp::Sub => "sub",
            ComputeOp::Mul => "mul",
            ComputeOp::And => "and",
            ComputeOp::Or => "or",
            ComputeOp::Xor => "xor",
            ComputeOp::Min => "min",
            ComputeOp::Max => "max",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Shift bitlines inside each array.
    IntraArray { bitline_dist: i64 },
    /// Copy bitlines to the array `tile_dist` tiles away.
    InterArray { tile_dist: i64 },
    Compute { op: ComputeOp, reduce: bool },
    Sync,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::IntraArray { .. } => "intra-array",
            CommandKind::InterArray { .. } => "inter-array",
            CommandKind::Compute { .. } => "cmp",
            CommandKind::Sync => "sync",
        }
    }
}

/// Only every `stride`-th element (offset `modulo`) along `dim` is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrideMask {
    pub dim: usize,
    pub stride: i64,
    pub modulo: i64,
}

/// Multicast: the move repeats `count` times, one tile further along `dim`
/// each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdReuse {
    pub dim: usize,
    pub count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileMove {
    pub src_tile: u64,
    pub dst_tile: u64,
    pub dst_bank: u64,
    /// Leaves the source bank: a network transfer followed by a local
    /// write at the destination bank.
    pub network: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankSplit {
    pub bank: u64,
    pub tiles: Vec<u64>,
    pub moves: Vec<TileMove>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumCommand {
    pub kind: CommandKind,
    pub wordline_bits: u32,
    pub bitline_mask: Rect,
    pub tile_mask: Rect,
    pub reuse: Option<CmdReuse>,
    pub stride_masks: Vec<StrideMask>,
    pub bank_splits: Vec<BankSplit>,
}

impl PumCommand {
    fn with_kind(kind: CommandKind, bitline_mask: Rect, tile_mask: Rect) -> Self {
        Self {
            kind,
            wordline_bits: 0,
            bitline_mask,
            tile_mask,
            reuse: None,
            stride_masks: Vec::new(),
            bank_splits: Vec::new(),
        }
    }

    pub fn intra_array(bitline_mask: Rect, tile_mask: Rect, bitline_dist: i64) -> Self {
        Self::with_kind(CommandKind::IntraArray { bitline_dist }, bitline_mask, tile_mask)
    }

    pub fn inter_array(bitline_mask: Rect, tile_mask: Rect, tile_dist: i64) -> Self {
        Self::with_kind(CommandKind::InterArray { tile_dist }, bitline_mask, tile_mask)
    }

    pub fn compute(op: ComputeOp, reduce: bool, bitline_mask: Rect, tile_mask: Rect) -> Self {
        Self::with_kind(CommandKind::Compute { op, reduce }, bitline_mask, tile_mask)
    }

    pub fn sync() -> Self {
        Self::with_kind(CommandKind::Sync, Rect::new(vec![], vec![]), Rect::new(vec![], vec![]))
    }

    pub fn is_empty(&self) -> bool {
        match self.kind {
            CommandKind::Sync => false,
            _ => self.bitline_mask.is_empty() || self.tile_mask.is_empty(),
        }
    }

    pub fn has_reuse(&self) -> bool {
        self.reuse.map_or(false, |r| r.count > 1)
    }

    pub fn is_inter_bank(&self) -> bool {
        self.bank_splits.iter().any(|s| s.moves.iter().any(|m| m.network))
    }
}

impl fmt::Display for PumCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[PUMCmd {} WD-{}]", self.kind.name(), self.wordline_bits)?;
        if matches!(self.kind, CommandKind::Sync) {
            return Ok(());
        }
        if let Some(reuse) = &self.reuse {
            writeln!(f, "  Reuse          {} x{}", reuse.dim, reuse.count)?;
        }
        for m in &self.stride_masks {
            writeln!(f, "  StrideMask     {} x{} %{}", m.dim, m.stride, m.modulo)?;
        }
        writeln!(f, "  BitlineMask    {}", self.bitline_mask)?;
        writeln!(f, "  TileMask       {}", self.tile_mask)?;
        match &self.kind {
            CommandKind::IntraArray { bitline_dist } => writeln!(f, "  BitlineDist    {}", bitline_dist)?,
            CommandKind::InterArray { tile_dist } => writeln!(f, "  TileDist       {}", tile_dist)?,
            CommandKind::Compute { op, reduce } => {
                writeln!(f, "  Op {}{}", op, if *reduce { " [Reduce]" } else { "" })?
            }
            CommandKind::Sync => {}
        }
        for split in &self.bank_splits {
            write!(f, "    LLCCmd {:>2} tiles", split.bank)?;
            for t in &split.tiles {
                write!(f, " {}", t)?;
            }
            writeln!(f)?;
            for m in &split.moves {
                writeln!(
                    f,
                    "      {} -> {} bank {}{}",
                    m.src_tile,
                    m.dst_tile,
                    m.dst_bank,
                    if m.network { " network" } else { "" }
                )?;
            }
        }
        Ok(())
    }
}

/// Render a command list, one block per command.
pub fn format_commands(commands: &[PumCommand]) -> String {
    commands.iter().map(|c| c.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_intra() {
        let mut cmd = PumCommand::intra_array(
            Rect::new(vec![0], vec![3]),
            Rect::new(vec![0], vec![2]),
            1,
        );
        cmd.wordline_bits = 32;
        cmd.bank_splits.push(BankSplit {
            bank: 0,
            tiles: vec![0, 1],
            moves: vec![],
        });
        assert_eq!(
            cmd.to_string(),
            "[PUMCmd intra-array WD-32]\n  BitlineMask    [0,3)\n  TileMask       [0,2)\n  BitlineDist    1\n    LLCCmd  0 tiles 0 1\n"
        );
    }

    #[test]
    fn empty_masks() {
        let cmd = PumCommand::inter_array(Rect::new(vec![2], vec![2]), Rect::new(vec![0], vec![4]), 1);
        assert!(cmd.is_empty());
        assert!(!PumCommand::sync().is_empty());
        assert_eq!(PumCommand::sync().to_string(), "[PUMCmd sync WD-0]\n");
    }

    #[test]
    fn op_names_round_trip_serde() {
        let op: ComputeOp = serde_json::from_str("\"mul\"").unwrap();
        assert_eq!(op, ComputeOp::Mul);
        assert_eq!(op.to_string(), "mul");
    }
}
