// dep_graph.rs — Stream configurations and the edges between them
//
// Configs live in an arena keyed by `ConfigId`; edges name their peer by id
// instead of holding a pointer, so base/dependent relations never form an
// ownership cycle. Strand configs produced by `split_into_strands` point back
// at their stream config the same way.
//
// Preconditions: edge endpoints are live configs.
// Postconditions: every stored edge has reuse > 0, skip >= 0, and not both
//   reuse > 1 and skip > 0.
// Failure modes: illegal edges and dangling ids are fatal. Splitting
//   reports `PatternError` for patterns it cannot split.
// Side effects: none beyond the arena.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::addr_gen::{gen_addr, is_continuous, AddrGen, LinearPattern};
use crate::affine::AffinePattern;
use crate::error::{GraphError, PatternError};
use crate::fatal;
use crate::id::{ConfigId, DynStrandId, DynStreamId};
use crate::strand::{StrandElemIdx, StrandSplit};
use crate::value::{unreachable_resolver, FormalParam};

/// Strand split used when a group of streams is split without an explicit
/// descriptor: 1kB runs of 64B elements over 64 strands.
pub const DEFAULT_STRAND_INTERLEAVE: u64 = 16;
pub const DEFAULT_TOTAL_STRANDS: u32 = 64;

// ── Float plan ───────────────────────────────────────────────────────────

/// Where a floated element executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MachineType {
    L2,
    L3,
    Mem,
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineType::L2 => write!(f, "L2"),
            MachineType::L3 => write!(f, "L3"),
            MachineType::Mem => write!(f, "Mem"),
        }
    }
}

/// Element index → machine change points. Elements before the first change
/// point are not floated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FloatPlan {
    changes: Vec<(u64, MachineType)>,
}

impl FloatPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Float to `machine` from `elem_idx` onward. Change points must be
    /// added in increasing element order.
    pub fn add_change(&mut self, elem_idx: u64, machine: MachineType) {
        if let Some(&(last, _)) = self.changes.last() {
            if elem_idx <= last {
                fatal!(
                    "float plan change at {} not after previous change at {}",
                    elem_idx,
                    last
                );
            }
        }
        self.changes.push((elem_idx, machine));
    }

    pub fn floated_at(elem_idx: u64, machine: MachineType) -> Self {
        let mut plan = Self::new();
        plan.add_change(elem_idx, machine);
        plan
    }

    pub fn is_floated(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn is_floated_to_mem(&self) -> bool {
        self.changes.iter().any(|&(_, m)| m == MachineType::Mem)
    }

    pub fn first_float_elem(&self) -> Option<u64> {
        self.changes.first().map(|&(idx, _)| idx)
    }

    pub fn machine_at(&self, elem_idx: u64) -> Option<MachineType> {
        self.changes
            .iter()
            .take_while(|&&(idx, _)| idx <= elem_idx)
            .last()
            .map(|&(_, m)| m)
    }
}

// ── Reuse and edges ──────────────────────────────────────────────────────

/// Each base element is reused by `count` consecutive dependent elements,
/// in groups of `tile` (tile 1 is plain repetition).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReuseInfo {
    pub count: u64,
    pub tile: u64,
}

impl Default for ReuseInfo {
    fn default() -> Self {
        Self { count: 1, tile: 1 }
    }
}

impl ReuseInfo {
    pub fn new(count: u64) -> Self {
        Self { count, tile: 1 }
    }

    pub fn tiled(count: u64, tile: u64) -> Self {
        assert!(tile > 0, "zero reuse tile");
        Self { count, tile }
    }

    pub fn total_reuse(&self) -> u64 {
        self.count
    }

    pub fn has_reuse(&self) -> bool {
        self.count > 1
    }

    pub fn base_to_dep(&self, base_idx: u64) -> u64 {
        (base_idx / self.tile) * (self.tile * self.count) + base_idx % self.tile
    }

    pub fn dep_to_base(&self, dep_idx: u64) -> u64 {
        (dep_idx / (self.tile * self.count)) * self.tile + dep_idx % self.tile
    }
}

impl fmt::Display for ReuseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tile == 1 {
            write!(f, "R{}", self.count)
        } else {
            write!(f, "R{}x{}", self.count, self.tile)
        }
    }
}

pub fn convert_base_to_dep_elem_idx(base_idx: u64, reuse: &ReuseInfo, skip: u64) -> u64 {
    if reuse.has_reuse() {
        debug_assert_eq!(skip, 0);
        return reuse.base_to_dep(base_idx);
    }
    if skip != 0 {
        return base_idx / skip;
    }
    base_idx
}

pub fn convert_dep_to_base_elem_idx(dep_idx: u64, reuse: &ReuseInfo, skip: u64) -> u64 {
    if reuse.has_reuse() {
        debug_assert_eq!(skip, 0);
        return reuse.dep_to_base(dep_idx);
    }
    if skip != 0 {
        return dep_idx * skip;
    }
    dep_idx
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    BaseOn,
    UsedBy,
    SendTo,
    PumSendTo,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeKind::BaseOn => "BaseOn",
            EdgeKind::UsedBy => "UsedBy",
            EdgeKind::SendTo => "SendTo",
            EdgeKind::PumSendTo => "PUMSendTo",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predicate {
    pub func_id: i32,
    pub value: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumSendPatterns {
    pub broadcast: AffinePattern,
    pub recv: AffinePattern,
    pub recv_tile: AffinePattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub kind: EdgeKind,
    pub peer: ConfigId,
    pub peer_stream: DynStrandId,
    pub reuse: ReuseInfo,
    pub skip: u64,
    /// Base edge mirrored from the base's `UsedBy` edge.
    pub is_used_by: bool,
    pub pred: Option<Predicate>,
    pub pum: Option<Box<PumSendPatterns>>,
}

impl Edge {
    pub fn base_to_dep(&self, base_idx: u64) -> u64 {
        convert_base_to_dep_elem_idx(base_idx, &self.reuse, self.skip)
    }

    pub fn dep_to_base(&self, dep_idx: u64) -> u64 {
        convert_dep_to_base_elem_idx(dep_idx, &self.reuse, self.skip)
    }
}

// ── Stream config ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub id: DynStreamId,
    pub strand_idx: u32,
    pub total_strands: u32,
    /// Set on strand configs: the stream config they were split from.
    pub stream_config: Option<ConfigId>,
    pub elem_size: u64,
    pub formal: Vec<FormalParam>,
    pub addr_gen: Rc<dyn AddrGen>,
    pub total_trip: Option<u64>,
    pub inner_trip: Option<u64>,
    pub loop_level: u32,
    pub is_pointer_chase: bool,
    pub is_one_iter_behind: bool,
    pub strand_split: Option<StrandSplit>,
    pub float_plan: FloatPlan,
    pub base_edges: Vec<Edge>,
    pub dep_edges: Vec<Edge>,
    refs: u32,
    ended: bool,
}

impl StreamConfig {
    pub fn new(id: DynStreamId, elem_size: u64, formal: Vec<FormalParam>, addr_gen: Rc<dyn AddrGen>) -> Self {
        Self {
            id,
            strand_idx: 0,
            total_strands: 1,
            stream_config: None,
            elem_size,
            formal,
            addr_gen,
            total_trip: None,
            inner_trip: None,
            loop_level: 0,
            is_pointer_chase: false,
            is_one_iter_behind: false,
            strand_split: None,
            float_plan: FloatPlan::new(),
            base_edges: Vec::new(),
            dep_edges: Vec::new(),
            refs: 0,
            ended: false,
        }
    }

    pub fn with_total_trip(mut self, trip: u64) -> Self {
        self.total_trip = Some(trip);
        self
    }

    pub fn with_float_plan(mut self, plan: FloatPlan) -> Self {
        self.float_plan = plan;
        self
    }

    pub fn with_loop_level(mut self, level: u32) -> Self {
        self.loop_level = level;
        self
    }

    /// Identity of the strand this config describes. A stream config keeps
    /// its unsplit identity even after strands were split off it.
    pub fn strand_id(&self) -> DynStrandId {
        if self.is_strand_config() {
            DynStrandId::new(self.id, self.strand_idx, self.total_strands)
        } else {
            DynStrandId::from(self.id)
        }
    }

    pub fn is_strand_config(&self) -> bool {
        self.stream_config.is_some()
    }

    pub fn is_split_into_strands(&self) -> bool {
        self.total_strands > 1
    }

    pub fn has_total_trip(&self) -> bool {
        self.total_trip.is_some()
    }

    pub fn ref_count(&self) -> u32 {
        self.refs
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Element address through the config's own generator. Only valid for
    /// configs whose parameters are all invariant.
    pub fn invariant_addr(&self, idx: u64) -> u64 {
        gen_addr(self.addr_gen.as_ref(), idx, &self.formal, unreachable_resolver).front()
    }
}

/// Where a forwarded value lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvTarget {
    pub strand_id: DynStrandId,
    pub strand_elem_idx: u64,
    pub vaddr: u64,
    pub machine: Option<MachineType>,
}

/// Half-open virtual address range `[lhs, rhs)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrRange {
    pub lhs: u64,
    pub rhs: u64,
}

// ── Graph ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DependenceGraph {
    configs: Vec<Option<StreamConfig>>,
    by_strand: HashMap<DynStrandId, ConfigId>,
}

impl DependenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&mut self, config: StreamConfig) -> ConfigId {
        let key = config.strand_id();
        if self.by_strand.contains_key(&key) {
            fatal!("stream {} configured twice", key);
        }
        let id = ConfigId(self.configs.len() as u32);
        debug!(stream = %key, elem_size = config.elem_size, "configure stream");
        self.by_strand.insert(key, id);
        self.configs.push(Some(config));
        id
    }

    pub fn get(&self, id: ConfigId) -> &StreamConfig {
        match self.configs.get(id.0 as usize) {
            Some(Some(c)) => c,
            _ => fatal!("config {:?} is not live", id),
        }
    }

    pub fn get_mut(&mut self, id: ConfigId) -> &mut StreamConfig {
        match self.configs.get_mut(id.0 as usize) {
            Some(Some(c)) => c,
            _ => fatal!("config {:?} is not live", id),
        }
    }

    pub fn contains(&self, id: ConfigId) -> bool {
        matches!(self.configs.get(id.0 as usize), Some(Some(_)))
    }

    pub fn lookup(&self, stream: &DynStreamId) -> Result<ConfigId, GraphError> {
        self.lookup_strand(&DynStrandId::from(*stream))
    }

    pub fn lookup_strand(&self, strand: &DynStrandId) -> Result<ConfigId, GraphError> {
        self.by_strand
            .get(strand)
            .copied()
            .ok_or(GraphError::UnknownStream(strand.stream))
    }

    pub fn live_configs(&self) -> usize {
        self.configs.iter().filter(|c| c.is_some()).count()
    }

    // ── Edges ────────────────────────────────────────────────────────────

    fn validate_edge(&self, kind: EdgeKind, from: ConfigId, to: ConfigId, reuse: &ReuseInfo, skip: i64) -> u64 {
        let illegal = reuse.total_reuse() == 0 || skip < 0 || (reuse.has_reuse() && skip > 0);
        if illegal {
            fatal!(
                "illegal {} edge reuse {} skip {}: {} -> {}",
                kind,
                reuse,
                skip,
                self.get(from).strand_id(),
                self.get(to).strand_id()
            );
        }
        skip as u64
    }

    fn make_edge(&self, kind: EdgeKind, peer: ConfigId, reuse: ReuseInfo, skip: u64) -> Edge {
        Edge {
            kind,
            peer,
            peer_stream: self.get(peer).strand_id(),
            reuse,
            skip,
            is_used_by: false,
            pred: None,
            pum: None,
        }
    }

    /// `this` computes its address from `base`'s value.
    pub fn add_base_on(&mut self, this: ConfigId, base: ConfigId, reuse: ReuseInfo, skip: i64) {
        let skip = self.validate_edge(EdgeKind::BaseOn, this, base, &reuse, skip);
        let edge = self.make_edge(EdgeKind::BaseOn, base, reuse, skip);
        trace!(this = %self.get(this).id, base = %edge.peer_stream, "add BaseOn");
        self.get_mut(this).base_edges.push(edge);
    }

    /// `base` feeds `dep` as an indirect stream. Mirrored as a BaseOn edge on
    /// `dep` that carries the optional predicate.
    pub fn add_used_by(&mut self, base: ConfigId, dep: ConfigId, reuse: ReuseInfo, pred: Option<Predicate>) {
        self.validate_edge(EdgeKind::UsedBy, base, dep, &reuse, 0);
        let forward = self.make_edge(EdgeKind::UsedBy, dep, reuse, 0);
        let mut backward = self.make_edge(EdgeKind::BaseOn, base, reuse, 0);
        backward.is_used_by = true;
        backward.pred = pred;
        self.get_mut(base).dep_edges.push(forward);
        self.get_mut(dep).base_edges.push(backward);
    }

    /// `this` is predicated on `base`'s value through `func_id`.
    pub fn add_pred_by(
        &mut self,
        this: ConfigId,
        base: ConfigId,
        reuse: ReuseInfo,
        skip: i64,
        func_id: i32,
        value: bool,
    ) {
        let skip = self.validate_edge(EdgeKind::BaseOn, this, base, &reuse, skip);
        let mut edge = self.make_edge(EdgeKind::BaseOn, base, reuse, skip);
        edge.pred = Some(Predicate { func_id, value });
        self.get_mut(this).base_edges.push(edge);
    }

    /// `sender` forwards values to `recv`. A repeated edge must agree with
    /// the existing one.
    pub fn add_send_to(&mut self, sender: ConfigId, recv: ConfigId, reuse: ReuseInfo, skip: i64) {
        let skip = self.validate_edge(EdgeKind::SendTo, sender, recv, &reuse, skip);
        if let Some(existing) = self
            .get(sender)
            .dep_edges
            .iter()
            .find(|e| e.kind == EdgeKind::SendTo && e.peer == recv)
        {
            if existing.reuse != reuse || existing.skip != skip {
                fatal!(
                    "mismatched SendTo {} -> {}: existing {}/{} new {}/{}",
                    self.get(sender).strand_id(),
                    existing.peer_stream,
                    existing.reuse,
                    existing.skip,
                    reuse,
                    skip
                );
            }
            return;
        }
        let edge = self.make_edge(EdgeKind::SendTo, recv, reuse, skip);
        self.get_mut(sender).dep_edges.push(edge);
    }

    pub fn add_pum_send_to(
        &mut self,
        sender: ConfigId,
        recv: ConfigId,
        broadcast: AffinePattern,
        recv_pat: AffinePattern,
        recv_tile: AffinePattern,
    ) {
        let mut edge = self.make_edge(EdgeKind::PumSendTo, recv, ReuseInfo::default(), 0);
        edge.pum = Some(Box::new(PumSendPatterns {
            broadcast,
            recv: recv_pat,
            recv_tile,
        }));
        self.get_mut(sender).dep_edges.push(edge);
    }

    // ── Strand index translation ────────────────────────────────────────

    pub fn strand_id_from_stream_elem_idx(&self, cfg: ConfigId, stream_idx: u64) -> DynStrandId {
        let config = self.get(cfg);
        if let Some(parent) = config.stream_config {
            return self.strand_id_from_stream_elem_idx(parent, stream_idx);
        }
        match (&config.strand_split, config.total_strands) {
            (Some(split), n) if n > 1 => {
                let s = split.map_stream_to_strand(stream_idx);
                DynStrandId::new(config.id, s.strand_idx, split.total_strands())
            }
            _ => DynStrandId::from(config.id),
        }
    }

    pub fn strand_elem_idx_from_stream_elem_idx(&self, cfg: ConfigId, stream_idx: u64) -> u64 {
        let config = self.get(cfg);
        if let Some(parent) = config.stream_config {
            return self.strand_elem_idx_from_stream_elem_idx(parent, stream_idx);
        }
        match (&config.strand_split, config.total_strands) {
            (Some(split), n) if n > 1 => split.map_stream_to_strand(stream_idx).elem_idx,
            _ => stream_idx,
        }
    }

    /// Stream index of element `strand_idx` of the strand `cfg` describes.
    pub fn stream_elem_idx_from_strand_elem_idx(&self, cfg: ConfigId, strand_elem_idx: u64) -> u64 {
        let config = self.get(cfg);
        if !config.is_split_into_strands() {
            return strand_elem_idx;
        }
        if !config.is_strand_config() {
            fatal!(
                "{} is split; strand index {} needs a strand config",
                config.id,
                strand_elem_idx
            );
        }
        match &config.strand_split {
            Some(split) => split.map_strand_to_stream(StrandElemIdx::new(config.strand_idx, strand_elem_idx)),
            None => fatal!("strand config {} has no split", config.strand_id()),
        }
    }

    // ── Strand splitting ─────────────────────────────────────────────────

    /// Whether every config in the group can be split into strands.
    pub fn can_split_into_strands(&self, cfgs: &[ConfigId]) -> bool {
        cfgs.iter().all(|&cfg| {
            let c = self.get(cfg);
            let reason = if !c.has_total_trip() {
                Some("no trip count")
            } else if c.dep_edges.iter().any(|e| e.kind == EdgeKind::UsedBy) {
                Some("has indirect stream")
            } else if !c.addr_gen.is_linear() {
                Some("not linear")
            } else if !is_continuous(&c.formal, c.elem_size) {
                Some("not continuous")
            } else if c.float_plan.is_floated_to_mem() {
                Some("floated to memory")
            } else if c.float_plan.first_float_elem() != Some(0) {
                Some("delayed float")
            } else {
                None
            };
            if let Some(reason) = reason {
                debug!(stream = %c.id, reason, "cannot split into strands");
            }
            reason.is_none()
        })
    }

    /// Split a linear stream into one strand config per strand. A continuous
    /// stream is split as one flat dimension; otherwise an interleaved split
    /// runs over the outermost dimension.
    pub fn split_into_strands(&mut self, cfg: ConfigId, split: StrandSplit) -> Result<Vec<ConfigId>, PatternError> {
        let config = self.get(cfg).clone();
        let nested = LinearPattern::decode(&config.formal)?;
        let total = split.total_strands();
        if total < 2 {
            return Err(PatternError::UnsupportedSplit {
                pattern: nested.to_string(),
                reason: format!("{} strand, nothing to split", total),
            });
        }
        let continuous = is_continuous(&config.formal, config.elem_size);
        if !continuous && matches!(split, StrandSplit::ByElem { .. }) {
            return Err(PatternError::UnsupportedSplit {
                pattern: nested.to_string(),
                reason: "element split of a non-continuous pattern".into(),
            });
        }
        let pattern = nested.flatten();
        let mut patterns = Vec::with_capacity(total as usize);
        for strand in 0..total {
            let strand_pat = match &split {
                StrandSplit::Interleave { interleave, .. } if !continuous => {
                    nested.split_at_dim(nested.dims() - 1, *interleave, strand, total)?
                }
                StrandSplit::Interleave { interleave, .. } => pattern.split_1d(*interleave, total, strand)?,
                StrandSplit::ByElem { bounds } => {
                    let (lo, hi) = (bounds[strand as usize], bounds[strand as usize + 1]);
                    if lo == hi {
                        LinearPattern::one_dim(pattern.start, pattern.strides[0], 0)
                    } else {
                        pattern.split_by_elem(lo, hi)?
                    }
                }
            };
            patterns.push(strand_pat);
        }

        let stream_trip = pattern.total_trip();
        {
            let parent = self.get_mut(cfg);
            parent.strand_split = Some(split.clone());
            parent.total_strands = total;
        }
        let mut out = Vec::with_capacity(patterns.len());
        for (strand, strand_pat) in (0..total).zip(patterns) {
            let mut strand_cfg = config.clone();
            strand_cfg.strand_idx = strand;
            strand_cfg.total_strands = total;
            strand_cfg.stream_config = Some(cfg);
            strand_cfg.strand_split = Some(split.clone());
            strand_cfg.total_trip = Some(split.strand_trip_count(stream_trip, strand));
            strand_cfg.formal = strand_pat.to_params();
            strand_cfg.refs = 0;
            strand_cfg.ended = false;
            debug!(strand = %strand_cfg.strand_id(), pattern = %strand_pat, "split strand");
            out.push(self.configure(strand_cfg));
        }
        Ok(out)
    }

    // ── Forwarding ───────────────────────────────────────────────────────

    /// Resolve where element `send_strand_elem_idx` of `sender` lands when
    /// forwarded along `edge`.
    pub fn translate_send_to_recv(&self, edge: &Edge, sender: ConfigId, send_strand_elem_idx: u64) -> RecvTarget {
        let recv = self.get(edge.peer);
        if !recv.is_strand_config() {
            let send_stream_idx = self.stream_elem_idx_from_strand_elem_idx(sender, send_strand_elem_idx);
            let recv_stream_idx = edge.base_to_dep(send_stream_idx);
            let target = RecvTarget {
                strand_id: self.strand_id_from_stream_elem_idx(edge.peer, recv_stream_idx),
                strand_elem_idx: self.strand_elem_idx_from_stream_elem_idx(edge.peer, recv_stream_idx),
                vaddr: recv.invariant_addr(recv_stream_idx),
                machine: recv.float_plan.machine_at(recv_stream_idx),
            };
            trace!(
                send = send_strand_elem_idx,
                send_stream = send_stream_idx,
                recv_stream = recv_stream_idx,
                recv = %target.strand_id,
                "forward through stream space"
            );
            target
        } else {
            let recv_strand_elem_idx = edge.base_to_dep(send_strand_elem_idx);
            let recv_stream_idx = self.stream_elem_idx_from_strand_elem_idx(edge.peer, recv_strand_elem_idx);
            let plan = match recv.stream_config {
                Some(parent) => &self.get(parent).float_plan,
                None => &recv.float_plan,
            };
            RecvTarget {
                strand_id: recv.strand_id(),
                strand_elem_idx: recv_strand_elem_idx,
                vaddr: recv.invariant_addr(recv_strand_elem_idx),
                machine: plan.machine_at(recv_stream_idx),
            }
        }
    }

    // ── Planning queries ─────────────────────────────────────────────────

    /// Bytes touched by elements `[lhs, rhs)`. `None` for an empty range or a
    /// pattern that depends on other streams.
    pub fn address_range(&self, cfg: ConfigId, lhs: u64, rhs: u64) -> Option<AddrRange> {
        let c = self.get(cfg);
        if lhs >= rhs || !c.formal.iter().all(FormalParam::is_invariant) {
            return None;
        }
        let mut range: Option<AddrRange> = None;
        for idx in lhs..rhs {
            let addr = c.invariant_addr(idx);
            let end = addr.wrapping_add(c.elem_size);
            range = Some(match range {
                None => AddrRange { lhs: addr, rhs: end },
                Some(r) => AddrRange {
                    lhs: r.lhs.min(addr),
                    rhs: r.rhs.max(end),
                },
            });
        }
        range
    }

    /// Whether `cfg` (or one of its indirect streams) sends to a stream in
    /// a deeper loop.
    pub fn send_to_inner_loop_stream(&self, cfg: ConfigId) -> bool {
        let level = self.get(cfg).loop_level;
        let check = |c: &StreamConfig| {
            c.dep_edges
                .iter()
                .any(|e| e.kind == EdgeKind::SendTo && self.get(e.peer).loop_level > level)
        };
        let c = self.get(cfg);
        check(c)
            || c.dep_edges
                .iter()
                .filter(|e| e.kind == EdgeKind::UsedBy)
                .any(|e| check(self.get(e.peer)))
    }

    /// The stream whose `UsedBy` edge made `cfg` an indirect stream.
    pub fn used_by_base_config(&self, cfg: ConfigId) -> ConfigId {
        let c = self.get(cfg);
        let Some(edge) = c.base_edges.iter().find(|e| e.is_used_by) else {
            fatal!("{} has no UsedBy base config", c.id);
        };
        if !self.contains(edge.peer) {
            fatal!("{}: UsedBy base {} already released", c.id, edge.peer_stream);
        }
        edge.peer
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    pub fn acquire(&mut self, cfg: ConfigId) {
        self.get_mut(cfg).refs += 1;
    }

    /// Drop one reference; returns true when this freed the config.
    pub fn release(&mut self, cfg: ConfigId) -> bool {
        let c = self.get_mut(cfg);
        if c.refs == 0 {
            fatal!("release of unreferenced config {}", c.strand_id());
        }
        c.refs -= 1;
        self.try_free(cfg)
    }

    /// End-of-stream handshake; returns true when this freed the config.
    pub fn end_stream(&mut self, cfg: ConfigId) -> bool {
        let c = self.get_mut(cfg);
        if c.ended {
            fatal!("stream {} ended twice", c.strand_id());
        }
        c.ended = true;
        self.try_free(cfg)
    }

    fn try_free(&mut self, cfg: ConfigId) -> bool {
        let c = self.get(cfg);
        if !(c.ended && c.refs == 0) {
            return false;
        }
        let key = c.strand_id();
        debug!(stream = %key, "free stream config");
        self.by_strand.remove(&key);
        self.configs[cfg.0 as usize] = None;
        true
    }
}
