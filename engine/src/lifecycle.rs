// lifecycle.rs — Element allocation, readiness and release per stream
//
// A stream is configured from a `StreamDecl` and owns a chain of elements,
// oldest first. Elements live in an arena and refer to their base elements
// and to in-flight accesses by id. Each element moves through address
// ready, issue, value ready and compute, then is stepped and released from
// the head of its chain.
//
// Reductions and pointer-chasing induction variables run one iteration
// behind: element `i` reads element `i - 1` of its own stream and of its
// value bases, and element 0 is seeded with the initial value. When such a
// stream is floated and nothing on the core consumes it, only the last
// element of each inner loop ever becomes ready, and it takes the final
// value delivered by the floated computation.
//
// Failure modes: missing base streams or elements, double ready, resolving
//   a base element that is not value ready, and out-of-order release are
//   fatal. Capacity overflow goes through the configured `OverflowPolicy`.
// Side effects: none.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::addr_gen::{gen_addr, AddrGen, ComputeFunc, LinearAddrGen};
use crate::dep_graph::{DependenceGraph, FloatPlan, ReuseInfo, StreamConfig};
use crate::element::{BaseRef, CacheBlockState, Element};
use crate::error::EngineError;
use crate::fatal;
use crate::id::{AccessId, ConfigId, DynStreamId, ElementId, InstanceAllocator, StaticId};
use crate::mem_access::{AccessPool, MemAccess};
use crate::options::EngineOptions;
use crate::value::{invariant_params, resolve_params, FormalParam, StreamValue, STREAM_VALUE_BYTES};

// ── Declarations ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum StreamRole {
    Load,
    Store,
    InductionVar,
    StoreCompute(ComputeFunc),
    LoadCompute(ComputeFunc),
    PointerChaseIndVar,
    Reduction,
}

impl StreamRole {
    pub fn is_mem(&self) -> bool {
        matches!(
            self,
            StreamRole::Load | StreamRole::Store | StreamRole::StoreCompute(_) | StreamRole::LoadCompute(_)
        )
    }

    /// Results are charged compute latency and committed on `tick`.
    pub fn is_compute(&self) -> bool {
        matches!(
            self,
            StreamRole::StoreCompute(_) | StreamRole::LoadCompute(_) | StreamRole::Reduction
        )
    }

    pub fn is_store(&self) -> bool {
        matches!(self, StreamRole::Store | StreamRole::StoreCompute(_))
    }

    pub fn is_one_iter_behind(&self) -> bool {
        matches!(self, StreamRole::Reduction | StreamRole::PointerChaseIndVar)
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamRole::Load => "load",
            StreamRole::Store => "store",
            StreamRole::InductionVar => "iv",
            StreamRole::StoreCompute(_) => "store-compute",
            StreamRole::LoadCompute(_) => "load-compute",
            StreamRole::PointerChaseIndVar => "ptr-chase-iv",
            StreamRole::Reduction => "reduce",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    /// The base's value feeds this stream's address.
    Addr,
    /// The base's value feeds this stream's computation.
    Value,
}

#[derive(Debug, Clone, Copy)]
pub struct BaseDecl {
    pub static_id: StaticId,
    pub kind: BaseKind,
    pub reuse: ReuseInfo,
}

/// Everything the core tells the engine when it configures a stream.
#[derive(Debug, Clone)]
pub struct StreamDecl {
    pub core_id: i32,
    pub static_id: StaticId,
    pub role: StreamRole,
    pub elem_size: u64,
    pub formal: Vec<FormalParam>,
    pub addr_gen: Rc<dyn AddrGen>,
    /// Parameters of a load/store compute function.
    pub compute_formal: Vec<FormalParam>,
    pub bases: Vec<BaseDecl>,
    pub total_trip: Option<u64>,
    pub inner_trip: Option<u64>,
    pub initial_value: StreamValue,
    pub has_core_user: bool,
    pub has_dep_nest: bool,
    pub simd: bool,
    pub float_plan: FloatPlan,
}

impl StreamDecl {
    pub fn new(
        static_id: StaticId,
        role: StreamRole,
        elem_size: u64,
        formal: Vec<FormalParam>,
        addr_gen: Rc<dyn AddrGen>,
    ) -> Self {
        Self {
            core_id: 0,
            static_id,
            role,
            elem_size,
            formal,
            addr_gen,
            compute_formal: Vec::new(),
            bases: Vec::new(),
            total_trip: None,
            inner_trip: None,
            initial_value: StreamValue::default(),
            has_core_user: true,
            has_dep_nest: false,
            simd: false,
            float_plan: FloatPlan::new(),
        }
    }

    /// Stream over an invariant linear pattern.
    pub fn linear(static_id: StaticId, role: StreamRole, elem_size: u64, params: &[u64]) -> Self {
        Self::new(static_id, role, elem_size, invariant_params(params), Rc::new(LinearAddrGen))
    }

    pub fn on_core(mut self, core_id: i32) -> Self {
        self.core_id = core_id;
        self
    }

    pub fn with_total_trip(mut self, trip: u64) -> Self {
        self.total_trip = Some(trip);
        self
    }

    pub fn with_inner_trip(mut self, trip: u64) -> Self {
        self.inner_trip = Some(trip);
        self
    }

    pub fn with_initial_value(mut self, value: u64) -> Self {
        self.initial_value = StreamValue::from_u64(value);
        self
    }

    pub fn with_compute_formal(mut self, formal: Vec<FormalParam>) -> Self {
        self.compute_formal = formal;
        self
    }

    pub fn with_base(mut self, static_id: StaticId, kind: BaseKind, reuse: ReuseInfo) -> Self {
        self.bases.push(BaseDecl { static_id, kind, reuse });
        self
    }

    pub fn with_float_plan(mut self, plan: FloatPlan) -> Self {
        self.float_plan = plan;
        self
    }

    pub fn without_core_user(mut self) -> Self {
        self.has_core_user = false;
        self
    }

    pub fn with_dep_nest(mut self) -> Self {
        self.has_dep_nest = true;
        self
    }

    pub fn simd(mut self) -> Self {
        self.simd = true;
        self
    }
}

// ── Terminal elements ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalDecision {
    /// Computed from its bases like any other element.
    Normal,
    /// Takes the inner loop's final value from the floated computation.
    FinalValue,
    /// Computed remotely; the core never sees this element become ready.
    NeverReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TerminalFlags {
    pub reduce_or_chase: bool,
    pub has_core_user: bool,
    pub has_dep_nest: bool,
    pub floated: bool,
    pub inner_last: bool,
}

/// Shared by `compute_value` and the readiness checks.
pub fn terminal_decision(flags: TerminalFlags) -> TerminalDecision {
    let remote = flags.reduce_or_chase && !flags.has_core_user && !flags.has_dep_nest && flags.floated;
    match (remote, flags.inner_last) {
        (false, _) => TerminalDecision::Normal,
        (true, true) => TerminalDecision::FinalValue,
        (true, false) => TerminalDecision::NeverReady,
    }
}

// ── Dynamic streams ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ResolvedBase {
    kind: BaseKind,
    stream: DynStreamId,
    reuse: ReuseInfo,
}

#[derive(Debug)]
struct DynStream {
    config: ConfigId,
    decl: StreamDecl,
    bases: Vec<ResolvedBase>,
    chain: VecDeque<ElementId>,
    next_idx: u64,
    inner_final: HashMap<u64, StreamValue>,
}

impl DynStream {
    /// Without an inner trip the whole stream is one inner loop.
    fn inner_trip(&self) -> Option<u64> {
        self.decl.inner_trip.or(self.decl.total_trip)
    }

    fn is_inner_last(&self, idx: u64) -> bool {
        match self.inner_trip() {
            Some(trip) if trip > 0 => idx > 0 && idx % trip == 0,
            _ => false,
        }
    }

    fn is_inner_second(&self, idx: u64) -> bool {
        match self.inner_trip() {
            Some(trip) if trip > 0 => idx > 0 && (idx - 1) % trip == 0,
            _ => idx == 1,
        }
    }

    fn is_floated(&self, idx: u64) -> bool {
        self.decl.float_plan.machine_at(idx).is_some()
    }

    fn is_zero_trip_last(&self, idx: u64) -> bool {
        self.decl.total_trip == Some(0) && idx == 0
    }

    fn terminal(&self, idx: u64) -> TerminalDecision {
        terminal_decision(TerminalFlags {
            reduce_or_chase: self.decl.role.is_one_iter_behind(),
            has_core_user: self.decl.has_core_user,
            has_dep_nest: self.decl.has_dep_nest,
            floated: self.is_floated(idx),
            inner_last: self.is_inner_last(idx),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingCompute {
    element: ElementId,
    result: StreamValue,
    ready_at: u64,
}

enum IssuePlan {
    New,
    Share(AccessId),
    CopyPrev,
}

// ── Manager ──────────────────────────────────────────────────────────────

pub struct LifecycleManager {
    options: EngineOptions,
    graph: DependenceGraph,
    instances: InstanceAllocator,
    streams: HashMap<DynStreamId, DynStream>,
    by_static: HashMap<(i32, StaticId), DynStreamId>,
    elements: Vec<Option<Element>>,
    free_elements: Vec<u32>,
    accesses: AccessPool,
    pending: Vec<PendingCompute>,
    now: u64,
}

impl LifecycleManager {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            graph: DependenceGraph::new(),
            instances: InstanceAllocator::new(),
            streams: HashMap::new(),
            by_static: HashMap::new(),
            elements: Vec::new(),
            free_elements: Vec::new(),
            accesses: AccessPool::new(),
            pending: Vec::new(),
            now: 0,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn graph(&self) -> &DependenceGraph {
        &self.graph
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn element(&self, id: ElementId) -> &Element {
        match self.elements.get(id.0 as usize).and_then(|e| e.as_ref()) {
            Some(e) => e,
            None => fatal!("element {:?} is not allocated", id),
        }
    }

    fn element_mut(&mut self, id: ElementId) -> &mut Element {
        match self.elements.get_mut(id.0 as usize).and_then(|e| e.as_mut()) {
            Some(e) => e,
            None => fatal!("element {:?} is not allocated", id),
        }
    }

    /// Borrow two distinct elements, one of them mutably.
    fn pair_mut(&mut self, read: ElementId, write: ElementId) -> (&Element, &mut Element) {
        let (r, w) = (read.0 as usize, write.0 as usize);
        if r == w || r.max(w) >= self.elements.len() {
            fatal!("cannot pair elements {:?} and {:?}", read, write);
        }
        let (lo, hi) = self.elements.split_at_mut(r.max(w));
        let (low, high) = (&mut lo[r.min(w)], &mut hi[0]);
        let (re, we) = if r < w { (low, high) } else { (high, low) };
        match (re.as_ref(), we.as_mut()) {
            (Some(a), Some(b)) => (a, b),
            _ => fatal!("element {:?} or {:?} is not allocated", read, write),
        }
    }

    fn stream(&self, id: DynStreamId) -> &DynStream {
        match self.streams.get(&id) {
            Some(s) => s,
            None => fatal!("no dynamic stream {}", id),
        }
    }

    fn stream_mut(&mut self, id: DynStreamId) -> &mut DynStream {
        match self.streams.get_mut(&id) {
            Some(s) => s,
            None => fatal!("no dynamic stream {}", id),
        }
    }

    pub fn access(&self, id: AccessId) -> &MemAccess {
        self.accesses.get(id)
    }

    pub fn in_flight_accesses(&self) -> usize {
        self.accesses.in_flight()
    }

    pub fn live_elements(&self) -> usize {
        self.elements.iter().filter(|e| e.is_some()).count()
    }

    pub fn pending_computes(&self) -> usize {
        self.pending.len()
    }

    /// Allocated elements of `stream`, oldest first.
    pub fn elements_of(&self, stream: DynStreamId) -> Result<Vec<ElementId>, EngineError> {
        let s = self.streams.get(&stream).ok_or(EngineError::UnknownStream(stream))?;
        Ok(s.chain.iter().copied().collect())
    }

    // ── Configure ────────────────────────────────────────────────────────

    /// Register a new dynamic instance. Base streams must already be
    /// configured on the same core.
    pub fn configure(&mut self, decl: StreamDecl) -> DynStreamId {
        let id = self.instances.alloc(decl.core_id, decl.static_id);
        let mut config = StreamConfig::new(id, decl.elem_size, decl.formal.clone(), Rc::clone(&decl.addr_gen));
        config.total_trip = decl.total_trip;
        config.inner_trip = decl.inner_trip;
        config.is_pointer_chase = matches!(decl.role, StreamRole::PointerChaseIndVar);
        config.is_one_iter_behind = decl.role.is_one_iter_behind();
        config.float_plan = decl.float_plan.clone();
        let cfg = self.graph.configure(config);

        let mut bases = Vec::with_capacity(decl.bases.len());
        for base in &decl.bases {
            let base_stream = match self.by_static.get(&(decl.core_id, base.static_id)) {
                Some(b) => *b,
                None => fatal!("{}: base stream S{} is not configured", id, base.static_id),
            };
            let base_cfg = self.stream(base_stream).config;
            match base.kind {
                BaseKind::Addr => self.graph.add_used_by(base_cfg, cfg, base.reuse, None),
                BaseKind::Value => self.graph.add_base_on(cfg, base_cfg, base.reuse, 0),
            }
            bases.push(ResolvedBase {
                kind: base.kind,
                stream: base_stream,
                reuse: base.reuse,
            });
        }

        debug!(stream = %id, role = decl.role.name(), bases = bases.len(), "configure");
        self.by_static.insert((decl.core_id, decl.static_id), id);
        self.streams.insert(
            id,
            DynStream {
                config: cfg,
                decl,
                bases,
                chain: VecDeque::new(),
                next_idx: 0,
                inner_final: HashMap::new(),
            },
        );
        id
    }

    // ── Allocation ───────────────────────────────────────────────────────

    fn find_element(&self, stream: DynStreamId, idx: u64) -> ElementId {
        let s = match self.streams.get(&stream) {
            Some(s) => s,
            None => fatal!("base stream {} is missing", stream),
        };
        match s.chain.iter().copied().find(|&e| self.element(e).idx == idx) {
            Some(e) => e,
            None => fatal!("base element {}[{}] is not allocated", stream, idx),
        }
    }

    fn insert_element(&mut self, element: Element) -> ElementId {
        match self.free_elements.pop() {
            Some(slot) => {
                self.elements[slot as usize] = Some(element);
                ElementId(slot)
            }
            None => {
                self.elements.push(Some(element));
                ElementId(self.elements.len() as u32 - 1)
            }
        }
    }

    /// Append the next element to `stream`'s chain and link its bases. Base
    /// elements must already be allocated.
    pub fn allocate_element(&mut self, stream: DynStreamId) -> Result<ElementId, EngineError> {
        let s = self.streams.get(&stream).ok_or(EngineError::UnknownStream(stream))?;
        let idx = s.next_idx;
        let mut element = Element::new(
            stream,
            s.config,
            idx,
            s.decl.elem_size,
            s.decl.role.is_mem(),
            self.options.line_size,
        );

        let behind = s.decl.role.is_one_iter_behind();
        if !(behind && idx == 0) {
            let dep_idx = if behind { idx - 1 } else { idx };
            for base in &s.bases {
                let base_idx = base.reuse.dep_to_base(dep_idx);
                let base_ref = BaseRef {
                    element: self.find_element(base.stream, base_idx),
                    stream: base.stream,
                    idx: base_idx,
                };
                match base.kind {
                    BaseKind::Addr => element.addr_base.push(base_ref),
                    BaseKind::Value => element.value_base.push(base_ref),
                }
            }
        }
        let prev = s.chain.back().copied();
        if behind && idx > 0 {
            match prev {
                Some(p) => element.value_base.push(BaseRef {
                    element: p,
                    stream,
                    idx: idx - 1,
                }),
                None => fatal!("{}[{}]: previous element released early", stream, idx),
            }
        }
        let self_base = matches!(s.decl.role, StreamRole::LoadCompute(_));
        let config = s.config;

        let id = self.insert_element(element);
        if self_base {
            self.element_mut(id).value_base.push(BaseRef {
                element: id,
                stream,
                idx,
            });
        }
        if let Some(p) = prev {
            self.element_mut(p).next = Some(id);
        }
        let s = self.stream_mut(stream);
        s.chain.push_back(id);
        s.next_idx += 1;
        self.graph.acquire(config);
        trace!(%stream, idx, element = ?id, "allocate element");
        Ok(id)
    }

    fn prev_element(&self, el: ElementId) -> Option<ElementId> {
        let e = self.element(el);
        let s = self.stream(e.stream);
        let pos = match s.chain.iter().position(|&x| x == el) {
            Some(p) => p,
            None => fatal!("{}: not in its stream's chain", e),
        };
        if pos == 0 {
            return None;
        }
        let prev = s.chain[pos - 1];
        if self.element(prev).next != Some(el) {
            fatal!("{}: broken element chain at {}", e, self.element(prev));
        }
        Some(prev)
    }

    // ── Base resolution ──────────────────────────────────────────────────

    fn is_unfloated_load_compute(&self, e: &Element) -> bool {
        match self.streams.get(&e.stream) {
            Some(s) => matches!(s.decl.role, StreamRole::LoadCompute(_)) && !s.is_floated(e.idx),
            None => false,
        }
    }

    /// Dereference a base of `el`. A released base whose slot is empty or
    /// already holds another element is fatal.
    fn base_element(&self, el: ElementId, base: BaseRef) -> &Element {
        match self.elements.get(base.element.0 as usize).and_then(|e| e.as_ref()) {
            Some(be) if base.matches(be) => be,
            _ => fatal!(
                "{}: base element {}[{}] released early",
                self.element(el),
                base.stream,
                base.idx
            ),
        }
    }

    fn base_value(&self, el: ElementId, bases: &[BaseRef], id: StaticId) -> StreamValue {
        let e = self.element(el);
        let base = match bases.iter().copied().find(|b| b.stream.static_id == id) {
            Some(b) => b,
            None => fatal!("{}: no base element of stream S{}", e, id),
        };
        let b = base.element;
        let be = self.base_element(el, base);
        if b != el && self.is_unfloated_load_compute(be) {
            return match be.load_compute_value {
                Some(v) => v,
                None => fatal!("{}: load compute value of base {} is not ready", e, be),
            };
        }
        if !be.value_ready {
            fatal!("{}: base element {} is not value ready", e, be);
        }
        be.element_value()
    }

    fn base_ready(&self, el: ElementId, base: BaseRef) -> bool {
        let be = self.base_element(el, base);
        if base.element == el {
            return be.value_ready;
        }
        if self.is_unfloated_load_compute(be) {
            be.load_compute_value.is_some()
        } else {
            be.value_ready
        }
    }

    pub fn check_addr_base_ready(&self, el: ElementId) -> bool {
        let e = self.element(el);
        if self.stream(e.stream).is_zero_trip_last(e.idx) {
            return false;
        }
        e.addr_base.iter().all(|&b| self.base_ready(el, b))
    }

    pub fn check_value_base_ready(&self, el: ElementId) -> bool {
        let e = self.element(el);
        let s = self.stream(e.stream);
        match s.terminal(e.idx) {
            TerminalDecision::FinalValue => return s.inner_final.contains_key(&e.idx),
            TerminalDecision::NeverReady => return false,
            TerminalDecision::Normal => {}
        }
        if s.is_zero_trip_last(e.idx) {
            return false;
        }
        e.value_base.iter().all(|&b| self.base_ready(el, b))
    }

    pub fn is_value_ready(&self, el: ElementId) -> bool {
        self.element(el).value_ready
    }

    /// The value the core consumes: the compute result of an unfloated
    /// load-compute element, otherwise the element's own value.
    pub fn is_compute_value_ready(&self, el: ElementId) -> bool {
        let e = self.element(el);
        if self.is_unfloated_load_compute(e) {
            e.load_compute_value.is_some()
        } else {
            e.value_ready
        }
    }

    // ── Address and issue ────────────────────────────────────────────────

    /// Compute the address from the addr bases (0 for non-memory streams)
    /// and split the element into cache blocks.
    pub fn mark_addr_ready(&mut self, el: ElementId) -> Result<(), EngineError> {
        let e = self.element(el);
        let s = self.stream(e.stream);
        let addr = if s.decl.role.is_mem() {
            gen_addr(s.decl.addr_gen.as_ref(), e.idx, &s.decl.formal, |id| {
                self.base_value(el, &e.addr_base, id)
            })
            .front()
        } else {
            0
        };
        let policy = self.options.overflow_policy;
        self.element_mut(el).mark_addr_ready(addr, policy)?;
        Ok(())
    }

    fn plan_block(&self, prev: Option<ElementId>, line_vaddr: u64) -> IssuePlan {
        let pe = match prev {
            Some(p) if self.options.coalesce_continuous => self.element(p),
            _ => return IssuePlan::New,
        };
        if !pe.addr_ready {
            return IssuePlan::New;
        }
        let block = match pe.block_of_line(line_vaddr) {
            Some(j) => pe.blocks()[j],
            None => return IssuePlan::New,
        };
        match (block.state, block.access) {
            (CacheBlockState::Issued, Some(access)) => IssuePlan::Share(access),
            (CacheBlockState::Ready | CacheBlockState::Faulted, _) => IssuePlan::CopyPrev,
            _ => IssuePlan::New,
        }
    }

    /// Request every initialized block. A line the previous element already
    /// has in flight is shared by registering as a receiver; a line it
    /// already holds is copied. Returns the newly created accesses.
    pub fn issue(&mut self, el: ElementId) -> Result<Vec<AccessId>, EngineError> {
        let prev = self.prev_element(el);
        let e = self.element(el);
        if !e.is_mem {
            fatal!("{}: only memory streams issue requests", e);
        }
        if !e.addr_ready {
            fatal!("{}: issue before address ready", e);
        }
        if e.req_issued {
            fatal!("{}: request already issued", e);
        }
        let plans: Vec<(usize, IssuePlan)> = e
            .blocks()
            .iter()
            .enumerate()
            .filter(|(_, b)| b.state == CacheBlockState::Initialized)
            .map(|(i, b)| (i, self.plan_block(prev, b.line_vaddr)))
            .collect();
        let (stream, idx, flushed) = (e.stream, e.idx, e.flushed);
        let policy = self.options.overflow_policy;
        // A full receiver list leaves the element untouched.
        for (_, plan) in &plans {
            if let IssuePlan::Share(access) = plan {
                self.accesses.get(*access).check_receiver_room(el, policy)?;
            }
        }

        let mut fresh = Vec::new();
        let mut copy = false;
        for (i, plan) in plans {
            match plan {
                IssuePlan::Share(access) => {
                    self.accesses.get_mut(access).register_receiver(el, policy)?;
                    let block = &mut self.element_mut(el).blocks_mut()[i];
                    block.access = Some(access);
                    block.state = CacheBlockState::Issued;
                    trace!(%stream, idx, ?access, "share in-flight access");
                }
                IssuePlan::CopyPrev => {
                    self.element_mut(el).blocks_mut()[i].state = CacheBlockState::PrevElement;
                    copy = true;
                }
                IssuePlan::New => {
                    let block = self.element(el).blocks()[i];
                    let mut access = MemAccess::new(stream, el, idx, block.line_vaddr, block.vaddr, block.size);
                    access.is_reissue = flushed;
                    let id = self.accesses.alloc(access);
                    self.accesses.get_mut(id).register_receiver(el, policy)?;
                    let block = &mut self.element_mut(el).blocks_mut()[i];
                    block.access = Some(id);
                    block.state = CacheBlockState::Issued;
                    debug!(%stream, idx, line = format_args!("{:#x}", block.line_vaddr), reissue = flushed, "issue");
                    fresh.push(id);
                }
            }
        }
        self.element_mut(el).req_issued = true;
        if copy {
            self.set_value_from_prev(el);
        }
        Ok(fresh)
    }

    fn detach(&mut self, el: ElementId, access: AccessId) -> usize {
        let e = self.element_mut(el);
        match e.blocks().iter().position(|b| b.access == Some(access)) {
            Some(i) => {
                e.blocks_mut()[i].access = None;
                i
            }
            None => fatal!("{}: not waiting on access {:?}", e, access),
        }
    }

    fn receivers_of(&mut self, access: AccessId) -> (bool, Vec<ElementId>) {
        let (acc, receivers) = self.accesses.respond(access);
        let store = self.streams.get(&acc.stream).map_or(false, |s| s.decl.role.is_store());
        trace!(stream = %acc.stream, line = format_args!("{:#x}", acc.line_vaddr), receivers = receivers.len(), "respond");
        (store, receivers)
    }

    /// Deliver the line `data` to every element still registered on
    /// `access`. Store streams only detach. Returns the elements that
    /// became value ready.
    pub fn handle_response(&mut self, access: AccessId, data: &[u8]) -> Vec<ElementId> {
        let (store, receivers) = self.receivers_of(access);
        let mut ready = Vec::new();
        for r in receivers {
            let i = self.detach(r, access);
            if store {
                continue;
            }
            let e = self.element_mut(r);
            let line = e.blocks()[i].line_vaddr;
            if e.set_value(line, data) {
                ready.push(r);
            }
        }
        ready
    }

    pub fn handle_fault(&mut self, access: AccessId) -> Vec<ElementId> {
        let (store, receivers) = self.receivers_of(access);
        let mut ready = Vec::new();
        for r in receivers {
            let i = self.detach(r, access);
            if !store && self.element_mut(r).fault_block(i) {
                ready.push(r);
            }
        }
        ready
    }

    pub fn set_value(&mut self, el: ElementId, vaddr: u64, bytes: &[u8]) -> bool {
        self.element_mut(el).set_value(vaddr, bytes)
    }

    /// Fill this element's PrevElement blocks from the previous element.
    pub fn set_value_from_prev(&mut self, el: ElementId) -> bool {
        let prev = match self.prev_element(el) {
            Some(p) => p,
            None => fatal!("{}: no previous element to copy from", self.element(el)),
        };
        let (p, e) = self.pair_mut(prev, el);
        e.copy_from_prev(p)
    }

    // ── Compute ──────────────────────────────────────────────────────────

    fn commit(&mut self, el: ElementId, value: StreamValue) {
        let load_compute = self.is_unfloated_load_compute(self.element(el));
        let e = self.element_mut(el);
        e.compute_scheduled = false;
        if load_compute {
            if e.load_compute_value.is_some() {
                fatal!("{}: load compute value is already ready", e);
            }
            e.load_compute_value = Some(value);
            debug!(stream = %e.stream, idx = e.idx, "load compute value ready");
            return;
        }
        let size = e.size as usize;
        if size > STREAM_VALUE_BYTES {
            fatal!("{}: element of {} bytes cannot take a computed value", e, size);
        }
        let addr = e.addr;
        e.set_value(addr, &value.as_bytes()[..size]);
    }

    /// Evaluate the element. Compute roles are queued with their latency
    /// and committed by `tick`; induction variables commit at once.
    pub fn compute_value(&mut self, el: ElementId) {
        let e = self.element(el);
        let s = self.stream(e.stream);
        if !e.addr_ready {
            fatal!("{}: compute before address ready", e);
        }
        if e.compute_scheduled {
            fatal!("{}: compute already scheduled", e);
        }
        let idx = e.idx;
        if s.decl.role.is_one_iter_behind() && idx == 0 {
            let initial = s.decl.initial_value;
            self.commit(el, initial);
            return;
        }
        match s.terminal(idx) {
            TerminalDecision::FinalValue => {
                let value = match s.inner_final.get(&idx) {
                    Some(v) => *v,
                    None => fatal!("{}: inner final value is not ready", e),
                };
                self.commit(el, value);
                return;
            }
            TerminalDecision::NeverReady => fatal!("{}: floated terminal element is never computed", e),
            TerminalDecision::Normal => {}
        }

        let gen = s.decl.addr_gen.as_ref();
        let (result, latency) = match &s.decl.role {
            StreamRole::Load | StreamRole::Store => {
                fatal!("{}: {} streams have no value to compute", e, s.decl.role.name())
            }
            StreamRole::StoreCompute(func) | StreamRole::LoadCompute(func) => {
                if !self.check_value_base_ready(el) {
                    fatal!("{}: compute with value base not ready", e);
                }
                let params = resolve_params(&s.decl.compute_formal, |id| self.base_value(el, &e.value_base, id));
                (func.invoke(&params), func.latency)
            }
            StreamRole::Reduction => {
                let own = s.decl.static_id;
                let second = s.is_inner_second(idx);
                let initial = s.decl.initial_value;
                let value = gen_addr(gen, idx, &s.decl.formal, |id| {
                    if id == own && second {
                        initial
                    } else {
                        self.base_value(el, &e.value_base, id)
                    }
                });
                (value, gen.estimated_latency())
            }
            StreamRole::InductionVar | StreamRole::PointerChaseIndVar => {
                let bases: Vec<BaseRef> = e.addr_base.iter().chain(&e.value_base).copied().collect();
                let value = gen_addr(gen, idx, &s.decl.formal, |id| self.base_value(el, &bases, id));
                (value, gen.estimated_latency())
            }
        };

        if !s.decl.role.is_compute() {
            self.commit(el, result);
            return;
        }
        let mut latency = latency;
        if !self.options.scalar_alu || s.decl.simd {
            latency += self.options.simd_delay;
        }
        let ready_at = self.now + latency;
        debug!(stream = %e.stream, idx, ready_at, "schedule compute");
        self.element_mut(el).compute_scheduled = true;
        self.pending.push(PendingCompute {
            element: el,
            result,
            ready_at,
        });
    }

    /// Advance to cycle `now` and commit every compute result due by then,
    /// in scheduling order. Returns the committed elements.
    pub fn tick(&mut self, now: u64) -> Vec<ElementId> {
        self.now = now;
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.ready_at <= now);
        self.pending = waiting;
        due.into_iter()
            .map(|p| {
                self.commit(p.element, p.result);
                p.element
            })
            .collect()
    }

    pub fn set_inner_final_value(&mut self, stream: DynStreamId, idx: u64, value: u64) -> Result<(), EngineError> {
        let s = self.streams.get_mut(&stream).ok_or(EngineError::UnknownStream(stream))?;
        if s.inner_final.insert(idx, StreamValue::from_u64(value)).is_some() {
            fatal!("{}[{}]: inner final value set twice", stream, idx);
        }
        debug!(%stream, idx, "inner final value ready");
        Ok(())
    }

    // ── Step, flush and release ──────────────────────────────────────────

    /// Mark the oldest unstepped element as consumed by the core.
    pub fn step(&mut self, stream: DynStreamId) -> Result<ElementId, EngineError> {
        let s = self.streams.get(&stream).ok_or(EngineError::UnknownStream(stream))?;
        let next = s.chain.iter().copied().find(|&e| !self.element(e).stepped);
        match next {
            Some(el) => {
                self.element_mut(el).stepped = true;
                trace!(%stream, element = ?el, "step");
                Ok(el)
            }
            None => fatal!("{}: step with no unstepped element", stream),
        }
    }

    /// Rewind a misspeculated element; it stops receiving responses from
    /// the accesses it was waiting on.
    pub fn flush(&mut self, el: ElementId, aliased: bool) {
        for access in self.element_mut(el).flush_state(aliased) {
            self.accesses.get_mut(access).deregister_receiver(el);
        }
        self.pending.retain(|p| p.element != el);
        let e = self.element(el);
        debug!(stream = %e.stream, idx = e.idx, aliased, "flush");
    }

    /// Release the head of its chain. Releasing anything else is fatal.
    pub fn release(&mut self, el: ElementId) {
        let e = self.element(el);
        let s = self.stream(e.stream);
        if s.chain.front() != Some(&el) {
            fatal!("{}: out-of-order release, head is {:?}", e, s.chain.front());
        }
        if !e.stepped {
            fatal!("{}: released before being stepped", e);
        }
        let stream = e.stream;
        self.release_front(stream);
    }

    /// Release stepped elements from the head. Returns how many.
    pub fn release_stepped(&mut self, stream: DynStreamId) -> Result<usize, EngineError> {
        let mut released = 0;
        loop {
            let s = self.streams.get(&stream).ok_or(EngineError::UnknownStream(stream))?;
            match s.chain.front() {
                Some(&el) if self.element(el).stepped => {
                    self.release_front(stream);
                    released += 1;
                }
                _ => return Ok(released),
            }
        }
    }

    fn release_front(&mut self, stream: DynStreamId) {
        let s = self.stream_mut(stream);
        let (el, config) = match s.chain.pop_front() {
            Some(el) => (el, s.config),
            None => fatal!("{}: release from an empty chain", stream),
        };
        for access in self.element_mut(el).take_accesses() {
            self.accesses.get_mut(access).deregister_receiver(el);
        }
        self.pending.retain(|p| p.element != el);
        let mut element = match self.elements.get_mut(el.0 as usize).and_then(|e| e.take()) {
            Some(e) => e,
            None => fatal!("element {:?} released twice", el),
        };
        trace!(%stream, idx = element.idx, "release element");
        element.clear();
        self.free_elements.push(el.0);
        self.graph.release(config);
    }

    /// Release every remaining element and end the stream. Returns whether
    /// the config was freed.
    pub fn end_stream(&mut self, stream: DynStreamId) -> Result<bool, EngineError> {
        let s = self.streams.get(&stream).ok_or(EngineError::UnknownStream(stream))?;
        for _ in 0..s.chain.len() {
            self.release_front(stream);
        }
        let config = self.stream(stream).config;
        self.streams.remove(&stream);
        let key = (stream.core_id, stream.static_id);
        if self.by_static.get(&key) == Some(&stream) {
            self.by_static.remove(&key);
        }
        let freed = self.graph.end_stream(config);
        debug!(%stream, freed, "end stream");
        Ok(freed)
    }
}
