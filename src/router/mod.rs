//! DR-DSP: Dijkstra generalizado sobre hiperedges com relaxamento por
//! max-agregação.
//!
//! Um hiperedge `H` só pode relaxar seus alvos quando **todas** as suas
//! fontes já têm distância finalizada — a generalização hipergráfica do
//! invariante de aresta única do Dijkstra clássico. O valor proposto para os
//! alvos é `max(dist(s) : s ∈ sources(H)) + weight(H)`: pessimista e
//! admissível, nunca subestima o custo real de atravessar `H`.

use crate::error::EngineError;
use crate::store::FeatureStore;
use crate::types::{CapabilityId, ToolId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct HyperpathResult {
    pub found: bool,
    pub cancelled: bool,
    pub node_sequence: Vec<ToolId>,
    pub hyperedges: Vec<CapabilityId>,
    pub total_weight: f64,
}

impl HyperpathResult {
    fn not_found() -> Self {
        Self {
            found: false,
            cancelled: false,
            node_sequence: Vec::new(),
            hyperedges: Vec::new(),
            total_weight: f64::INFINITY,
        }
    }

    fn cancelled() -> Self {
        Self {
            found: false,
            cancelled: true,
            node_sequence: Vec::new(),
            hyperedges: Vec::new(),
            total_weight: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HeapEntry {
    dist: f64,
    node: ToolId,
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap: smaller distance pops first; ties broken
        // by the lower tool id for determinism.
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.0.cmp(&self.node.0))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `findShortestHyperpath(source, target) -> {found, nodeSequence,
/// hyperedges, totalWeight}`.
pub fn find_shortest_hyperpath(
    store: &FeatureStore,
    source: ToolId,
    target: ToolId,
    cancellation: Option<&CancellationToken>,
) -> Result<HyperpathResult, EngineError> {
    if store.tool(source).is_none() {
        return Err(EngineError::UnknownNode(source.to_string()));
    }
    if store.tool(target).is_none() {
        return Err(EngineError::UnknownNode(target.to_string()));
    }
    if source == target {
        return Ok(HyperpathResult {
            found: true,
            cancelled: false,
            node_sequence: vec![source],
            hyperedges: Vec::new(),
            total_weight: 0.0,
        });
    }

    let hyperedges: HashMap<CapabilityId, &crate::store::incidence::Hyperedge> =
        store.iter_hyperedges().map(|h| (h.id, h)).collect();

    let mut dist: HashMap<ToolId, f64> = HashMap::new();
    // Best-known predecessor hyperedge per node, used for path reconstruction.
    let mut predecessor: HashMap<ToolId, CapabilityId> = HashMap::new();
    let mut ready_sources: HashMap<CapabilityId, usize> = HashMap::new();

    dist.insert(source, 0.0);

    let mut heap = BinaryHeap::new();
    heap.push(HeapEntry {
        dist: 0.0,
        node: source,
    });
    let mut settled: HashSet<ToolId> = HashSet::new();

    while let Some(HeapEntry { dist: d, node: u }) = heap.pop() {
        if let Some(token) = cancellation {
            if token.is_cancelled() {
                return Ok(HyperpathResult::cancelled());
            }
        }
        // A node may be pushed multiple times (once per relaxing hyperedge);
        // only its first, minimal-distance pop is authoritative.
        if !settled.insert(u) {
            continue;
        }
        let current_best = *dist.get(&u).unwrap_or(&f64::INFINITY);
        if d > current_best {
            continue;
        }
        if u == target {
            break;
        }

        // Every hyperedge that has `u` among its sources becomes one step
        // closer to eligibility.
        for &cap_id in store.incidence().capabilities_for_tool(u) {
            let Some(hyperedge) = hyperedges.get(&cap_id) else {
                continue;
            };
            if !hyperedge.sources.contains(&u) {
                continue;
            }
            let counter = ready_sources.entry(cap_id).or_insert(0);
            *counter += 1;
            if *counter < hyperedge.sources.len() {
                continue;
            }

            // All sources finalized: the hyperedge is eligible. Propose the
            // pessimistic max-aggregated distance to each target.
            let source_dist = hyperedge
                .sources
                .iter()
                .map(|s| *dist.get(s).unwrap_or(&f64::INFINITY))
                .fold(0.0_f64, f64::max);
            if !source_dist.is_finite() {
                continue;
            }
            let candidate = source_dist + hyperedge.weight;

            for &t in &hyperedge.targets {
                let best = *dist.get(&t).unwrap_or(&f64::INFINITY);
                let should_relax = candidate < best
                    || (candidate == best
                        && predecessor
                            .get(&t)
                            .map(|&prev| tie_break_prefers(cap_id, prev, &hyperedges))
                            .unwrap_or(true));
                if should_relax {
                    dist.insert(t, candidate);
                    predecessor.insert(t, cap_id);
                    heap.push(HeapEntry {
                        dist: candidate,
                        node: t,
                    });
                }
            }
        }
    }

    let Some(&total_weight) = dist.get(&target) else {
        return Ok(HyperpathResult::not_found());
    };
    if !total_weight.is_finite() {
        return Ok(HyperpathResult::not_found());
    }

    Ok(reconstruct_path(store, source, target, total_weight, &dist, &predecessor))
}

/// Desempate determinístico entre dois hiperedges que propõem a mesma
/// distância para um alvo: menor peso primeiro, depois menor id
///.
fn tie_break_prefers(
    candidate: CapabilityId,
    current: CapabilityId,
    hyperedges: &HashMap<CapabilityId, &crate::store::incidence::Hyperedge>,
) -> bool {
    let wc = hyperedges.get(&candidate).map(|h| h.weight).unwrap_or(f64::INFINITY);
    let wp = hyperedges.get(&current).map(|h| h.weight).unwrap_or(f64::INFINITY);
    match wc.partial_cmp(&wp).unwrap_or(Ordering::Equal) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => candidate.0 < current.0,
    }
}

/// Reconstrói a sequência de nós e hiperedges atravessados seguindo os
/// ponteiros de retorno, do alvo até a fonte, escolhendo em cada hiperedge
/// a fonte de maior distância (a que determinou o custo de max-agregação).
fn reconstruct_path(
    store: &FeatureStore,
    source: ToolId,
    target: ToolId,
    total_weight: f64,
    dist: &HashMap<ToolId, f64>,
    predecessor: &HashMap<ToolId, CapabilityId>,
) -> HyperpathResult {
    let mut node_sequence = vec![target];
    let mut hyperedge_sequence = Vec::new();
    let mut cursor = target;

    while cursor != source {
        let Some(&hyperedge_id) = predecessor.get(&cursor) else {
            break;
        };
        hyperedge_sequence.push(hyperedge_id);
        let Some(hyperedge) = store.hyperedge(hyperedge_id) else {
            break;
        };
        let critical_source = hyperedge
            .sources
            .iter()
            .max_by(|a, b| {
                let da = *dist.get(a).unwrap_or(&f64::NEG_INFINITY);
                let db = *dist.get(b).unwrap_or(&f64::NEG_INFINITY);
                da.partial_cmp(&db)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            })
            .copied();
        let Some(next) = critical_source else { break };
        node_sequence.push(next);
        if next == cursor {
            // A single-tool hyperedge with itself as source and target; stop
            // to avoid an infinite loop.
            break;
        }
        cursor = next;
    }

    node_sequence.reverse();
    hyperedge_sequence.reverse();

    HyperpathResult {
        found: true,
        cancelled: false,
        node_sequence,
        hyperedges: hyperedge_sequence,
        total_weight,
    }
}
