//! PageRank genérico e PageRank de hipergrafo.
//!
//! Dois cálculos distintos são expostos:
//!
//! - [`bipartite_pagerank`]: PageRank padrão sobre o grafo bipartido
//!   tool↔capability induzido pela incidência — alimenta o campo genérico
//!   `NodeFeatures::pagerank` para *ambos* os tipos de nó.
//! - [`hypergraph_pagerank`]: a caminhada aleatória de hipergrafo em que, a
//!   partir de um nó, escolhe-se um hiperedge incidente com probabilidade
//!   proporcional a `cost^-1`, depois um vizinho nesse hiperedge
//!   uniformemente — restrita a nós `Tool`, já que apenas ferramentas
//!   aparecem como fonte/alvo de um hiperedge. Alimenta
//!   `NodeFeatures::hypergraph_pagerank`, cacheado apenas em nós `Tool`.
//!
//! Ambos iteram a distribuição estacionária com damping e tolerância
//! configuráveis até `max|Δp| < tol` ou o limite de iterações, publicando o
//! melhor iterate com `truncated=true` se o limite for atingido.

use crate::store::FeatureStore;
use crate::types::{CapabilityId, ToolId};

/// Resultado de uma iteração de power-method PageRank.
#[derive(Debug, Clone)]
pub struct PageRankResult<K> {
    pub scores: Vec<(K, f64)>,
    pub iterations: usize,
    pub truncated: bool,
}

fn normalize_l1(v: &mut [f64]) {
    let sum: f64 = v.iter().sum();
    if sum > 0.0 {
        for x in v.iter_mut() {
            *x /= sum;
        }
    }
}

fn max_abs_delta(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Caminhada aleatória de hipergrafo restrita a ferramentas.
///
/// Para cada tool `t`, a massa de probabilidade flui através dos hiperedges
/// (capabilities) incidentes a `t`: o hiperedge é escolhido com probabilidade
/// proporcional a `1/cost(H)`, e a partir dele a caminhada salta
/// uniformemente para qualquer outra ferramenta em `sources(H) ∪ targets(H)`.
pub fn hypergraph_pagerank(
    store: &FeatureStore,
    damping: f64,
    tol: f64,
    max_iterations: usize,
) -> PageRankResult<ToolId> {
    let tool_ids = store.tools().sorted_ids();
    let n = tool_ids.len();
    if n == 0 {
        return PageRankResult {
            scores: Vec::new(),
            iterations: 0,
            truncated: false,
        };
    }
    let index_of: std::collections::HashMap<ToolId, usize> = tool_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i))
        .collect();

    // Precompute, per tool row, the list of (target_tool_index, transition_weight)
    // implied by each incident hyperedge: weight ∝ 1/cost(H) split uniformly
    // over the other member tools of H.
    let mut transitions: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for hyperedge in store.iter_hyperedges() {
        let members: Vec<ToolId> = hyperedge
            .sources
            .iter()
            .chain(hyperedge.targets.iter())
            .copied()
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if members.len() < 2 {
            continue;
        }
        let hyperedge_prob = 1.0 / hyperedge.weight;
        let share = hyperedge_prob / (members.len() as f64 - 1.0);
        for &from in &members {
            let Some(&from_idx) = index_of.get(&from) else {
                continue;
            };
            for &to in &members {
                if to == from {
                    continue;
                }
                let Some(&to_idx) = index_of.get(&to) else {
                    continue;
                };
                transitions[from_idx].push((to_idx, share));
            }
        }
    }
    for row in transitions.iter_mut() {
        let total: f64 = row.iter().map(|(_, w)| w).sum();
        if total > 0.0 {
            for (_, w) in row.iter_mut() {
                *w /= total;
            }
        }
    }

    power_iterate(n, &transitions, damping, tol, max_iterations)
        .into_iter_result(&tool_ids)
}

/// PageRank padrão sobre o grafo bipartido tool↔capability induzido pela
/// matriz de incidência, alimentando o campo genérico `NodeFeatures::pagerank`.
pub fn bipartite_pagerank(
    store: &FeatureStore,
    damping: f64,
    tol: f64,
    max_iterations: usize,
) -> (PageRankResult<ToolId>, PageRankResult<CapabilityId>) {
    let tool_ids = store.tools().sorted_ids();
    let cap_ids = store.capabilities().sorted_ids();
    let n_tools = tool_ids.len();
    let n_caps = cap_ids.len();
    let n = n_tools + n_caps;
    if n == 0 {
        return (
            PageRankResult {
                scores: Vec::new(),
                iterations: 0,
                truncated: false,
            },
            PageRankResult {
                scores: Vec::new(),
                iterations: 0,
                truncated: false,
            },
        );
    }

    let tool_index: std::collections::HashMap<ToolId, usize> = tool_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i))
        .collect();
    let cap_offset = n_tools;

    let mut transitions: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (cap_idx, &cap_id) in cap_ids.iter().enumerate() {
        let cap_node_idx = cap_offset + cap_idx;
        let tools = store.incidence().tools_for_capability(cap_id);
        if tools.is_empty() {
            continue;
        }
        let share = 1.0 / tools.len() as f64;
        for &t in tools {
            if let Some(&t_idx) = tool_index.get(&t) {
                // tool -> capability
                transitions[t_idx].push((cap_node_idx, 1.0));
                // capability -> tool
                transitions[cap_node_idx].push((t_idx, share));
            }
        }
    }
    for row in transitions.iter_mut() {
        let total: f64 = row.iter().map(|(_, w)| w).sum();
        if total > 0.0 {
            for (_, w) in row.iter_mut() {
                *w /= total;
            }
        }
    }

    let combined = power_iterate(n, &transitions, damping, tol, max_iterations);
    let tool_scores = tool_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, combined.scores[i]))
        .collect();
    let cap_scores = cap_ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, combined.scores[cap_offset + i]))
        .collect();
    (
        PageRankResult {
            scores: tool_scores,
            iterations: combined.iterations,
            truncated: combined.truncated,
        },
        PageRankResult {
            scores: cap_scores,
            iterations: combined.iterations,
            truncated: combined.truncated,
        },
    )
}

struct RawPowerResult {
    scores: Vec<f64>,
    iterations: usize,
    truncated: bool,
}

impl RawPowerResult {
    fn into_iter_result<K: Copy>(self, ids: &[K]) -> PageRankResult<K> {
        PageRankResult {
            scores: ids.iter().copied().zip(self.scores).collect(),
            iterations: self.iterations,
            truncated: self.truncated,
        }
    }
}

/// Power iteration compartilhado: `p_{t+1} = damping * P^T p_t + (1-damping)/n`,
/// com ordem de soma sequencial para reprodutibilidade bit-a-bit
///.
fn power_iterate(
    n: usize,
    transitions: &[Vec<(usize, f64)>],
    damping: f64,
    tol: f64,
    max_iterations: usize,
) -> RawPowerResult {
    let mut p = vec![1.0 / n as f64; n];
    let teleport = (1.0 - damping) / n as f64;
    let mut truncated = true;
    let mut last_iteration = 0;

    for iteration in 0..max_iterations {
        let mut next = vec![teleport; n];
        for (from, row) in transitions.iter().enumerate() {
            let mass = p[from];
            if row.is_empty() {
                // Dangling node: redistribute its mass uniformly (standard
                // PageRank dangling-node handling).
                let share = damping * mass / n as f64;
                for slot in next.iter_mut() {
                    *slot += share;
                }
                continue;
            }
            for &(to, weight) in row {
                next[to] += damping * mass * weight;
            }
        }
        normalize_l1(&mut next);
        let delta = max_abs_delta(&p, &next);
        p = next;
        last_iteration = iteration + 1;
        if delta < tol {
            truncated = false;
            break;
        }
    }

    RawPowerResult {
        scores: p,
        iterations: last_iteration,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_tool_store() -> FeatureStore {
        let mut store = FeatureStore::new(2, 1e-3);
        let t0 = store
            .upsert_tool("fs:read", vec![1.0, 0.0], "fs", "read")
            .unwrap();
        let t1 = store
            .upsert_tool("json:parse", vec![0.0, 1.0], "json", "parse")
            .unwrap();
        store
            .upsert_capability("cap.fs.read_json", vec![1.0, 0.0], vec![t0, t1], 0.9)
            .unwrap();
        store.recompute_incidence_if_dirty();
        store
    }

    #[test]
    fn hypergraph_pagerank_sums_to_one() {
        let store = two_tool_store();
        let result = hypergraph_pagerank(&store, 0.85, 1e-8, 100);
        let sum: f64 = result.scores.iter().map(|(_, s)| s).sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(!result.truncated);
    }

    #[test]
    fn bipartite_pagerank_covers_tools_and_capabilities() {
        let store = two_tool_store();
        let (tools, caps) = bipartite_pagerank(&store, 0.85, 1e-8, 100);
        assert_eq!(tools.scores.len(), 2);
        assert_eq!(caps.scores.len(), 1);
        let total: f64 =
            tools.scores.iter().map(|(_, s)| s).sum::<f64>() + caps.scores[0].1;
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_store_returns_empty_scores() {
        let store = FeatureStore::new(2, 1e-3);
        let result = hypergraph_pagerank(&store, 0.85, 1e-6, 100);
        assert!(result.scores.is_empty());
    }
}
