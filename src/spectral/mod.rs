//! Spectral clusterer: Laplaciano normalizado, k-means sobre autovetores,
//! PageRank de hipergrafo, e identificação de cluster ativo.

pub mod cache;
pub mod pagerank;

use crate::error::EngineError;
use crate::store::{FeatureStore, NodeId};
use crate::types::{CapabilityId, ToolId};
use cache::{content_hash, SpectralCache, SpectralSnapshot};
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Semente fixa para o k-means, garantindo rótulos determinísticos entre
/// execuções.
const KMEANS_SEED: u64 = 42;
/// Parâmetro de tempo do heat kernel usado para `heat_diffusion`.
const HEAT_KERNEL_T: f64 = 1.0;

/// Orquestra a reconstrução espectral completa: Laplaciano, k-means,
/// PageRank de hipergrafo e heat-diffusion, com cache por hash de conteúdo.
pub struct SpectralClusterer {
    pub cache: SpectralCache,
    pub spectral_k: usize,
    pub damping: f64,
    pub pagerank_tol: f64,
    pub pagerank_max_iterations: usize,
}

impl SpectralClusterer {
    pub fn new(
        spectral_k: usize,
        damping: f64,
        pagerank_tol: f64,
        pagerank_max_iterations: usize,
    ) -> Self {
        Self {
            cache: SpectralCache::new(),
            spectral_k,
            damping,
            pagerank_tol,
            pagerank_max_iterations,
        }
    }

    /// Recomputa as features espectrais se o bit de sujeira da store estiver
    /// setado ou se o cache não bater com o hash de conteúdo atual; caso
    /// contrário é um no-op (idempotência de `recomputeSpectral`).
    pub fn recompute_if_needed(&mut self, store: &mut FeatureStore) -> Result<(), EngineError> {
        store.recompute_incidence_if_dirty();
        if self.cache.restore_if_valid(store).is_some() {
            return Ok(());
        }
        let snapshot = self.recompute(store)?;
        self.apply_snapshot(store, &snapshot);
        self.cache.replace(snapshot);
        Ok(())
    }

    fn apply_snapshot(&self, store: &mut FeatureStore, snapshot: &SpectralSnapshot) {
        for (i, &id) in store.tools().sorted_ids().iter().enumerate() {
            let patch = crate::store::FeaturePatch {
                spectral_cluster: snapshot.tool_clusters.get(i).copied(),
                pagerank: snapshot.tool_generic_pagerank.get(i).copied(),
                hypergraph_pagerank: snapshot.tool_pagerank.get(i).copied(),
                ..Default::default()
            };
            let _ = store.update_feature(NodeId::Tool(id), patch);
        }
        for (i, &id) in store.capabilities().sorted_ids().iter().enumerate() {
            let patch = crate::store::FeaturePatch {
                spectral_cluster: snapshot.capability_clusters.get(i).copied(),
                pagerank: snapshot.capability_generic_pagerank.get(i).copied(),
                heat_diffusion: snapshot.capability_pagerank.get(i).copied(),
                ..Default::default()
            };
            let _ = store.update_feature(NodeId::Capability(id), patch);
        }
        // Applying the patches above dirtied the store again; clear the bit
        // since this mutation is derived, not a structural change.
        store.recompute_incidence_if_dirty();
    }

    fn recompute(&self, store: &FeatureStore) -> Result<SpectralSnapshot, EngineError> {
        let tool_ids = store.tools().sorted_ids();
        let cap_ids = store.capabilities().sorted_ids();
        let n_tools = tool_ids.len();
        let n_caps = cap_ids.len();
        let n = n_tools + n_caps;

        let (tool_clusters, capability_clusters) = if n == 0 {
            (Vec::new(), Vec::new())
        } else {
            let embeddings = spectral_embeddings(store, &tool_ids, &cap_ids, self.spectral_k);
            let labels = kmeans_labels(&embeddings, self.spectral_k);
            (labels[..n_tools].to_vec(), labels[n_tools..].to_vec())
        };

        let hg_pr = pagerank::hypergraph_pagerank(
            store,
            self.damping,
            self.pagerank_tol,
            self.pagerank_max_iterations,
        );
        let (bipartite_tools, bipartite_caps) = pagerank::bipartite_pagerank(
            store,
            self.damping,
            self.pagerank_tol,
            self.pagerank_max_iterations,
        );
        let truncated = hg_pr.truncated || bipartite_tools.truncated;
        let tool_pagerank: Vec<f64> = hg_pr.scores.iter().map(|(_, s)| *s).collect();
        let tool_generic_pagerank: Vec<f64> =
            bipartite_tools.scores.iter().map(|(_, s)| *s).collect();
        let capability_generic_pagerank: Vec<f64> =
            bipartite_caps.scores.iter().map(|(_, s)| *s).collect();

        let capability_pagerank = heat_diffusion(store, &cap_ids, HEAT_KERNEL_T);

        Ok(SpectralSnapshot {
            content_hash: content_hash(store),
            tool_clusters,
            capability_clusters,
            tool_generic_pagerank,
            capability_generic_pagerank,
            tool_pagerank,
            capability_pagerank,
            truncated,
        })
    }

    /// Identifica o cluster ativo dado um conjunto de ferramentas de
    /// contexto: o cluster mais frequente entre elas; em empate, o de maior
    /// PageRank agregado. Retorna `-1` se `context` é vazio.
    pub fn active_cluster(&self, store: &FeatureStore, context: &[ToolId]) -> i32 {
        if context.is_empty() {
            return -1;
        }
        let mut counts: std::collections::HashMap<i32, (usize, f64)> =
            std::collections::HashMap::new();
        for &tool in context {
            let Ok(features) = store.get_features(NodeId::Tool(tool)) else {
                continue;
            };
            if features.spectral_cluster < 0 {
                continue;
            }
            let entry = counts.entry(features.spectral_cluster).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += features.hypergraph_pagerank.unwrap_or(0.0);
        }
        counts
            .into_iter()
            .max_by(|(ca, (na, pa)), (cb, (nb, pb))| {
                na.cmp(nb)
                    .then_with(|| pa.partial_cmp(pb).unwrap_or(std::cmp::Ordering::Equal))
                    .then_with(|| cb.cmp(ca)) // lower cluster id wins remaining ties
            })
            .map(|(c, _)| c)
            .unwrap_or(-1)
    }
}

/// Constrói `L_sym = I - D^{-1/2} A D^{-1/2}` do grafo bipartido tool↔capability
/// e retorna as `k` menores linhas de autovetores não-triviais para cada nó
/// (tools seguidas de capabilities, na mesma ordem de `tool_ids`/`cap_ids`).
fn spectral_embeddings(
    store: &FeatureStore,
    tool_ids: &[ToolId],
    cap_ids: &[CapabilityId],
    k: usize,
) -> Vec<Vec<f64>> {
    let n_tools = tool_ids.len();
    let n = n_tools + cap_ids.len();
    let mut adjacency = DMatrix::<f64>::zeros(n, n);
    for (cap_idx, &cap_id) in cap_ids.iter().enumerate() {
        let cap_node = n_tools + cap_idx;
        for &tool in store.incidence().tools_for_capability(cap_id) {
            if let Some(tool_idx) = tool_ids.iter().position(|&t| t == tool) {
                adjacency[(tool_idx, cap_node)] = 1.0;
                adjacency[(cap_node, tool_idx)] = 1.0;
            }
        }
    }

    let degrees: Vec<f64> = (0..n).map(|i| adjacency.row(i).sum()).collect();
    let mut l_sym = DMatrix::<f64>::identity(n, n);
    for i in 0..n {
        for j in 0..n {
            if adjacency[(i, j)] != 0.0 {
                let di = degrees[i].max(1e-12).sqrt();
                let dj = degrees[j].max(1e-12).sqrt();
                l_sym[(i, j)] -= adjacency[(i, j)] / (di * dj);
            }
        }
    }

    let eig = SymmetricEigen::new(l_sym);
    // eigenvalues ascending; column indices sorted by eigenvalue.
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[a]
            .partial_cmp(&eig.eigenvalues[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    // Skip the first (trivial, eigenvalue ~= 0) column.
    let chosen: Vec<usize> = order.into_iter().skip(1).take(k).collect();

    (0..n)
        .map(|row| {
            chosen
                .iter()
                .map(|&col| eig.eigenvectors[(row, col)])
                .collect()
        })
        .collect()
}

/// k-means com semente fixa sobre os embeddings espectrais; clusters vazios
/// são mesclados ao centróide mais próximo, empates pelo menor id
///.
fn kmeans_labels(embeddings: &[Vec<f64>], k: usize) -> Vec<i32> {
    let n = embeddings.len();
    if n == 0 {
        return Vec::new();
    }
    let k = k.min(n).max(1);
    let dim = embeddings[0].len().max(1);
    let flat: Vec<f64> = embeddings
        .iter()
        .flat_map(|row| {
            if row.is_empty() {
                vec![0.0; dim]
            } else {
                row.clone()
            }
        })
        .collect();
    let array = Array2::from_shape_vec((n, dim), flat).expect("shape matches embedding count");
    let dataset = DatasetBase::from(array);

    let rng = StdRng::seed_from_u64(KMEANS_SEED);
    let model = KMeans::params_with_rng(k, rng)
        .max_n_iterations(300)
        .tolerance(1e-6)
        .fit(&dataset);

    let mut labels: Vec<i32> = match model {
        Ok(m) => m.predict(&dataset).iter().map(|&l| l as i32).collect(),
        Err(_) => {
            // Degenerate input (e.g. all-identical rows); fall back to a
            // single cluster rather than propagating a fit failure.
            vec![0; n]
        }
    };

    merge_empty_clusters(&mut labels, k);
    labels
}

/// Garante que não haja "buracos" na numeração de clusters: um id de cluster
/// sem nenhum membro é mesclado ao próximo cluster não-vazio de menor id
///.
fn merge_empty_clusters(labels: &mut [i32], k: usize) {
    let mut present = vec![false; k];
    for &l in labels.iter() {
        if (l as usize) < k {
            present[l as usize] = true;
        }
    }
    let mut remap = vec![-1i32; k];
    let mut next_id = 0i32;
    for (old_id, &is_present) in present.iter().enumerate() {
        if is_present {
            remap[old_id] = next_id;
            next_id += 1;
        }
    }
    for l in labels.iter_mut() {
        if (*l as usize) < k && remap[*l as usize] >= 0 {
            *l = remap[*l as usize];
        } else {
            *l = 0;
        }
    }
}

/// Heat kernel diagonal sobre o grafo de projeção de capabilities (duas
/// capabilities conectadas quando compartilham >= 1 ferramenta, a mesma
/// vizinhança usada pelo termo recursivo do SHGAT):
/// `heat(i) = Σ_k exp(-t·λ_k) v_k(i)^2`.
fn heat_diffusion(store: &FeatureStore, cap_ids: &[CapabilityId], t: f64) -> Vec<f64> {
    let n = cap_ids.len();
    if n == 0 {
        return Vec::new();
    }
    let mut adjacency = DMatrix::<f64>::zeros(n, n);
    for (i, &cap) in cap_ids.iter().enumerate() {
        for neighbor in store.incidence().capabilities_sharing_tools(cap) {
            if let Some(j) = cap_ids.iter().position(|&c| c == neighbor) {
                adjacency[(i, j)] = 1.0;
            }
        }
    }
    let degrees: Vec<f64> = (0..n).map(|i| adjacency.row(i).sum()).collect();
    let mut l_sym = DMatrix::<f64>::identity(n, n);
    for i in 0..n {
        for j in 0..n {
            if adjacency[(i, j)] != 0.0 {
                let di = degrees[i].max(1e-12).sqrt();
                let dj = degrees[j].max(1e-12).sqrt();
                l_sym[(i, j)] -= adjacency[(i, j)] / (di * dj);
            }
        }
    }
    let eig = SymmetricEigen::new(l_sym);
    (0..n)
        .map(|i| {
            let mut acc = 0.0f64;
            for k in 0..n {
                let v = eig.eigenvectors[(i, k)];
                acc += (-t * eig.eigenvalues[k]).exp() * v * v;
            }
            acc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> FeatureStore {
        let mut store = FeatureStore::new(2, 1e-3);
        let t0 = store
            .upsert_tool("fs:read", vec![1.0, 0.0], "fs", "read")
            .unwrap();
        let t1 = store
            .upsert_tool("json:parse", vec![0.0, 1.0], "json", "parse")
            .unwrap();
        let t2 = store
            .upsert_tool("memory:store", vec![1.0, 1.0], "memory", "store")
            .unwrap();
        store
            .upsert_capability("cap.a", vec![1.0, 0.0], vec![t0, t1], 0.9)
            .unwrap();
        store
            .upsert_capability("cap.b", vec![0.0, 1.0], vec![t1, t2], 0.8)
            .unwrap();
        store
    }

    #[test]
    fn recompute_clears_dirty_bit_and_populates_clusters() {
        let mut store = seeded_store();
        let mut clusterer = SpectralClusterer::new(2, 0.85, 1e-6, 100);
        clusterer.recompute_if_needed(&mut store).unwrap();
        assert!(!store.is_dirty());
        let t0 = store.tool_id_by_external("fs:read").unwrap();
        let features = store.get_features(NodeId::Tool(t0)).unwrap();
        assert!(features.spectral_cluster >= 0);
        assert!(features.hypergraph_pagerank.is_some());
    }

    #[test]
    fn recompute_is_idempotent_when_clean() {
        let mut store = seeded_store();
        let mut clusterer = SpectralClusterer::new(2, 0.85, 1e-6, 100);
        clusterer.recompute_if_needed(&mut store).unwrap();
        let hash_before = clusterer.cache.current().unwrap().content_hash;
        clusterer.recompute_if_needed(&mut store).unwrap();
        let hash_after = clusterer.cache.current().unwrap().content_hash;
        assert_eq!(hash_before, hash_after);
    }

    #[test]
    fn active_cluster_is_negative_one_for_empty_context() {
        let mut store = seeded_store();
        let mut clusterer = SpectralClusterer::new(2, 0.85, 1e-6, 100);
        clusterer.recompute_if_needed(&mut store).unwrap();
        assert_eq!(clusterer.active_cluster(&store, &[]), -1);
    }
}
