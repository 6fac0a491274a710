//! Cache de conteúdo-endereçável para o resultado da reconstrução espectral
//!.
//!
//! A chave é um hash sobre `(ids de tool ordenados, ids de capability
//! ordenados, pares de incidência ordenados)`; `restoreFromCacheIfValid` é o
//! caminho rápido, qualquer miss dispara recomputação completa seguida de
//! troca atômica — o mesmo discipline de rebuild-and-swap usado pela
//! incidência (`store::incidence::CsrIncidence`).

use crate::store::FeatureStore;
use crate::types::{CapabilityId, ToolId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Snapshot imutável do resultado de uma reconstrução espectral completa.
#[derive(Debug, Clone, Default)]
pub struct SpectralSnapshot {
    pub content_hash: u64,
    /// Cluster espectral por tool, na ordem de `FeatureStore::tools().sorted_ids()`.
    pub tool_clusters: Vec<i32>,
    /// Cluster espectral por capability, na ordem de
    /// `FeatureStore::capabilities().sorted_ids()`.
    pub capability_clusters: Vec<i32>,
    /// PageRank genérico bipartido (`NodeFeatures::pagerank`), por tool.
    pub tool_generic_pagerank: Vec<f64>,
    /// PageRank genérico bipartido (`NodeFeatures::pagerank`), por capability.
    pub capability_generic_pagerank: Vec<f64>,
    /// PageRank de hipergrafo literal, cacheado só em tools.
    pub tool_pagerank: Vec<f64>,
    /// Heat-diffusion score, cacheado só em capabilities.
    pub capability_pagerank: Vec<f64>,
    pub truncated: bool,
}

/// Hash de conteúdo sobre o estado observável da store relevante para o
/// recomputo espectral: ids de nó e pares de incidência, todos ordenados
/// para que a chave seja independente da ordem de inserção.
pub fn content_hash(store: &FeatureStore) -> u64 {
    let mut hasher = DefaultHasher::new();
    let tool_ids: Vec<ToolId> = store.tools().sorted_ids();
    let cap_ids: Vec<CapabilityId> = store.capabilities().sorted_ids();
    tool_ids.hash(&mut hasher);
    cap_ids.hash(&mut hasher);
    store.incidence().sorted_pairs().hash(&mut hasher);
    hasher.finish()
}

/// Cache de um único slot: mantém o último snapshot válido e permite o
/// caminho rápido de restauração.
#[derive(Debug, Clone, Default)]
pub struct SpectralCache {
    snapshot: Option<SpectralSnapshot>,
}

impl SpectralCache {
    pub fn new() -> Self {
        Self { snapshot: None }
    }

    /// Caminho rápido: retorna o snapshot cacheado se o hash de conteúdo bate
    /// com o estado atual da store.
    pub fn restore_if_valid(&self, store: &FeatureStore) -> Option<&SpectralSnapshot> {
        let current = content_hash(store);
        self.snapshot
            .as_ref()
            .filter(|s| s.content_hash == current)
    }

    /// Substitui o snapshot atomicamente (rebuild-and-swap, nunca mutação
    /// parcial do snapshot anterior).
    pub fn replace(&mut self, snapshot: SpectralSnapshot) {
        self.snapshot = Some(snapshot);
    }

    pub fn current(&self) -> Option<&SpectralSnapshot> {
        self.snapshot.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_has_stable_hash() {
        let store = FeatureStore::new(3, 1e-3);
        let h1 = content_hash(&store);
        let h2 = content_hash(&store);
        assert_eq!(h1, h2);
    }

    #[test]
    fn mutation_changes_hash() {
        let mut store = FeatureStore::new(3, 1e-3);
        let h1 = content_hash(&store);
        store
            .upsert_tool("fs:read", vec![1.0, 0.0, 0.0], "fs", "read")
            .unwrap();
        store.recompute_incidence_if_dirty();
        let h2 = content_hash(&store);
        assert_ne!(h1, h2);
    }

    #[test]
    fn cache_restores_only_when_hash_matches() {
        let mut store = FeatureStore::new(3, 1e-3);
        store
            .upsert_tool("fs:read", vec![1.0, 0.0, 0.0], "fs", "read")
            .unwrap();
        store.recompute_incidence_if_dirty();
        let mut cache = SpectralCache::new();
        assert!(cache.restore_if_valid(&store).is_none());
        cache.replace(SpectralSnapshot {
            content_hash: content_hash(&store),
            ..Default::default()
        });
        assert!(cache.restore_if_valid(&store).is_some());
        store
            .upsert_tool("fs:write", vec![0.0, 1.0, 0.0], "fs", "write")
            .unwrap();
        store.recompute_incidence_if_dirty();
        assert!(cache.restore_if_valid(&store).is_none());
    }
}
