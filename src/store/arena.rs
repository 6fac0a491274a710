//! Arenas densas indexadas por `u32` para nós `Tool` e `Capability`
//!.

use crate::types::{CapabilityId, Embedding, ToolId};
use serde::{Deserialize, Serialize};

/// Metadados de um nó `Tool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMeta {
    pub external_id: String,
    pub server_id: String,
    pub name: String,
}

/// Um nó `Tool` vivo na arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolNode {
    pub id: ToolId,
    pub embedding: Embedding,
    pub meta: ToolMeta,
}

/// Um nó `Capability` vivo na arena, junto das ferramentas que observou em uso.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityNode {
    pub id: CapabilityId,
    pub external_id: String,
    pub embedding: Embedding,
    /// Multiset de ferramentas na ordem de execução observada; usado para
    /// derivar o split fonte/alvo do hiperedge.
    pub tools_used: Vec<ToolId>,
    pub success_rate: f64,
    pub usage_count: u64,
}

/// Arena densa `Vec`-backed para nós `Tool`, indexada por [`ToolId`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolArena {
    nodes: Vec<ToolNode>,
}

impl ToolArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn insert(&mut self, embedding: Embedding, meta: ToolMeta) -> ToolId {
        let id = ToolId(self.nodes.len() as u32);
        self.nodes.push(ToolNode { id, embedding, meta });
        id
    }

    pub fn get(&self, id: ToolId) -> Option<&ToolNode> {
        self.nodes.get(id.index())
    }

    pub fn get_mut(&mut self, id: ToolId) -> Option<&mut ToolNode> {
        self.nodes.get_mut(id.index())
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Option<ToolId> {
        self.nodes
            .iter()
            .find(|n| n.meta.external_id == external_id)
            .map(|n| n.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolNode> {
        self.nodes.iter()
    }

    /// Ids ordenados, usados no hash de conteúdo do cache espectral
    ///.
    pub fn sorted_ids(&self) -> Vec<ToolId> {
        let mut ids: Vec<ToolId> = self.nodes.iter().map(|n| n.id).collect();
        ids.sort();
        ids
    }
}

/// Arena densa `Vec`-backed para nós `Capability`, indexada por [`CapabilityId`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityArena {
    nodes: Vec<CapabilityNode>,
}

impl CapabilityArena {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn insert(
        &mut self,
        external_id: String,
        embedding: Embedding,
        tools_used: Vec<ToolId>,
        success_rate: f64,
    ) -> CapabilityId {
        let id = CapabilityId(self.nodes.len() as u32);
        self.nodes.push(CapabilityNode {
            id,
            external_id,
            embedding,
            tools_used,
            success_rate,
            usage_count: 0,
        });
        id
    }

    pub fn get(&self, id: CapabilityId) -> Option<&CapabilityNode> {
        self.nodes.get(id.index())
    }

    pub fn get_mut(&mut self, id: CapabilityId) -> Option<&mut CapabilityNode> {
        self.nodes.get_mut(id.index())
    }

    pub fn find_by_external_id(&self, external_id: &str) -> Option<CapabilityId> {
        self.nodes
            .iter()
            .find(|n| n.external_id == external_id)
            .map(|n| n.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CapabilityNode> {
        self.nodes.iter()
    }

    pub fn sorted_ids(&self) -> Vec<CapabilityId> {
        let mut ids: Vec<CapabilityId> = self.nodes.iter().map(|n| n.id).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_arena_round_trips() {
        let mut arena = ToolArena::new();
        let id = arena.insert(
            Embedding::new_unchecked(vec![1.0, 0.0]),
            ToolMeta {
                external_id: "fs:read".into(),
                server_id: "fs".into(),
                name: "read".into(),
            },
        );
        assert_eq!(arena.get(id).unwrap().meta.external_id, "fs:read");
        assert_eq!(arena.find_by_external_id("fs:read"), Some(id));
    }

    #[test]
    fn capability_arena_tracks_usage() {
        let mut arena = CapabilityArena::new();
        let id = arena.insert(
            "cap.fs.read_json".into(),
            Embedding::new_unchecked(vec![1.0, 0.0]),
            vec![ToolId(0), ToolId(1)],
            0.9,
        );
        arena.get_mut(id).unwrap().usage_count += 1;
        assert_eq!(arena.get(id).unwrap().usage_count, 1);
    }
}
