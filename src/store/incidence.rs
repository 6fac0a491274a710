//! Matriz de incidência esparsa tool×capability e os hiperedges derivados
//! dela.
//!
//! `CsrIncidence` é reconstruída via rebuild-and-swap a cada mudança no
//! conjunto de nós — nunca editada in-place — e os hiperedges são derivados
//! deterministicamente da ordem de execução observada de cada capability
//! (primeira metade = fontes, segunda metade = alvos; empates por id
//! lexicográfico).

use crate::store::arena::{CapabilityArena, ToolArena};
use crate::types::{CapabilityId, ToolId};
use std::collections::BTreeSet;

/// Um hiperedge: uma capability vista como aresta direcionada de um conjunto
/// de ferramentas-fonte para um conjunto de ferramentas-alvo.
#[derive(Debug, Clone)]
pub struct Hyperedge {
    pub id: CapabilityId,
    pub sources: BTreeSet<ToolId>,
    pub targets: BTreeSet<ToolId>,
    /// `w(H) = 1 / max(eps, successRate(H))`.
    pub weight: f64,
}

/// Deriva o split fonte/alvo de uma capability a partir da ordem de execução
/// observada: primeira metade é fonte, segunda metade é alvo; em caso de
/// contagem ímpar a ferramenta do meio pertence à metade-alvo (convenção
/// "segunda metade inclui o restante"). A ordem de execução em `tools_used`
/// é a chave primária e nunca é re-ordenada por id; repetições do mesmo
/// `ToolId` (o único jeito de duas entradas "empatarem" de posição) colapsam
/// na primeira ocorrência, quebrando o empate lexicograficamente por id.
pub fn derive_source_target_split(tools_used: &[ToolId]) -> (BTreeSet<ToolId>, BTreeSet<ToolId>) {
    if tools_used.is_empty() {
        return (BTreeSet::new(), BTreeSet::new());
    }
    let mut seen = BTreeSet::new();
    let mut ordered = Vec::with_capacity(tools_used.len());
    for &id in tools_used {
        if seen.insert(id) {
            ordered.push(id);
        }
    }
    let split = ordered.len() / 2;
    let (first, second) = ordered.split_at(split);
    let sources: BTreeSet<ToolId> = first.iter().copied().collect();
    let targets: BTreeSet<ToolId> = second.iter().copied().collect();
    if targets.is_empty() {
        // Single-tool capability: it is both its own source and target so the
        // hyperedge remains well-formed (non-empty source and target sets).
        return (sources.clone(), sources);
    }
    (sources, targets)
}

pub fn hyperedge_weight(success_rate: f64, epsilon: f64) -> f64 {
    1.0 / success_rate.max(epsilon)
}

/// Constrói o conjunto de hiperedges a partir das arenas atuais. Chamado a
/// cada rebuild-and-swap.
pub fn build_hyperedges(capabilities: &CapabilityArena, epsilon: f64) -> Vec<Hyperedge> {
    capabilities
        .iter()
        .map(|cap| {
            let (sources, targets) = derive_source_target_split(&cap.tools_used);
            Hyperedge {
                id: cap.id,
                sources,
                targets,
                weight: hyperedge_weight(cap.success_rate, epsilon),
            }
        })
        .collect()
}

/// Matriz de incidência esparsa tool×capability em formato compressed-sparse,
/// com ordenação determinística de linhas e colunas por id.
#[derive(Debug, Clone, Default)]
pub struct CsrIncidence {
    /// Para cada tool (por índice denso), os ids de capability que a usam.
    tool_to_capabilities: Vec<Vec<CapabilityId>>,
    /// Para cada capability (por índice denso), os ids de tool que ela usa.
    capability_to_tools: Vec<Vec<ToolId>>,
}

impl CsrIncidence {
    /// Reconstrói a matriz a partir do zero em O(nnz).
    pub fn rebuild(tools: &ToolArena, capabilities: &CapabilityArena) -> Self {
        let mut tool_to_capabilities = vec![Vec::new(); tools.len()];
        let mut capability_to_tools = vec![Vec::new(); capabilities.len()];

        for cap in capabilities.iter() {
            let mut seen: BTreeSet<ToolId> = BTreeSet::new();
            for &tool_id in &cap.tools_used {
                if !seen.insert(tool_id) {
                    continue;
                }
                if let Some(row) = tool_to_capabilities.get_mut(tool_id.index()) {
                    row.push(cap.id);
                }
            }
            capability_to_tools[cap.id.index()] = seen.into_iter().collect();
        }

        for row in tool_to_capabilities.iter_mut() {
            row.sort();
        }

        Self {
            tool_to_capabilities,
            capability_to_tools,
        }
    }

    pub fn capabilities_for_tool(&self, tool: ToolId) -> &[CapabilityId] {
        self.tool_to_capabilities
            .get(tool.index())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn tools_for_capability(&self, cap: CapabilityId) -> &[ToolId] {
        self.capability_to_tools
            .get(cap.index())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn num_tools(&self) -> usize {
        self.tool_to_capabilities.len()
    }

    pub fn num_capabilities(&self) -> usize {
        self.capability_to_tools.len()
    }

    pub fn nnz(&self) -> usize {
        self.capability_to_tools.iter().map(|v| v.len()).sum()
    }

    /// Todos os pares `(tool, capability)` ordenados, usados pelo hash de
    /// conteúdo do cache espectral.
    pub fn sorted_pairs(&self) -> Vec<(ToolId, CapabilityId)> {
        let mut pairs = Vec::with_capacity(self.nnz());
        for (cap_idx, tools) in self.capability_to_tools.iter().enumerate() {
            for &tool in tools {
                pairs.push((tool, CapabilityId(cap_idx as u32)));
            }
        }
        pairs.sort();
        pairs
    }

    /// Duas capabilities "compartilham pelo menos uma ferramenta" quando a
    /// interseção de suas linhas de incidência é não-vazia — usado pela
    /// vizinhança do termo recursivo do SHGAT.
    pub fn capabilities_sharing_tools(&self, cap: CapabilityId) -> BTreeSet<CapabilityId> {
        let mut neighbors = BTreeSet::new();
        for &tool in self.tools_for_capability(cap) {
            for &other in self.capabilities_for_tool(tool) {
                if other != cap {
                    neighbors.insert(other);
                }
            }
        }
        neighbors
    }
}
