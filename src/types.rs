//! Tipos de domínio compartilhados: identificadores de arena e embeddings.
//!
//! Tools e capabilities vivem em arenas densas indexadas por `u32` (ver
//! `store::arena`); o identificador estável voltado ao chamador (`"fs:read"`,
//! `"cap.fs.read_json"`) é mantido à parte e usado nos desempates por hash.

use serde::{Deserialize, Serialize};

/// Índice de arena para um nó `Tool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ToolId(pub u32);

/// Índice de arena para um nó `Capability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityId(pub u32);

impl ToolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl CapabilityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tool#{}", self.0)
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cap#{}", self.0)
    }
}

/// Wrapper newtype para vetores de embedding semântico.
///
/// A dimensão é um parâmetro de construção do [`crate::store::FeatureStore`],
/// não uma constante de crate: o motor pode falar com provedores de
/// embeddings de dimensões diferentes entre instâncias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(pub Vec<f64>);

impl Embedding {
    /// Cria um embedding validando dimensionalidade esperada.
    pub fn new(values: Vec<f64>, expected_dim: usize) -> Result<Self, String> {
        if values.len() != expected_dim {
            return Err(format!(
                "invalid embedding dimension: {} (expected {expected_dim})",
                values.len()
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err("embedding contains non-finite values".to_string());
        }
        Ok(Self(values))
    }

    /// Cria embedding sem validação de dimensão (uso interno controlado).
    pub fn new_unchecked(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Normaliza L2 in-place, deixando vetores quase-nulos inalterados.
    pub fn l2_normalize(&mut self) {
        let normalized = crate::vector::l2_normalize(&self.0);
        self.0 = normalized;
    }
}

impl std::ops::Deref for Embedding {
    type Target = Vec<f64>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<f64>> for Embedding {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_dimension() {
        assert!(Embedding::new(vec![0.1, 0.2], 3).is_err());
    }

    #[test]
    fn rejects_non_finite() {
        assert!(Embedding::new(vec![0.1, f64::NAN], 2).is_err());
    }

    #[test]
    fn accepts_valid() {
        let e = Embedding::new(vec![1.0, 0.0, 0.0], 3).unwrap();
        assert_eq!(e.dimension(), 3);
    }
}
