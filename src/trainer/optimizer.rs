//! Otimizador Adam escalar, independente de qualquer framework de tensores
//!: alguns parâmetros escalares/afins não justificam uma
//! dependência de tensor.

/// Estado do Adam por parâmetro: os dois momentos `m` e `v`.
#[derive(Debug, Clone)]
pub struct AdamState {
    pub m: Vec<f64>,
    pub v: Vec<f64>,
    pub t: u64,
}

/// Hiperparâmetros do Adam.
#[derive(Debug, Clone, Copy)]
pub struct AdamConfig {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub l2_lambda: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            l2_lambda: 1e-4,
        }
    }
}

impl AdamState {
    pub fn new(num_params: usize) -> Self {
        Self {
            m: vec![0.0; num_params],
            v: vec![0.0; num_params],
            t: 0,
        }
    }

    /// Aplica um passo de Adam com regularização L2 a `params`, dado o
    /// `gradients` acumulado do mini-batch.
    pub fn step(&mut self, params: &mut [f64], gradients: &[f64], cfg: &AdamConfig) {
        debug_assert_eq!(params.len(), gradients.len());
        debug_assert_eq!(params.len(), self.m.len());
        self.t += 1;
        let t = self.t as i32;
        let bias_correction1 = 1.0 - cfg.beta1.powi(t);
        let bias_correction2 = 1.0 - cfg.beta2.powi(t);

        for i in 0..params.len() {
            let g = gradients[i] + cfg.l2_lambda * params[i];
            self.m[i] = cfg.beta1 * self.m[i] + (1.0 - cfg.beta1) * g;
            self.v[i] = cfg.beta2 * self.v[i] + (1.0 - cfg.beta2) * g * g;
            let m_hat = self.m[i] / bias_correction1;
            let v_hat = self.v[i] / bias_correction2;
            params[i] -= cfg.learning_rate * m_hat / (v_hat.sqrt() + cfg.epsilon);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_moves_params_toward_lower_loss_direction() {
        let mut params = vec![1.0];
        let mut state = AdamState::new(1);
        let cfg = AdamConfig::default();
        // Positive gradient should decrease the parameter.
        state.step(&mut params, &[1.0], &cfg);
        assert!(params[0] < 1.0);
    }

    #[test]
    fn deterministic_given_same_inputs() {
        let cfg = AdamConfig::default();
        let mut p1 = vec![0.5, -0.2];
        let mut s1 = AdamState::new(2);
        let mut p2 = vec![0.5, -0.2];
        let mut s2 = AdamState::new(2);
        for _ in 0..5 {
            s1.step(&mut p1, &[0.1, -0.05], &cfg);
            s2.step(&mut p2, &[0.1, -0.05], &cfg);
        }
        assert_eq!(p1, p2);
    }
}
