//! Stochastic Gradient Descent with momentum

use ndarray::Array1;

/// SGD optimizer with optional momentum, one velocity per parameter slot
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: f32,
    momentum: f32,
    velocities: Vec<Option<Array1<f32>>>,
}

impl Sgd {
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self {
            lr,
            momentum,
            velocities: Vec::new(),
        }
    }

    /// Update `params[i]` with `grads[i]`
    pub fn step(&mut self, params: &mut [&mut Array1<f32>], grads: &[Array1<f32>]) {
        if self.velocities.len() != params.len() {
            self.velocities = vec![None; params.len()];
        }

        for ((param, grad), slot) in params.iter_mut().zip(grads).zip(&mut self.velocities) {
            if self.momentum > 0.0 {
                // v = momentum * v - lr * grad
                let velocity = match slot.take() {
                    Some(v) => v * self.momentum - grad * self.lr,
                    None => grad * (-self.lr),
                };
                **param += &velocity;
                *slot = Some(velocity);
            } else {
                **param -= &(grad * self.lr);
            }
        }
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }

    pub fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    /// Forget accumulated momentum
    pub fn reset(&mut self) {
        self.velocities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr1;

    #[test]
    fn test_plain_sgd_step() {
        let mut sgd = Sgd::new(0.1, 0.0);
        let mut w = arr1(&[1.0, 2.0]);
        sgd.step(&mut [&mut w], &[arr1(&[1.0, -1.0])]);
        assert_abs_diff_eq!(w[0], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(w[1], 2.1, epsilon = 1e-6);
    }

    #[test]
    fn test_momentum_accumulates() {
        let mut sgd = Sgd::new(0.1, 0.9);
        let mut w = arr1(&[0.0]);
        let grad = [arr1(&[1.0])];
        sgd.step(&mut [&mut w], &grad);
        assert_abs_diff_eq!(w[0], -0.1, epsilon = 1e-6);
        sgd.step(&mut [&mut w], &grad);
        // v = 0.9 * -0.1 - 0.1 = -0.19
        assert_abs_diff_eq!(w[0], -0.29, epsilon = 1e-6);
    }

    #[test]
    fn test_set_lr() {
        let mut sgd = Sgd::new(0.1, 0.0);
        sgd.set_lr(0.0);
        let mut w = arr1(&[3.0]);
        sgd.step(&mut [&mut w], &[arr1(&[5.0])]);
        assert_eq!(w[0], 3.0);
        assert_eq!(sgd.lr(), 0.0);
    }
}
