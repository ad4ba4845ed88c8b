use candle_core::{Result, Tensor, D};
use candle_nn::encoding::one_hot;
use candle_nn::ops::log_softmax;

/// Share of the focal term in the blended loss; the smoothed term gets the rest.
pub const FOCAL_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Copy)]
pub struct LossConfig {
    /// Focal exponent, 0 disables the focal factor
    pub gamma: f64,
    /// Label-smoothing epsilon, 0 disables the smoothed term
    pub smoothing: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            gamma: 2.0,
            smoothing: 0.1,
        }
    }
}

/// Class-weighted focal cross-entropy blended with label-smoothed
/// cross-entropy, averaged over the batch.
///
/// * `logits`: `[batch, K]` float
/// * `targets`: `[batch]` u32 gold ids
/// * `class_weights`: optional `[K]` float, applied to the focal term only
///
/// The focal factor `(1 - p_true)^gamma` is computed from detached
/// probabilities, so it scales the gradient without contributing its own.
pub fn composite_loss(
    logits: &Tensor,
    targets: &Tensor,
    class_weights: Option<&Tensor>,
    config: &LossConfig,
) -> Result<Tensor> {
    let num_labels = logits.dim(D::Minus1)?;
    let log_probs = log_softmax(logits, D::Minus1)?;
    let gold = log_probs.gather(&targets.unsqueeze(1)?, 1)?.squeeze(1)?;

    let mut per_example = gold.neg()?;
    if let Some(weights) = class_weights {
        per_example = (per_example * weights.index_select(targets, 0)?)?;
    }
    if config.gamma > 0.0 {
        let p_true = gold.detach().exp()?.clamp(1e-6, 1.0)?;
        let factor = p_true.affine(-1.0, 1.0)?.powf(config.gamma)?;
        per_example = (per_example * factor)?;
    }
    let focal = per_example.mean_all()?;
    if config.smoothing <= 0.0 {
        return Ok(focal);
    }

    let eps = config.smoothing;
    let k = num_labels as f64;
    let on = (1.0 - eps + eps / k) as f32;
    let off = (eps / k) as f32;
    let soft = one_hot(targets.clone(), num_labels, on, off)?;
    let smoothed = (soft * &log_probs)?.sum(D::Minus1)?.neg()?.mean_all()?;

    (focal * FOCAL_SHARE)? + (smoothed * (1.0 - FOCAL_SHARE))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    const LN2: f32 = std::f32::consts::LN_2;

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    fn plain() -> LossConfig {
        LossConfig {
            gamma: 0.0,
            smoothing: 0.0,
        }
    }

    #[test]
    fn test_plain_cross_entropy() {
        let logits = Tensor::new(&[[0f32, 0.0]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[0u32], &Device::Cpu).unwrap();
        let loss = composite_loss(&logits, &targets, None, &plain()).unwrap();
        assert!((scalar(&loss) - LN2).abs() < 1e-5);
    }

    #[test]
    fn test_class_weight_scales_loss() {
        let logits = Tensor::new(&[[0f32, 0.0]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[0u32], &Device::Cpu).unwrap();
        let weights = Tensor::new(&[2f32, 0.5], &Device::Cpu).unwrap();
        let loss = composite_loss(&logits, &targets, Some(&weights), &plain()).unwrap();
        assert!((scalar(&loss) - 2.0 * LN2).abs() < 1e-5);
    }

    #[test]
    fn test_focal_and_smoothing_blend() {
        // p_true = 0.5: focal = 0.25 * ln2, smoothed = ln2
        let logits = Tensor::new(&[[0f32, 0.0]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[0u32], &Device::Cpu).unwrap();
        let loss = composite_loss(&logits, &targets, None, &LossConfig::default()).unwrap();
        let expected = 0.8 * 0.25 * LN2 + 0.2 * LN2;
        assert!((scalar(&loss) - expected).abs() < 1e-5);
    }

    #[test]
    fn test_class_weights_apply_to_focal_term_only() {
        let logits = Tensor::new(&[[1f32, -0.5, 0.3], [0.2, 0.8, -1.0]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[0u32, 2], &Device::Cpu).unwrap();
        let weights = Tensor::new(&[0.7f32, 1.5, 0.8], &Device::Cpu).unwrap();
        let loss = composite_loss(&logits, &targets, Some(&weights), &LossConfig::default()).unwrap();
        // focal (weighted) = 0.797054, smoothed (unweighted) = 1.427193
        assert!((scalar(&loss) - 0.923_081_9).abs() < 1e-5);
        // weighting the smoothed term too would give 0.859839
        assert!((scalar(&loss) - 0.859_839_2).abs() > 1e-2);
    }

    #[test]
    fn test_focal_downweights_easy_examples() {
        let logits = Tensor::new(&[[4f32, 0.0, 0.0]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[0u32], &Device::Cpu).unwrap();
        let ce = composite_loss(&logits, &targets, None, &plain()).unwrap();
        let focal = composite_loss(
            &logits,
            &targets,
            None,
            &LossConfig {
                gamma: 2.0,
                smoothing: 0.0,
            },
        )
        .unwrap();
        assert!(scalar(&focal) < scalar(&ce) * 0.01);
    }

    #[test]
    fn test_gradient_flows_to_logits() {
        let logits = Var::new(&[[0.5f32, -0.2, 0.1], [0.0, 1.0, -1.0]], &Device::Cpu).unwrap();
        let targets = Tensor::new(&[0u32, 2], &Device::Cpu).unwrap();
        let loss = composite_loss(logits.as_tensor(), &targets, None, &LossConfig::default()).unwrap();
        let grads = loss.backward().unwrap();
        let grad = grads.get(logits.as_tensor()).unwrap().to_vec2::<f32>().unwrap();
        // pushing the gold logit up lowers the loss
        assert!(grad[0][0] < 0.0);
        assert!(grad[1][2] < 0.0);
        assert!(grad[1][1] > 0.0);
    }
}
