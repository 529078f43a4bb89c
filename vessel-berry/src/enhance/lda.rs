//! 两类线性判别分析.

use nalgebra::{DMatrix, DVector};

use crate::error::{Stage, VesselError, VesselResult};

/// 协方差对角线正则化系数 (相对平均方差).
const RIDGE_REGULARIZATION: f64 = 1e-6;

/// 两类 (目标/背景) 等先验的线性判别器.
///
/// 训练时特征先按两类样本的整体均值和标准差标准化, 再以合并协方差求判别方向.
/// 标准化被折叠进权重, 因此预测时直接作用于原始特征.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearDiscriminant {
    weights: Vec<f64>,
    bias: f64,
}

impl LinearDiscriminant {
    /// 由两类样本训练. 每个样本是等长的特征向量.
    ///
    /// 任一类没有样本, 或特征长度不一致时返回 `StageFailure` 错误.
    pub fn fit(object: &[Vec<f64>], background: &[Vec<f64>]) -> VesselResult<Self> {
        let (n0, n1) = (object.len(), background.len());
        if n0 == 0 || n1 == 0 {
            return Err(VesselError::stage(
                Stage::Enhance,
                format!("discriminant needs both classes, got {n0} object and {n1} background samples"),
            ));
        }
        let d = object[0].len();
        if object.iter().chain(background).any(|x| x.len() != d) || d == 0 {
            return Err(VesselError::stage(Stage::Enhance, "inconsistent feature length"));
        }

        // 全体样本的均值与标准差.
        let all = || object.iter().chain(background.iter());
        let n = (n0 + n1) as f64;
        let mean: DVector<f64> = all().fold(DVector::zeros(d), |acc, x| acc + DVector::from_column_slice(x)) / n;
        let var: DVector<f64> = all().fold(DVector::zeros(d), |acc, x| {
            let c = DVector::from_column_slice(x) - &mean;
            acc + c.component_mul(&c)
        }) / n;
        let scale = var.map(|v| if v > 0.0 { v.sqrt() } else { 1.0 });
        let standardize = |x: &Vec<f64>| (DVector::from_column_slice(x) - &mean).component_div(&scale);

        let class_mean = |xs: &[Vec<f64>]| {
            xs.iter().fold(DVector::zeros(d), |acc, x| acc + standardize(x)) / xs.len() as f64
        };
        let (m0, m1) = (class_mean(object), class_mean(background));

        let mut cov = DMatrix::<f64>::zeros(d, d);
        for (xs, m) in [(object, &m0), (background, &m1)] {
            for x in xs {
                let c = standardize(x) - m;
                cov += &c * c.transpose();
            }
        }
        let dof = (n0 + n1).saturating_sub(2).max(1) as f64;
        cov /= dof;
        let reg = RIDGE_REGULARIZATION * (cov.trace() / d as f64).max(1.0);
        for i in 0..d {
            cov[(i, i)] += reg;
        }

        let diff = &m0 - &m1;
        let w = match cov.clone().cholesky() {
            Some(ch) => ch.solve(&diff),
            None => cov
                .try_inverse()
                .map(|inv| inv * &diff)
                .ok_or_else(|| VesselError::stage(Stage::Enhance, "singular feature covariance"))?,
        };
        let b = -0.5 * w.dot(&(&m0 + &m1));

        // 折叠标准化: w·((x - mean) / scale) + b.
        let weights: Vec<f64> = w.iter().zip(scale.iter()).map(|(w, s)| w / s).collect();
        let bias = b - weights.iter().zip(mean.iter()).map(|(w, m)| w * m).sum::<f64>();
        if weights.iter().any(|v| !v.is_finite()) || !bias.is_finite() {
            return Err(VesselError::degenerate(Stage::Enhance, "non-finite discriminant weights"));
        }
        Ok(Self { weights, bias })
    }

    /// 原始特征上的权重.
    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// 偏置.
    #[inline]
    pub fn bias(&self) -> f64 {
        self.bias
    }

    /// 目标类相对背景类的对数几率.
    #[inline]
    pub fn log_odds(&self, x: &[f64]) -> f64 {
        self.weights.iter().zip(x).map(|(w, x)| w * x).sum::<f64>() + self.bias
    }

    /// 目标类的后验概率.
    #[inline]
    pub fn object_probability(&self, x: &[f64]) -> f64 {
        sigmoid(self.log_odds(x))
    }
}

/// 数值稳定的 logistic 函数.
#[inline]
pub fn sigmoid(t: f64) -> f64 {
    if t >= 0.0 {
        1.0 / (1.0 + (-t).exp())
    } else {
        let e = t.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cloud(rng: &mut StdRng, center: [f64; 3], n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|_| center.iter().map(|c| *c + rng.gen_range(-1.0f64..1.0)).collect())
            .collect()
    }

    #[test]
    fn test_separable_classes() {
        let mut rng = StdRng::seed_from_u64(7);
        let object = cloud(&mut rng, [5.0, 0.0, 100.0], 200);
        let background = cloud(&mut rng, [0.0, 0.0, 100.0], 300);
        let lda = LinearDiscriminant::fit(&object, &background).unwrap();
        assert!(lda.object_probability(&[5.0, 0.0, 100.0]) > 0.99);
        assert!(lda.object_probability(&[0.0, 0.0, 100.0]) < 0.01);
        // 判别方向主要沿第一维.
        let w = lda.weights();
        assert!(w[0].abs() > 5.0 * w[1].abs());
        assert!(w[0].abs() > 5.0 * w[2].abs());
    }

    #[test]
    fn test_constant_feature_is_harmless() {
        let object = vec![vec![1.0, 3.0], vec![1.2, 3.0], vec![0.9, 3.0]];
        let background = vec![vec![0.0, 3.0], vec![-0.1, 3.0], vec![0.2, 3.0]];
        let lda = LinearDiscriminant::fit(&object, &background).unwrap();
        assert!(lda.log_odds(&[1.0, 3.0]) > 0.0);
        assert!(lda.log_odds(&[0.0, 3.0]) < 0.0);
    }

    #[test]
    fn test_missing_class() {
        let err = LinearDiscriminant::fit(&[vec![1.0]], &[]).unwrap_err();
        assert_eq!(err.failed_stage(), Some(Stage::Enhance));
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-12);
        assert!(sigmoid(-800.0) >= 0.0 && sigmoid(800.0) <= 1.0);
    }
}
