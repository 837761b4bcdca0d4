//! Pooling of model outputs into sentence vectors, and L2 normalization

use ndarray::ArrayView1;

use crate::shape::OutputKind;
use crate::tokenizer::TokenizedBatch;

/// Masked mean over token vectors.
///
/// `hidden` is one row's `[T * H]` output, row-major; `mask` has `T` entries.
/// Positions with a zero mask are left out of both sum and count. An all-zero
/// mask yields a zero vector.
pub fn mean_pool(hidden: &[f32], mask: ArrayView1<'_, i64>, hidden_dim: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_dim];
    let mut count = 0usize;

    for (token, token_vec) in mask.iter().zip(hidden.chunks_exact(hidden_dim)) {
        if *token == 0 {
            continue;
        }
        for (acc, value) in sum.iter_mut().zip(token_vec) {
            *acc += value;
        }
        count += 1;
    }

    if count > 0 {
        let scale = 1.0 / count as f32;
        for value in &mut sum {
            *value *= scale;
        }
    }

    sum
}

/// Scale `vector` to unit length in place; an all-zero vector is left as is
pub fn l2_normalize(vector: &mut [f32]) {
    let sum_sq: f64 = vector.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
    if sum_sq == 0.0 {
        return;
    }
    let inv = (1.0 / sum_sq.sqrt()) as f32;
    for value in vector.iter_mut() {
        *value *= inv;
    }
}

/// Reduce a batch's flat output buffer to one vector per text.
///
/// `data` must hold `B * H` values for [`OutputKind::Pooled`] and `B * T * H`
/// for [`OutputKind::PerToken`]; the caller checks the shape beforehand.
pub fn pool_batch(
    kind: OutputKind,
    data: &[f32],
    batch: &TokenizedBatch,
    hidden_dim: usize,
) -> Vec<Vec<f32>> {
    match kind {
        OutputKind::Pooled => data
            .chunks_exact(hidden_dim)
            .take(batch.batch_size())
            .map(<[f32]>::to_vec)
            .collect(),
        OutputKind::PerToken => {
            let stride = batch.seq_len() * hidden_dim;
            (0..batch.batch_size())
                .map(|row| {
                    let start = row * stride;
                    mean_pool(&data[start..start + stride], batch.mask_row(row), hidden_dim)
                })
                .collect()
        }
    }
}

/// Compute cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}
