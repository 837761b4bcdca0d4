//! Resolution of the model's output layout at load time

use tracing::{debug, info};

use sentvec_core::{EncoderConfig, Error, Result};

use crate::engine::ModelSignature;

/// How the model's output relates to sentences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// `[B, H]`: one vector per text, used as is
    Pooled,
    /// `[B, T, H]`: one vector per token, mean-pooled under the attention mask
    PerToken,
}

impl OutputKind {
    pub fn rank(self) -> usize {
        match self {
            OutputKind::Pooled => 2,
            OutputKind::PerToken => 3,
        }
    }

    /// Output shape to request for a batch
    pub fn output_shape(self, batch_size: usize, seq_len: usize, hidden_dim: usize) -> Vec<usize> {
        match self {
            OutputKind::Pooled => vec![batch_size, hidden_dim],
            OutputKind::PerToken => vec![batch_size, seq_len, hidden_dim],
        }
    }
}

/// Output layout resolved once per encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOutputSpec {
    pub kind: OutputKind,
    /// Hidden dimension `H`, always positive
    pub hidden_dim: usize,
}

impl ModelOutputSpec {
    pub fn rank(&self) -> usize {
        self.kind.rank()
    }

    pub fn is_pooled(&self) -> bool {
        self.kind == OutputKind::Pooled
    }
}

/// Check the configured tensor names against the model and classify its output
pub fn resolve_output_spec(signature: &ModelSignature, config: &EncoderConfig) -> Result<ModelOutputSpec> {
    for input in &signature.inputs {
        debug!("Model input: {}", input);
    }
    for output in &signature.outputs {
        debug!("Model output: {}", output);
    }

    for name in [&config.input_ids_name, &config.attention_mask_name] {
        if signature.input(name).is_none() {
            return Err(Error::Config(format!("input {:?} not found in model", name)));
        }
    }

    let output = signature.output(&config.output_name).ok_or_else(|| {
        Error::Config(format!("output {:?} not found in model", config.output_name))
    })?;

    let (kind, hidden_axis) = match output.rank() {
        2 => (OutputKind::Pooled, 1),
        3 => (OutputKind::PerToken, 2),
        rank => {
            return Err(Error::Config(format!(
                "unexpected output rank {} (dims={:?}), want 2 or 3",
                rank, output.dims
            )))
        }
    };

    let hidden_dim = match output.dims[hidden_axis] {
        h if h > 0 => h as usize,
        _ => {
            return Err(Error::Config(format!(
                "can't resolve hidden dimension from dims {:?}",
                output.dims
            )))
        }
    };

    info!(
        output = %config.output_name,
        ?kind,
        hidden_dim,
        "Resolved model output"
    );

    Ok(ModelOutputSpec { kind, hidden_dim })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TensorDescriptor;

    fn signature(output_dims: Vec<i64>) -> ModelSignature {
        ModelSignature {
            inputs: vec![
                TensorDescriptor::new("input_ids", "Int64", vec![-1, -1]),
                TensorDescriptor::new("attention_mask", "Int64", vec![-1, -1]),
            ],
            outputs: vec![TensorDescriptor::new("out", "Float32", output_dims)],
        }
    }

    fn config() -> EncoderConfig {
        EncoderConfig::with_model_dir("/m").with_output_name("out")
    }

    #[test]
    fn test_rank_two_is_pooled() {
        let spec = resolve_output_spec(&signature(vec![-1, 768]), &config()).unwrap();
        assert_eq!(spec.kind, OutputKind::Pooled);
        assert_eq!(spec.hidden_dim, 768);
        assert!(spec.is_pooled());
        assert_eq!(spec.rank(), 2);
    }

    #[test]
    fn test_rank_three_is_per_token() {
        let spec = resolve_output_spec(&signature(vec![-1, -1, 384]), &config()).unwrap();
        assert_eq!(spec.kind, OutputKind::PerToken);
        assert_eq!(spec.hidden_dim, 384);
    }

    #[test]
    fn test_unsupported_rank() {
        for dims in [vec![384], vec![1, 2, 3, 4]] {
            let err = resolve_output_spec(&signature(dims), &config()).unwrap_err();
            assert!(matches!(err, Error::Config(ref m) if m.contains("rank")));
        }
    }

    #[test]
    fn test_undeclared_hidden_dim() {
        for dims in [vec![-1, -1], vec![-1, -1, 0]] {
            let err = resolve_output_spec(&signature(dims), &config()).unwrap_err();
            assert!(matches!(err, Error::Config(ref m) if m.contains("hidden dimension")));
        }
    }

    #[test]
    fn test_missing_names() {
        let sig = signature(vec![-1, 4]);

        let cfg = config().with_output_name("sentence_embedding");
        let err = resolve_output_spec(&sig, &cfg).unwrap_err();
        assert!(err.to_string().contains("output \"sentence_embedding\""));

        let cfg = config().with_input_names("ids", "attention_mask");
        let err = resolve_output_spec(&sig, &cfg).unwrap_err();
        assert!(err.to_string().contains("input \"ids\""));

        let cfg = config().with_input_names("input_ids", "mask");
        assert!(resolve_output_spec(&sig, &cfg).is_err());
    }

    #[test]
    fn test_output_shape() {
        assert_eq!(OutputKind::Pooled.output_shape(2, 7, 4), vec![2, 4]);
        assert_eq!(OutputKind::PerToken.output_shape(2, 7, 4), vec![2, 7, 4]);
    }
}
