//! Batch tokenization into padded id / mask matrices

use std::fmt;
use std::path::Path;

use ndarray::{Array2, ArrayView1};
use tokenizers::Tokenizer as HfTokenizer;
use tracing::debug;

use sentvec_core::{resolve_max_len, Error, Result};

/// Fallback id for `[CLS]` when the vocabulary has no mapping
pub const DEFAULT_CLS_ID: u32 = 101;
/// Fallback id for `[SEP]` when the vocabulary has no mapping
pub const DEFAULT_SEP_ID: u32 = 102;
/// Fallback padding id when the vocabulary has no mapping
pub const DEFAULT_PAD_ID: u32 = 0;

/// The tokenizer operations the batch pipeline needs
pub trait TokenEncoder: Send + Sync {
    /// Encode one text, including the special tokens the tokenizer normally inserts
    fn encode_single(&self, text: &str) -> Result<Vec<u32>>;

    /// Look up the id of a token, if the vocabulary has it
    fn token_to_id(&self, token: &str) -> Option<u32>;

    /// Padding token declared by the tokenizer's own configuration
    fn pad_token(&self) -> Option<&str> {
        None
    }

    /// Vocabulary size including added tokens
    fn vocab_size(&self) -> usize;
}

/// [`TokenEncoder`] backed by a HuggingFace `tokenizer.json`
pub struct HfTokenEncoder {
    inner: HfTokenizer,
    pad_token: Option<String>,
}

impl HfTokenEncoder {
    /// Load a tokenizer from a JSON file
    ///
    /// Padding and truncation baked into the file are disabled so that every
    /// encoding has its raw length; the batch tokenizer pads and truncates.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading tokenizer from {:?}", path);

        let mut inner = HfTokenizer::from_file(path)
            .map_err(|e| Error::Config(format!("Failed to load tokenizer: {}", e)))?;

        let pad_token = inner.get_padding().map(|p| p.pad_token.clone());
        inner.with_padding(None);
        inner
            .with_truncation(None)
            .map_err(|e| Error::Config(format!("Failed to disable tokenizer truncation: {}", e)))?;

        Ok(Self { inner, pad_token })
    }
}

impl TokenEncoder for HfTokenEncoder {
    fn encode_single(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| Error::Tokenization(format!("Tokenization failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    fn pad_token(&self) -> Option<&str> {
        self.pad_token.as_deref()
    }

    fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

/// Special token ids resolved once when the tokenizer is wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub cls_id: u32,
    pub sep_id: u32,
    pub pad_id: u32,
}

impl SpecialTokens {
    fn resolve(encoder: &dyn TokenEncoder) -> Self {
        let id_or = |token: &str, default: u32| encoder.token_to_id(token).unwrap_or(default);

        let pad_id = encoder
            .pad_token()
            .and_then(|token| encoder.token_to_id(token))
            .unwrap_or_else(|| id_or("[PAD]", DEFAULT_PAD_ID));

        Self {
            cls_id: id_or("[CLS]", DEFAULT_CLS_ID),
            sep_id: id_or("[SEP]", DEFAULT_SEP_ID),
            pad_id,
        }
    }
}

/// Wraps a [`TokenEncoder`] and produces rectangular batches
pub struct BatchTokenizer {
    inner: Box<dyn TokenEncoder>,
    special: SpecialTokens,
}

impl fmt::Debug for BatchTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchTokenizer")
            .field("special", &self.special)
            .finish_non_exhaustive()
    }
}

impl BatchTokenizer {
    /// Wrap an encoder, resolving its special token ids
    pub fn new(encoder: impl TokenEncoder + 'static) -> Self {
        let special = SpecialTokens::resolve(&encoder);
        debug!(
            cls_id = special.cls_id,
            sep_id = special.sep_id,
            pad_id = special.pad_id,
            "Resolved special tokens"
        );
        Self {
            inner: Box::new(encoder),
            special,
        }
    }

    /// Load a HuggingFace `tokenizer.json`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(HfTokenEncoder::from_file(path)?))
    }

    /// Get the padding token ID
    pub fn pad_id(&self) -> u32 {
        self.special.pad_id
    }

    /// Get all resolved special token ids
    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    /// Vocabulary size of the underlying tokenizer
    pub fn vocab_size(&self) -> usize {
        self.inner.vocab_size()
    }

    /// Tokenize a batch into `[B, T]` id and mask matrices.
    ///
    /// `T` is the longest raw encoding in the batch, capped at `max_len`
    /// (after the shared fallback/ceiling policy). Longer encodings lose
    /// their trailing tokens; shorter ones are right-padded.
    pub fn encode_batch<S: AsRef<str>>(&self, texts: &[S], max_len: usize) -> Result<TokenizedBatch> {
        if texts.is_empty() {
            return Ok(TokenizedBatch::empty());
        }
        let max_len = resolve_max_len(max_len);

        let encodings = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                self.inner.encode_single(text.as_ref()).map_err(|e| match e {
                    Error::Tokenization(msg) => {
                        Error::Tokenization(format!("text {}: {}", i, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let longest = encodings.iter().map(Vec::len).max().unwrap_or(0);
        let seq_len = longest.min(max_len);
        let pad_id = self.special.pad_id;

        let mut input_ids = Array2::from_elem((texts.len(), seq_len), i64::from(pad_id));
        let mut attention_mask = Array2::<i64>::zeros((texts.len(), seq_len));

        for (row, ids) in encodings.iter().enumerate() {
            for (t, &id) in ids.iter().take(seq_len).enumerate() {
                input_ids[[row, t]] = i64::from(id);
                if id != pad_id {
                    attention_mask[[row, t]] = 1;
                }
            }
        }

        debug!(
            batch_size = texts.len(),
            longest,
            seq_len,
            "Tokenized batch"
        );

        Ok(TokenizedBatch {
            input_ids,
            attention_mask,
            seq_len,
        })
    }
}

/// A tokenized batch: `[B, T]` ids and attention mask
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizedBatch {
    input_ids: Array2<i64>,
    attention_mask: Array2<i64>,
    seq_len: usize,
}

impl TokenizedBatch {
    fn empty() -> Self {
        Self {
            input_ids: Array2::zeros((0, 0)),
            attention_mask: Array2::zeros((0, 0)),
            seq_len: 0,
        }
    }

    /// Build a batch from already padded matrices.
    ///
    /// Fails if the two matrices differ in shape.
    pub fn from_parts(input_ids: Array2<i64>, attention_mask: Array2<i64>) -> Result<Self> {
        if input_ids.dim() != attention_mask.dim() {
            return Err(Error::Tokenization(format!(
                "input_ids shape {:?} does not match attention_mask shape {:?}",
                input_ids.dim(),
                attention_mask.dim()
            )));
        }
        let seq_len = input_ids.ncols();
        Ok(Self {
            input_ids,
            attention_mask,
            seq_len,
        })
    }

    /// Number of texts in the batch
    pub fn batch_size(&self) -> usize {
        self.input_ids.nrows()
    }

    /// Padded sequence length `T`
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.batch_size() == 0
    }

    /// Token ids, `[B, T]`
    pub fn input_ids(&self) -> &Array2<i64> {
        &self.input_ids
    }

    /// Attention mask, `[B, T]` (1 for real tokens, 0 for padding)
    pub fn attention_mask(&self) -> &Array2<i64> {
        &self.attention_mask
    }

    /// Attention mask of a single row
    pub fn mask_row(&self, row: usize) -> ArrayView1<'_, i64> {
        self.attention_mask.row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTokenizer;

    fn tokenizer() -> BatchTokenizer {
        BatchTokenizer::new(
            FakeTokenizer::new()
                .with_text("hi", vec![101, 501, 102])
                .with_text("hello world", vec![101, 601, 602, 102])
                .with_text("long", vec![101, 1, 2, 3, 4, 5, 6, 7, 8, 9, 102])
                .with_text("has pad", vec![101, 0, 7, 102]),
        )
    }

    #[test]
    fn test_empty_batch() {
        let batch = tokenizer().encode_batch::<&str>(&[], 8).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.seq_len(), 0);
        assert_eq!(batch.input_ids().dim(), (0, 0));
    }

    #[test]
    fn test_special_token_fallbacks() {
        let tok = tokenizer();
        let special = tok.special_tokens();
        assert_eq!(special.cls_id, DEFAULT_CLS_ID);
        assert_eq!(special.sep_id, DEFAULT_SEP_ID);
        assert_eq!(special.pad_id, DEFAULT_PAD_ID);
    }

    #[test]
    fn test_pad_token_from_tokenizer_config() {
        let tok = BatchTokenizer::new(
            FakeTokenizer::new()
                .with_vocab("<pad>", 1)
                .with_vocab("[PAD]", 5)
                .with_pad_token("<pad>"),
        );
        assert_eq!(tok.pad_id(), 1);

        let tok = BatchTokenizer::new(FakeTokenizer::new().with_vocab("[PAD]", 5));
        assert_eq!(tok.pad_id(), 5);
    }

    #[test]
    fn test_seq_len_is_longest_in_batch() {
        let batch = tokenizer().encode_batch(&["hi", "hello world"], 8).unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.seq_len(), 4);
        assert_eq!(batch.input_ids().dim(), batch.attention_mask().dim());
    }

    #[test]
    fn test_padding_marks_tail() {
        let batch = tokenizer().encode_batch(&["hi", "hello world"], 8).unwrap();

        let ids = batch.input_ids();
        assert_eq!(ids.row(0).to_vec(), vec![101, 501, 102, 0]);
        assert_eq!(batch.mask_row(0).to_vec(), vec![1, 1, 1, 0]);
        assert_eq!(ids.row(1).to_vec(), vec![101, 601, 602, 102]);
        assert_eq!(batch.mask_row(1).to_vec(), vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_truncation_drops_trailing_tokens() {
        let batch = tokenizer().encode_batch(&["long", "hi"], 5).unwrap();
        assert_eq!(batch.seq_len(), 5);
        assert_eq!(batch.input_ids().row(0).to_vec(), vec![101, 1, 2, 3, 4]);
        assert_eq!(batch.mask_row(0).to_vec(), vec![1, 1, 1, 1, 1]);
        assert_eq!(batch.mask_row(1).to_vec(), vec![1, 1, 1, 0, 0]);
    }

    #[test]
    fn test_zero_max_len_falls_back() {
        let batch = tokenizer().encode_batch(&["long"], 0).unwrap();
        assert_eq!(batch.seq_len(), 11);
    }

    #[test]
    fn test_pad_id_in_content_is_masked() {
        let batch = tokenizer().encode_batch(&["has pad"], 8).unwrap();
        assert_eq!(batch.input_ids().row(0).to_vec(), vec![101, 0, 7, 102]);
        assert_eq!(batch.mask_row(0).to_vec(), vec![1, 0, 1, 1]);
    }

    #[test]
    fn test_rejected_text_is_tokenization_error() {
        let err = tokenizer().encode_batch(&["hi", "unknown"], 8).unwrap_err();
        assert!(matches!(err, Error::Tokenization(ref m) if m.contains("text 1")));
    }

    #[test]
    fn test_from_parts_shape_mismatch() {
        let ids = Array2::<i64>::zeros((2, 3));
        let mask = Array2::<i64>::zeros((2, 4));
        assert!(TokenizedBatch::from_parts(ids, mask).is_err());

        let ids = Array2::<i64>::zeros((1, 4));
        let mask = Array2::<i64>::ones((1, 4));
        let batch = TokenizedBatch::from_parts(ids, mask).unwrap();
        assert_eq!(batch.seq_len(), 4);
        assert_eq!(batch.batch_size(), 1);
    }
}
