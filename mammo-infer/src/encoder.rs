//! Pre-norm transformer encoder stack.
//!
//! Every layer implements [`ModuleT`] so the train/inference flag reaches each
//! dropout. Inference always passes `train = false`, which makes the whole
//! stack deterministic.

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{layer_norm, linear, Dropout, LayerNorm, Linear, VarBuilder};

use mammo_core::ClassifierConfig;

/// Stack of `Dense(units, gelu) -> Dropout` layers.
pub struct Mlp {
    layers: Vec<Linear>,
    dropout: Dropout,
}

impl Mlp {
    pub fn new(in_dim: usize, hidden_units: &[usize], dropout: f32, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(hidden_units.len());
        let mut prev = in_dim;
        for (i, &units) in hidden_units.iter().enumerate() {
            layers.push(linear(prev, units, vb.pp(format!("dense_{i}")))?);
            prev = units;
        }
        Ok(Self {
            layers,
            dropout: Dropout::new(dropout),
        })
    }
}

impl ModuleT for Mlp {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for layer in &self.layers {
            // Exact (erf) GELU, not the tanh approximation
            xs = layer.forward(&xs)?.gelu_erf()?;
            xs = self.dropout.forward_t(&xs, train)?;
        }
        Ok(xs)
    }
}

/// Multi-head self-attention where each head keeps the full `key_dim`.
///
/// Query, key and value project `D -> heads * key_dim`; the output projects
/// back to `D`. Dropout applies to the attention weights.
pub struct MultiHeadAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    num_heads: usize,
    key_dim: usize,
    dropout: Dropout,
}

impl MultiHeadAttention {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> Result<Self> {
        let d = cfg.projection_dim;
        let width = cfg.attention_width();
        Ok(Self {
            query: linear(d, width, vb.pp("query"))?,
            key: linear(d, width, vb.pp("key"))?,
            value: linear(d, width, vb.pp("value"))?,
            output: linear(width, d, vb.pp("output"))?,
            num_heads: cfg.num_heads,
            key_dim: cfg.key_dim,
            dropout: Dropout::new(cfg.attention_dropout),
        })
    }

    /// `[B, N, heads * key_dim]` -> `[B, heads, N, key_dim]`
    fn split_heads(&self, xs: Tensor) -> Result<Tensor> {
        let (b, n, _) = xs.dims3()?;
        xs.reshape((b, n, self.num_heads, self.key_dim))?
            .transpose(1, 2)?
            .contiguous()
    }
}

impl ModuleT for MultiHeadAttention {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let (b, n, _) = xs.dims3()?;

        let q = self.split_heads(self.query.forward(xs)?)?;
        let k = self.split_heads(self.key.forward(xs)?)?;
        let v = self.split_heads(self.value.forward(xs)?)?;

        let scale = 1.0 / (self.key_dim as f64).sqrt();
        let q = (q * scale)?;
        let scores = q.matmul(&k.t()?.contiguous()?)?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let weights = self.dropout.forward_t(&weights, train)?;

        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, n, self.num_heads * self.key_dim))?;
        self.output.forward(&context)
    }
}

/// One pre-norm residual block.
///
/// Both residual branches add onto the block input before normalization;
/// a post-norm layout is a different model and would not match the weights.
pub struct TransformerBlock {
    norm1: LayerNorm,
    attention: MultiHeadAttention,
    norm2: LayerNorm,
    mlp: Mlp,
}

impl TransformerBlock {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> Result<Self> {
        let d = cfg.projection_dim;
        Ok(Self {
            norm1: layer_norm(d, cfg.layer_norm_eps, vb.pp("norm1"))?,
            attention: MultiHeadAttention::new(cfg, vb.pp("attention"))?,
            norm2: layer_norm(d, cfg.layer_norm_eps, vb.pp("norm2"))?,
            mlp: Mlp::new(d, &cfg.transformer_units, cfg.hidden_dropout, vb.pp("mlp"))?,
        })
    }
}

impl ModuleT for TransformerBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let x1 = self.norm1.forward(xs)?;
        let attention = self.attention.forward_t(&x1, train)?;
        let x2 = attention.add(xs)?;

        let x3 = self.norm2.forward(&x2)?;
        let x3 = self.mlp.forward_t(&x3, train)?;
        x3.add(&x2)
    }
}

/// `depth` identical blocks applied in order.
pub struct TransformerEncoder {
    blocks: Vec<TransformerBlock>,
}

impl TransformerEncoder {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> Result<Self> {
        let blocks = (0..cfg.depth)
            .map(|i| TransformerBlock::new(cfg, vb.pp(i)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }
}

impl ModuleT for TransformerEncoder {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = block.forward_t(&xs, train)?;
        }
        Ok(xs)
    }
}
