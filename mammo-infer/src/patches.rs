//! Patch extraction and position-aware patch encoding.

use candle_core::{Module, Result, Tensor};
use candle_nn::{embedding, linear, Embedding, Linear, VarBuilder};

use mammo_core::ClassifierConfig;

/// Splits `[B, H, W, C]` images into non-overlapping `P x P` patches.
///
/// Output is `[B, N, P * P * C]` with patches in row-major grid order and
/// pixels within a patch flattened as `(row, col, channel)`. The position
/// table is indexed by this same order, so it must not change.
#[derive(Debug, Clone, Copy)]
pub struct PatchEmbedding {
    patch_size: usize,
}

impl PatchEmbedding {
    pub fn new(patch_size: usize) -> Self {
        Self { patch_size }
    }

    pub fn patch_size(&self) -> usize {
        self.patch_size
    }
}

impl Module for PatchEmbedding {
    fn forward(&self, images: &Tensor) -> Result<Tensor> {
        let (b, h, w, c) = images.dims4()?;
        let p = self.patch_size;
        if h % p != 0 || w % p != 0 {
            candle_core::bail!("image {h}x{w} is not a multiple of patch size {p}");
        }
        let (rows, cols) = (h / p, w / p);

        // [B, rows, P, cols, P*C] -> [B, rows, cols, P, P*C]
        images
            .reshape((b, rows, p, cols, p * c))?
            .transpose(2, 3)?
            .contiguous()?
            .reshape((b, rows * cols, p * p * c))
    }
}

/// Projects each patch to the embedding width and adds its learned position.
pub struct PatchEncoder {
    num_patches: usize,
    projection: Linear,
    position_embedding: Embedding,
}

impl PatchEncoder {
    pub fn new(cfg: &ClassifierConfig, vb: VarBuilder) -> Result<Self> {
        let num_patches = cfg.num_patches();
        let projection = linear(cfg.patch_dim(), cfg.projection_dim, vb.pp("projection"))?;
        let position_embedding =
            embedding(num_patches, cfg.projection_dim, vb.pp("position_embedding"))?;
        Ok(Self {
            num_patches,
            projection,
            position_embedding,
        })
    }
}

impl Module for PatchEncoder {
    /// `patches [B, N, P*P*C]` -> `[B, N, D]`.
    fn forward(&self, patches: &Tensor) -> Result<Tensor> {
        let (_, n, _) = patches.dims3()?;
        if n != self.num_patches {
            candle_core::bail!("expected {} patches, got {n}", self.num_patches);
        }
        let positions = Tensor::arange(0u32, n as u32, patches.device())?;
        let projected = self.projection.forward(patches)?;
        projected.broadcast_add(&self.position_embedding.forward(&positions)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    /// Image whose pixel value encodes its `(y, x, c)` coordinate.
    fn coordinate_image(h: usize, w: usize, c: usize) -> Tensor {
        let data: Vec<f32> = (0..h * w * c).map(|i| i as f32).collect();
        Tensor::from_vec(data, (1, h, w, c), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_mammogram_patch_count() {
        let images = Tensor::zeros((1, 224, 224, 1), DType::F32, &Device::Cpu).unwrap();
        let patches = PatchEmbedding::new(16).forward(&images).unwrap();
        assert_eq!(patches.dims(), &[1, 196, 256]);
    }

    #[test]
    fn test_patch_order_is_row_major() {
        let (h, w, c, p) = (4, 6, 2, 2);
        let patches = PatchEmbedding::new(p)
            .forward(&coordinate_image(h, w, c))
            .unwrap();
        assert_eq!(patches.dims(), &[1, 6, 8]);

        let patches = patches.squeeze(0).unwrap().to_vec2::<f32>().unwrap();
        let cols = w / p;
        for (k, patch) in patches.iter().enumerate() {
            let (i, j) = (k / cols, k % cols);
            for pr in 0..p {
                for pc in 0..p {
                    for ch in 0..c {
                        let y = i * p + pr;
                        let x = j * p + pc;
                        let expected = ((y * w + x) * c + ch) as f32;
                        assert_eq!(patch[(pr * p + pc) * c + ch], expected);
                    }
                }
            }
        }
    }

    #[test]
    fn test_indivisible_image_rejected() {
        let images = Tensor::zeros((1, 10, 8, 1), DType::F32, &Device::Cpu).unwrap();
        assert!(PatchEmbedding::new(4).forward(&images).is_err());
    }

    #[test]
    fn test_position_embedding_indexed_by_patch_order() {
        let cfg = ClassifierConfig {
            image_size: 8,
            patch_size: 4,
            projection_dim: 3,
            ..ClassifierConfig::mammogram()
        };
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let encoder =
            PatchEncoder::new(&cfg, VarBuilder::from_varmap(&varmap, DType::F32, &dev)).unwrap();

        // Zero projection leaves only the position table
        {
            let vars = varmap.data().lock().unwrap();
            vars["projection.weight"]
                .set(&Tensor::zeros((3, 16), DType::F32, &dev).unwrap())
                .unwrap();
            vars["projection.bias"]
                .set(&Tensor::zeros(3, DType::F32, &dev).unwrap())
                .unwrap();
        }
        let table = varmap.data().lock().unwrap()["position_embedding.weight"]
            .as_tensor()
            .to_vec2::<f32>()
            .unwrap();

        let patches = Tensor::ones((2, 4, 16), DType::F32, &dev).unwrap();
        let encoded = encoder.forward(&patches).unwrap();
        assert_eq!(encoded.dims(), &[2, 4, 3]);
        for batch in encoded.to_vec3::<f32>().unwrap() {
            assert_eq!(batch, table);
        }
    }

    #[test]
    fn test_wrong_patch_count_rejected() {
        let cfg = ClassifierConfig {
            image_size: 8,
            patch_size: 4,
            projection_dim: 3,
            ..ClassifierConfig::mammogram()
        };
        let dev = Device::Cpu;
        let encoder = PatchEncoder::new(&cfg, VarBuilder::zeros(DType::F32, &dev)).unwrap();
        let patches = Tensor::ones((1, 5, 16), DType::F32, &dev).unwrap();
        assert!(encoder.forward(&patches).is_err());
    }
}
