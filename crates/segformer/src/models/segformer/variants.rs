//! # SegFormer `B0`..`B5` variants.
//!
//! The variants share the stage head counts, reduction ratios and patch
//! geometry; they differ in stage widths, stage depths and decoder width.

use crate::errors::SegFormerError;
use crate::models::segformer::encoder::MixStageConfig;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Per-stage attention head counts.
pub const NUM_HEADS: [usize; 4] = [1, 2, 5, 8];

/// Per-stage Mix-FFN expansion ratios.
pub const MLP_RATIOS: [f64; 4] = [4.0, 4.0, 4.0, 4.0];

/// Per-stage spatial reduction ratios.
pub const SR_RATIOS: [usize; 4] = [8, 4, 2, 1];

/// Per-stage patch embedding kernel sizes.
pub const PATCH_SIZES: [usize; 4] = [7, 3, 3, 3];

/// Per-stage patch embedding strides.
pub const STRIDES: [usize; 4] = [4, 2, 2, 2];

/// The SegFormer model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegFormerVariant {
    /// `mit_b0`
    B0,
    /// `mit_b1`
    B1,
    /// `mit_b2`
    B2,
    /// `mit_b3`
    B3,
    /// `mit_b4`
    B4,
    /// `mit_b5`
    B5,
}

/// The per-variant hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantConfig {
    /// Per-stage output channels.
    pub embed_dims: [usize; 4],

    /// Per-stage block counts.
    pub depths: [usize; 4],

    /// Decode head width.
    pub decode_dim: usize,
}

/// The variant table, indexed in `SegFormerVariant::ALL` order.
pub const MODEL_CONFIGS: [(SegFormerVariant, VariantConfig); 6] = [
    (
        SegFormerVariant::B0,
        VariantConfig {
            embed_dims: [32, 64, 160, 256],
            depths: [2, 2, 2, 2],
            decode_dim: 256,
        },
    ),
    (
        SegFormerVariant::B1,
        VariantConfig {
            embed_dims: [64, 128, 320, 512],
            depths: [2, 2, 2, 2],
            decode_dim: 256,
        },
    ),
    (
        SegFormerVariant::B2,
        VariantConfig {
            embed_dims: [64, 128, 320, 512],
            depths: [3, 4, 6, 3],
            decode_dim: 768,
        },
    ),
    (
        SegFormerVariant::B3,
        VariantConfig {
            embed_dims: [64, 128, 320, 512],
            depths: [3, 4, 18, 3],
            decode_dim: 768,
        },
    ),
    (
        SegFormerVariant::B4,
        VariantConfig {
            embed_dims: [64, 128, 320, 512],
            depths: [3, 8, 27, 3],
            decode_dim: 768,
        },
    ),
    (
        SegFormerVariant::B5,
        VariantConfig {
            embed_dims: [64, 128, 320, 512],
            depths: [3, 6, 40, 3],
            decode_dim: 768,
        },
    ),
];

impl SegFormerVariant {
    /// All variants, smallest first.
    pub const ALL: [SegFormerVariant; 6] = [
        SegFormerVariant::B0,
        SegFormerVariant::B1,
        SegFormerVariant::B2,
        SegFormerVariant::B3,
        SegFormerVariant::B4,
        SegFormerVariant::B5,
    ];

    /// The canonical name, ``mit_b0`` .. ``mit_b5``.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SegFormerVariant::B0 => "mit_b0",
            SegFormerVariant::B1 => "mit_b1",
            SegFormerVariant::B2 => "mit_b2",
            SegFormerVariant::B3 => "mit_b3",
            SegFormerVariant::B4 => "mit_b4",
            SegFormerVariant::B5 => "mit_b5",
        }
    }

    /// The variant's row of `MODEL_CONFIGS`.
    #[must_use]
    pub const fn config(self) -> VariantConfig {
        MODEL_CONFIGS[self as usize].1
    }

    /// The encoder stage table of the variant.
    #[must_use]
    pub fn stage_configs(self) -> Vec<MixStageConfig> {
        let config = self.config();
        (0..4)
            .map(|i| {
                MixStageConfig::new(config.embed_dims[i], config.depths[i], NUM_HEADS[i])
                    .with_mlp_ratio(MLP_RATIOS[i])
                    .with_sr_ratio(SR_RATIOS[i])
                    .with_patch_size(PATCH_SIZES[i])
                    .with_stride(STRIDES[i])
            })
            .collect()
    }
}

impl Display for SegFormerVariant {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SegFormerVariant {
    type Err = SegFormerError;

    /// Accepts ``mit_bN``, ``segformer_bN`` and ``bN``, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let short = lower
            .strip_prefix("mit_")
            .or_else(|| lower.strip_prefix("segformer_"))
            .unwrap_or(&lower);

        match short {
            "b0" => Ok(SegFormerVariant::B0),
            "b1" => Ok(SegFormerVariant::B1),
            "b2" => Ok(SegFormerVariant::B2),
            "b3" => Ok(SegFormerVariant::B3),
            "b4" => Ok(SegFormerVariant::B4),
            "b5" => Ok(SegFormerVariant::B5),
            _ => Err(SegFormerError::UnknownVariant(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order() {
        for (i, variant) in SegFormerVariant::ALL.iter().enumerate() {
            assert_eq!(MODEL_CONFIGS[i].0, *variant);
        }
    }

    #[test]
    fn test_table_values() {
        for variant in SegFormerVariant::ALL {
            let config = variant.config();
            assert!(config.embed_dims.iter().all(|&d| d > 0));
            assert!(config.depths.iter().all(|&d| d > 0));
            assert!(config.decode_dim > 0);
            for (d, h) in config.embed_dims.iter().zip(NUM_HEADS) {
                assert_eq!(d % h, 0);
            }
        }

        assert_eq!(
            SegFormerVariant::B0.config(),
            VariantConfig {
                embed_dims: [32, 64, 160, 256],
                depths: [2, 2, 2, 2],
                decode_dim: 256,
            }
        );
        assert_eq!(SegFormerVariant::B3.config().depths, [3, 4, 18, 3]);
        assert_eq!(SegFormerVariant::B4.config().depths, [3, 8, 27, 3]);
        assert_eq!(SegFormerVariant::B5.config().depths, [3, 6, 40, 3]);
        assert_eq!(SegFormerVariant::B5.config().decode_dim, 768);
    }

    #[test]
    fn test_stage_configs() {
        let stages = SegFormerVariant::B2.stage_configs();
        assert_eq!(stages.len(), 4);
        assert_eq!(
            stages[0],
            MixStageConfig::new(64, 3, 1)
                .with_sr_ratio(8)
                .with_patch_size(7)
                .with_stride(4)
        );
        assert_eq!(stages[2], MixStageConfig::new(320, 6, 5).with_sr_ratio(2));
        assert_eq!(stages[3], MixStageConfig::new(512, 3, 8).with_sr_ratio(1));
    }

    #[test]
    fn test_parse() {
        for variant in SegFormerVariant::ALL {
            assert_eq!(variant.name().parse::<SegFormerVariant>(), Ok(variant));
            assert_eq!(variant.to_string(), variant.name());
        }
        assert_eq!("B3".parse::<SegFormerVariant>(), Ok(SegFormerVariant::B3));
        assert_eq!(
            "SegFormer_B1".parse::<SegFormerVariant>(),
            Ok(SegFormerVariant::B1)
        );
        assert_eq!(
            "MIT_B5".parse::<SegFormerVariant>(),
            Ok(SegFormerVariant::B5)
        );
    }

    #[test]
    fn test_parse_unknown() {
        for name in ["mit_b6", "", "resnet50", "mit_"] {
            assert_eq!(
                name.parse::<SegFormerVariant>(),
                Err(SegFormerError::UnknownVariant(name.to_string()))
            );
        }
    }
}
