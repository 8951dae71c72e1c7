//! Prior-box (anchor) generation for the detection pipeline.
//!
//! Anchors are emitted stride by stride, row-major within each stride's
//! feature map, with the candidate sizes innermost. That enumeration order is
//! part of the model contract: the location, score, and landmark outputs are
//! aligned to exactly this order, so reordering anchors desynchronizes
//! decoding.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// A single prior box in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    /// Center x as a fraction of image width.
    pub cx: f32,
    /// Center y as a fraction of image height.
    pub cy: f32,
    /// Width as a fraction of image width.
    pub w: f32,
    /// Height as a fraction of image height.
    pub h: f32,
}

impl Anchor {
    fn clamped(self) -> Self {
        Self {
            cx: self.cx.clamp(0.0, 1.0),
            cy: self.cy.clamp(0.0, 1.0),
            w: self.w.clamp(0.0, 1.0),
            h: self.h.clamp(0.0, 1.0),
        }
    }
}

/// Multi-scale grid configuration for anchor generation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorConfig {
    /// Feature-map strides in pixels. Each stride owns one entry in
    /// `min_sizes`.
    pub strides: Vec<u32>,
    /// Candidate box sizes in pixels per stride, in declared order.
    pub min_sizes: Vec<Vec<u32>>,
    /// Smoothing constants `(center, size)` applied when decoding deltas.
    pub variances: (f32, f32),
    /// Clamp every anchor component to `[0, 1]` after generation.
    pub clip: bool,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            strides: vec![8, 16, 32],
            min_sizes: vec![vec![16, 32], vec![64, 128], vec![256, 512]],
            variances: (0.1, 0.2),
            clip: false,
        }
    }
}

/// Number of anchors [`generate_anchors`] will emit for a resolution.
pub fn anchor_count(config: &AnchorConfig, width: u32, height: u32) -> usize {
    config
        .strides
        .iter()
        .zip(&config.min_sizes)
        .map(|(&stride, sizes)| {
            let rows = (height as usize).div_ceil(stride as usize);
            let cols = (width as usize).div_ceil(stride as usize);
            rows * cols * sizes.len()
        })
        .sum()
}

/// Generate the full anchor grid for an input resolution.
///
/// Feature-map extents are `ceil(dimension / stride)`, so resolutions that do
/// not divide evenly still get full coverage along the bottom and right edges.
/// Without `clip`, anchors near those edges (and large candidate sizes at
/// small resolutions) can extend past `[0, 1]`.
pub fn generate_anchors(config: &AnchorConfig, width: u32, height: u32) -> Vec<Anchor> {
    debug_assert_eq!(
        config.strides.len(),
        config.min_sizes.len(),
        "one size list per stride"
    );
    let mut anchors = Vec::with_capacity(anchor_count(config, width, height));
    let width_f = width as f32;
    let height_f = height as f32;
    for (&stride, sizes) in config.strides.iter().zip(&config.min_sizes) {
        let rows = (height as usize).div_ceil(stride as usize);
        let cols = (width as usize).div_ceil(stride as usize);
        let stride_f = stride as f32;
        for i in 0..rows {
            let cy = (i as f32 + 0.5) * stride_f / height_f;
            for j in 0..cols {
                let cx = (j as f32 + 0.5) * stride_f / width_f;
                for &size in sizes {
                    let anchor = Anchor {
                        cx,
                        cy,
                        w: size as f32 / width_f,
                        h: size as f32 / height_f,
                    };
                    anchors.push(if config.clip { anchor.clamped() } else { anchor });
                }
            }
        }
    }
    anchors
}

/// Per-resolution anchor memoization.
///
/// Anchor grids are pure functions of the configuration and resolution, and
/// most callers run many frames at one resolution. Each detector owns its own
/// cache; [`AnchorCache::clear`] drops every grid when a caller streams many
/// distinct resolutions.
#[derive(Debug, Default)]
pub struct AnchorCache {
    entries: Mutex<HashMap<(u32, u32), Arc<Vec<Anchor>>>>,
}

impl AnchorCache {
    /// Fetch the grid for a resolution, generating and storing it on first use.
    pub fn get_or_generate(&self, config: &AnchorConfig, width: u32, height: u32) -> Arc<Vec<Anchor>> {
        let mut entries = self.entries.lock().expect("anchor cache poisoned");
        Arc::clone(
            entries
                .entry((width, height))
                .or_insert_with(|| Arc::new(generate_anchors(config, width, height))),
        )
    }

    /// Drop every cached grid.
    pub fn clear(&self) {
        self.entries.lock().expect("anchor cache poisoned").clear();
    }

    /// Number of resolutions currently cached.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("anchor cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
