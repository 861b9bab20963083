//! Blend fragments: weighted-interpolation trees over 1-2 driving registers.
//!
//! A fragment is a pure function of the frame-start register snapshot and
//! writes exactly one derived register. The substrate blends exactly two
//! children at a time: `Sum` takes two weighted children, `Map1D` linearly
//! interpolates the two children adjacent to the driver value, `Map2D`
//! bilinearly interpolates four corner children of the unit square. All
//! fragments targeting the same register compose additively.

use serde::{Deserialize, Serialize};

use crate::registers::{FloatReg, FloatSink};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BlendNode {
    /// Constant sample.
    Value(f32),
    /// Weighted sum of exactly two children.
    Sum {
        left: (f32, Box<BlendNode>),
        right: (f32, Box<BlendNode>),
    },
    /// Piecewise-linear interpolation of children over one driver. Points are
    /// sorted by position; the driver clamps to the covered range.
    Map1D {
        driver: FloatReg,
        points: Vec<(f32, BlendNode)>,
    },
    /// Bilinear surface over two drivers, sampling exactly four corners of
    /// the unit square in the order (0,0), (1,0), (0,1), (1,1). Drivers clamp
    /// to [0,1].
    Map2D {
        x: FloatReg,
        y: FloatReg,
        corners: Box<[BlendNode; 4]>,
    },
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

impl BlendNode {
    /// Build a `Map1D`, sorting points by position.
    pub fn map1d(driver: FloatReg, mut points: Vec<(f32, BlendNode)>) -> BlendNode {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        BlendNode::Map1D { driver, points }
    }

    /// Identity passthrough of `reg` over the declared `[lo, hi]` domain.
    /// Values outside the domain clamp to the nearest bound.
    pub fn identity(reg: FloatReg, lo: f32, hi: f32) -> BlendNode {
        BlendNode::map1d(
            reg,
            vec![(lo, BlendNode::Value(lo)), (hi, BlendNode::Value(hi))],
        )
    }

    /// Affine map `scale * reg + shift` over the declared `[lo, hi]` domain.
    pub fn affine(reg: FloatReg, scale: f32, shift: f32, lo: f32, hi: f32) -> BlendNode {
        BlendNode::map1d(
            reg,
            vec![
                (lo, BlendNode::Value(scale * lo + shift)),
                (hi, BlendNode::Value(scale * hi + shift)),
            ],
        )
    }

    /// Sample against the frame-start snapshot. `read` must return the
    /// snapshot value of a driver register.
    pub fn sample(&self, read: &dyn Fn(FloatReg) -> f32) -> f32 {
        match self {
            BlendNode::Value(v) => *v,
            BlendNode::Sum { left, right } => {
                left.0 * left.1.sample(read) + right.0 * right.1.sample(read)
            }
            BlendNode::Map1D { driver, points } => {
                if points.is_empty() {
                    return 0.0;
                }
                let x = read(*driver);
                if x <= points[0].0 {
                    return points[0].1.sample(read);
                }
                let last = points.len() - 1;
                if x >= points[last].0 {
                    return points[last].1.sample(read);
                }
                let hi = points.partition_point(|(p, _)| *p <= x);
                let (x0, ref a) = points[hi - 1];
                let (x1, ref b) = points[hi];
                let span = x1 - x0;
                if span <= f32::EPSILON {
                    return b.sample(read);
                }
                lerp(a.sample(read), b.sample(read), (x - x0) / span)
            }
            BlendNode::Map2D { x, y, corners } => {
                let u = read(*x).clamp(0.0, 1.0);
                let v = read(*y).clamp(0.0, 1.0);
                let c00 = corners[0].sample(read);
                let c10 = corners[1].sample(read);
                let c01 = corners[2].sample(read);
                let c11 = corners[3].sample(read);
                lerp(lerp(c00, c10, u), lerp(c01, c11, u), v)
            }
        }
    }
}

/// One fragment: a blend tree writing one derived register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlendFragment {
    pub target: FloatReg,
    pub root: BlendNode,
}

impl BlendFragment {
    /// Constructing a fragment requires the write capability for its target.
    pub fn new(target: &FloatSink, root: BlendNode) -> Self {
        BlendFragment {
            target: target.reg(),
            root,
        }
    }
}
