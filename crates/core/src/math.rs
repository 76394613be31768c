//! Neuron arithmetic shared by every topology and learning rule.

use tpmsync_types::Matrix;

/// Heaviside step: `1` for strictly positive input, `0` otherwise.
#[inline]
pub fn heaviside(x: i32) -> i32 {
    if x > 0 {
        1
    } else {
        0
    }
}

/// Clip a weight into `[-l, l]`.
///
/// Values already inside the bound are returned unchanged. Zero is treated as
/// positive for the sign, which never matters since `|0| <= l`.
#[inline]
pub fn clamp(w: i32, l: i32) -> i32 {
    let sign = if w < 0 { -1 } else { 1 };
    if w * sign > l {
        l * sign
    } else {
        w
    }
}

/// Local field of one neuron: the dot product of its weights and stimulus,
/// scaled by the layer's input count.
///
/// The scale is positive and so never changes the sign test below. It is kept
/// so stored fields stay comparable with historical runs.
#[inline]
pub fn local_field(weights: &[i32], stimulus: &[i32], n: usize) -> i64 {
    let dot: i64 = weights
        .iter()
        .zip(stimulus)
        .map(|(&w, &x)| i64::from(w) * i64::from(x))
        .sum();
    dot * n as i64
}

/// Sign output of a neuron; a zero field maps to `-1`.
#[inline]
pub fn neuron_output(field: i64) -> i32 {
    if field > 0 {
        1
    } else {
        -1
    }
}

/// Final output τ: the product of a layer's neuron outputs.
pub fn tau(outputs: &[i32]) -> i32 {
    outputs.iter().product()
}

/// Compute every neuron's output for one layer.
///
/// `weights` and `stimulus` are both `K × N`; the result has length `K`.
pub fn stimulate_layer(weights: &Matrix, stimulus: &Matrix) -> Vec<i32> {
    let n = weights.cols();
    (0..weights.rows())
        .map(|i| neuron_output(local_field(weights.row(i), stimulus.row(i), n)))
        .collect()
}
