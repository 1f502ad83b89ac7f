//! Helpers for synthesizing weight files in tests.

use cz_features::schema::FormatVersion;

pub struct NetShape {
    pub version: u32,
    pub channels: usize,
    pub blocks: usize,
    pub policy_planes: usize,
    pub value_planes: usize,
    pub value_channels: usize,
}

impl NetShape {
    /// Small shape that keeps test files cheap to build and parse.
    pub fn tiny() -> NetShape {
        NetShape {
            version: 2,
            channels: 4,
            blocks: 1,
            policy_planes: 2,
            value_planes: 2,
            value_channels: 4,
        }
    }
}

fn zero_line(tokens: usize) -> String {
    let mut s = "0.0 ".repeat(tokens);
    s.pop();
    s
}

/// An all-zeros weight file of the given shape, one line per tensor in the
/// loader's expected order.
pub fn zero_weights_text(shape: &NetShape) -> String {
    let version = FormatVersion::from_number(shape.version).expect("test shape version");
    let input_channels = version.input_channels();
    let policy_outputs = version.policy_outputs();
    let c = shape.channels;

    let mut lines = vec![shape.version.to_string()];

    // Input convolution then the residual tower.
    lines.push(zero_line(c * input_channels * 9));
    for _ in 0..3 {
        lines.push(zero_line(c));
    }
    for _ in 0..shape.blocks * 2 {
        lines.push(zero_line(c * c * 9));
        for _ in 0..3 {
            lines.push(zero_line(c));
        }
    }

    // Policy head.
    lines.push(zero_line(shape.policy_planes * c));
    for _ in 0..3 {
        lines.push(zero_line(shape.policy_planes));
    }
    lines.push(zero_line(policy_outputs * shape.policy_planes * 64));
    lines.push(zero_line(policy_outputs));

    // Value head.
    lines.push(zero_line(shape.value_planes * c));
    for _ in 0..3 {
        lines.push(zero_line(shape.value_planes));
    }
    lines.push(zero_line(shape.value_channels * shape.value_planes * 64));
    lines.push(zero_line(shape.value_channels));
    lines.push(zero_line(shape.value_channels));
    lines.push(zero_line(1));

    let mut text = lines.join("\n");
    text.push('\n');
    text
}
