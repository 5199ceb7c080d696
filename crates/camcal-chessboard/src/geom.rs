/// Compute the absolute difference between two angles (radians),
/// normalized into `[0, π]`.
pub fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let two_pi = 2.0 * std::f32::consts::PI;
    // Normalize angle difference to [-π, π).
    let mut diff = (b - a).rem_euclid(two_pi);
    if diff >= std::f32::consts::PI {
        diff -= two_pi;
    }
    diff.abs()
}

/// Check whether two undirected axes (angles modulo π) are approximately
/// orthogonal within the given `tolerance`.
pub fn is_orthogonal(reference_angle: f32, other_angle: f32, tolerance: f32) -> bool {
    (std::f32::consts::FRAC_PI_2 - axis_diff(reference_angle, other_angle)).abs()
        <= tolerance.abs()
}

/// Angle between two undirected axes, in `[0, π/2]`.
pub fn axis_diff(a: f32, b: f32) -> f32 {
    let d = angle_diff_abs(a, b);
    d.min(std::f32::consts::PI - d)
}
