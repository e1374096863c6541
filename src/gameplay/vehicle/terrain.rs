use super::*;
use crate::config::TerrainConfig;

#[derive(Debug, Clone, Copy)]
pub(super) struct GroundProfilePoint {
    pub(super) top: Vec2,
    pub(super) bottom: Vec2,
    pub(super) u: f32,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct GroundColliderSegmentSample {
    pub(super) top0: Vec2,
    pub(super) top1: Vec2,
}

#[derive(Debug, Clone)]
pub(super) struct GroundProfileSamples {
    pub(super) points: Vec<GroundProfilePoint>,
    pub(super) segments: Vec<GroundColliderSegmentSample>,
}

/// Samples the ground from a short run-up behind the origin to `length_m` ahead.
pub(super) fn build_ground_profile_samples(terrain: &TerrainConfig) -> GroundProfileSamples {
    let spacing = terrain.sample_spacing_m.max(0.1);
    let start_x = -GROUND_RUN_UP_M;
    let segment_count = ((terrain.length_m.max(spacing) + GROUND_RUN_UP_M) / spacing).ceil() as usize;
    let node_count = segment_count + 1;

    let top_points: Vec<Vec2> = (0..node_count)
        .map(|index| {
            let x = start_x + (index as f32 * spacing);
            Vec2::new(x, terrain_height_at_x(terrain, x))
        })
        .collect();

    let mut points = Vec::with_capacity(node_count);
    let mut u_along = 0.0_f32;
    for index in 0..node_count {
        if index > 0 {
            u_along += (top_points[index] - top_points[index - 1]).length() / GROUND_STRIP_THICKNESS_M;
        }
        let tangent = if index == 0 {
            top_points[1] - top_points[0]
        } else if index + 1 == node_count {
            top_points[node_count - 1] - top_points[node_count - 2]
        } else {
            top_points[index + 1] - top_points[index - 1]
        };
        let normal = Vec2::new(-tangent.y, tangent.x).normalize_or(Vec2::Y);
        let top = top_points[index];

        points.push(GroundProfilePoint {
            top,
            bottom: top - (normal * GROUND_STRIP_THICKNESS_M),
            u: u_along,
        });
    }

    let segments = points
        .windows(2)
        .map(|pair| GroundColliderSegmentSample {
            top0: pair[0].top,
            top1: pair[1].top,
        })
        .collect();

    GroundProfileSamples { points, segments }
}

pub(super) fn build_ground_strip_mesh(profile: &GroundProfileSamples) -> Mesh {
    let node_count = profile.points.len();
    let mut positions = Vec::with_capacity(node_count * 2);
    let mut normals = Vec::with_capacity(node_count * 2);
    let mut uvs = Vec::with_capacity(node_count * 2);
    let mut indices = Vec::with_capacity((node_count.saturating_sub(1)) * 6);

    for point in &profile.points {
        positions.push([point.top.x, point.top.y, GROUND_STRIP_Z]);
        positions.push([point.bottom.x, point.bottom.y, GROUND_STRIP_Z]);
        normals.push([0.0, 0.0, 1.0]);
        normals.push([0.0, 0.0, 1.0]);
        uvs.push([point.u, 0.0]);
        uvs.push([point.u, 1.0]);
    }

    for index in 0..node_count.saturating_sub(1) {
        let base = (index * 2) as u32;
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 1, base + 3]);
    }

    let mut mesh = Mesh::new(
        PrimitiveTopology::TriangleList,
        RenderAssetUsages::default(),
    );
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, positions);
    mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals);
    mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs);
    mesh.insert_indices(Indices::U32(indices));
    mesh
}

pub(super) fn terrain_height_at_x(terrain: &TerrainConfig, x: f32) -> f32 {
    terrain.base_height
        + (x * terrain.ramp_slope)
        + ((x * terrain.wave_a_frequency).sin() * terrain.wave_a_amplitude)
        + ((x * terrain.wave_b_frequency).sin() * terrain.wave_b_amplitude)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terrain() -> TerrainConfig {
        TerrainConfig {
            base_height: -2.0,
            ramp_slope: 0.01,
            wave_a_amplitude: 1.0,
            wave_a_frequency: 0.05,
            wave_b_amplitude: 0.25,
            wave_b_frequency: 0.3,
            length_m: 100.0,
            sample_spacing_m: 2.0,
        }
    }

    #[test]
    fn profile_covers_run_up_and_length() {
        let terrain = terrain();
        let profile = build_ground_profile_samples(&terrain);

        let first = profile.points.first().expect("profile has points");
        let last = profile.points.last().expect("profile has points");
        assert!(first.top.x <= -GROUND_RUN_UP_M + 1e-3);
        assert!(last.top.x >= terrain.length_m);
        assert_eq!(profile.segments.len(), profile.points.len() - 1);
    }

    #[test]
    fn collider_segments_are_contiguous_and_follow_height() {
        let terrain = terrain();
        let profile = build_ground_profile_samples(&terrain);

        for pair in profile.segments.windows(2) {
            assert_eq!(pair[0].top1, pair[1].top0);
        }
        for segment in &profile.segments {
            let expected = terrain_height_at_x(&terrain, segment.top0.x);
            assert!((segment.top0.y - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn strip_bottom_sits_below_top() {
        let profile = build_ground_profile_samples(&terrain());
        for point in &profile.points {
            assert!(point.bottom.y < point.top.y);
        }
        let mesh = build_ground_strip_mesh(&profile);
        assert_eq!(mesh.count_vertices(), profile.points.len() * 2);
    }
}
