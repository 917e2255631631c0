//! Double-buffered simulation output and render interpolation.
//!
//! Two fixed-capacity slots alternate every fixed tick. The engine writes into
//! slot `index`; after the tick the index flips, so `index` always names the
//! *older* slot and `1 - index` the newest one.

use glam::{Vec2, Vec3};
use sm64sync_bridge::{GEO_MAX_VERTICES, MarioState, RawGeometryOut};

/// `a * (1 - t) + b * t`, unclamped. Exact at both endpoints.
pub fn lerp_unclamped(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    a * (1.0 - t) + b * t
}

#[derive(Debug, Clone)]
pub struct FrameBuffers {
    positions: [Vec<Vec3>; 2],
    normals: [Vec<Vec3>; 2],
    states: [MarioState; 2],
    colors: Vec<Vec3>,
    uvs: Vec<Vec2>,
    lerp_positions: Vec<Vec3>,
    lerp_normals: Vec<Vec3>,
    index: usize,
    triangles: usize,
}

impl Default for FrameBuffers {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffers {
    pub fn new() -> Self {
        let zeros = || vec![Vec3::ZERO; GEO_MAX_VERTICES];
        Self {
            positions: [zeros(), zeros()],
            normals: [zeros(), zeros()],
            states: [MarioState::default(); 2],
            colors: zeros(),
            uvs: vec![Vec2::ZERO; GEO_MAX_VERTICES],
            lerp_positions: zeros(),
            lerp_normals: zeros(),
            index: 0,
            triangles: 0,
        }
    }

    /// Slot the next tick writes into.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Triangle count of the newest tick.
    pub fn triangles(&self) -> usize {
        self.triangles
    }

    pub fn vertex_count(&self) -> usize {
        self.triangles * 3
    }

    /// Destination buffers for the next engine tick.
    pub fn write_slot(&mut self) -> RawGeometryOut<'_> {
        let i = self.index;
        RawGeometryOut {
            positions: &mut self.positions[i],
            normals: &mut self.normals[i],
            colors: &mut self.colors,
            uvs: &mut self.uvs,
        }
    }

    /// Record the tick written into the current slot and flip the index.
    ///
    /// Returns `true` when the triangle count changed and the buffers were
    /// resynchronized.
    pub fn commit(&mut self, state: MarioState, triangles_used: u16) -> bool {
        let i = self.index;
        self.states[i] = state;

        let triangles = usize::from(triangles_used).min(GEO_MAX_VERTICES / 3);
        let resized = triangles != self.triangles;
        if resized {
            let used = triangles * 3;
            self.positions[i][used..].fill(Vec3::ZERO);
            self.normals[i][used..].fill(Vec3::ZERO);

            let (written_pos, other_pos) = split_slots(&mut self.positions, i);
            other_pos.copy_from_slice(written_pos);
            let (written_norm, other_norm) = split_slots(&mut self.normals, i);
            other_norm.copy_from_slice(written_norm);

            self.lerp_positions.copy_from_slice(&self.positions[i]);
            self.lerp_normals.copy_from_slice(&self.normals[i]);
            self.triangles = triangles;
        }

        self.index = 1 - i;
        resized
    }

    /// Newest simulation state.
    pub fn current_state(&self) -> &MarioState {
        &self.states[1 - self.index]
    }

    pub fn previous_state(&self) -> &MarioState {
        &self.states[self.index]
    }

    /// Rebuild the interpolation output between the previous and newest slot.
    ///
    /// Only the active vertices are touched; the tail stays zero from the
    /// last resync.
    pub fn interpolate(&mut self, t: f32) {
        let (previous, current) = (self.index, 1 - self.index);
        for i in 0..self.vertex_count() {
            self.lerp_positions[i] =
                lerp_unclamped(self.positions[previous][i], self.positions[current][i], t);
            self.lerp_normals[i] = lerp_unclamped(self.normals[previous][i], self.normals[current][i], t);
        }
    }

    pub fn positions(&self, slot: usize) -> &[Vec3] {
        &self.positions[slot]
    }

    pub fn normals(&self, slot: usize) -> &[Vec3] {
        &self.normals[slot]
    }

    pub fn lerp_positions(&self) -> &[Vec3] {
        &self.lerp_positions
    }

    pub fn lerp_normals(&self) -> &[Vec3] {
        &self.lerp_normals
    }

    pub fn colors(&self) -> &[Vec3] {
        &self.colors
    }

    pub fn uvs(&self) -> &[Vec2] {
        &self.uvs
    }
}

/// `(slots[written], slots[other])` as disjoint borrows.
fn split_slots(slots: &mut [Vec<Vec3>; 2], written: usize) -> (&[Vec3], &mut [Vec3]) {
    let [first, second] = slots;
    if written == 0 {
        (first.as_slice(), second.as_mut_slice())
    } else {
        (second.as_slice(), first.as_mut_slice())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pattern(buffers: &mut FrameBuffers, vertices: usize, value: f32) {
        let out = buffers.write_slot();
        for i in 0..vertices {
            out.positions[i] = Vec3::splat(value + i as f32);
            out.normals[i] = Vec3::Y * value;
        }
    }

    #[test]
    fn test_commit_flips_index() {
        let mut buffers = FrameBuffers::new();
        assert_eq!(buffers.index(), 0);
        assert!(!buffers.commit(MarioState::default(), 0));
        assert_eq!(buffers.index(), 1);
        assert!(!buffers.commit(MarioState::default(), 0));
        assert_eq!(buffers.index(), 0);
    }

    #[test]
    fn test_current_and_previous_state() {
        let mut buffers = FrameBuffers::new();
        let first = MarioState {
            health_points: 10.0,
            ..MarioState::default()
        };
        let second = MarioState {
            health_points: 20.0,
            ..MarioState::default()
        };
        buffers.commit(first, 0);
        buffers.commit(second, 0);

        assert_eq!(buffers.current_state().health_points, 20.0);
        assert_eq!(buffers.previous_state().health_points, 10.0);
    }

    #[test]
    fn test_shrinking_triangle_count_zeroes_tail_everywhere() {
        let mut buffers = FrameBuffers::new();

        write_pattern(&mut buffers, 12, 1.0);
        assert!(buffers.commit(MarioState::default(), 4));
        write_pattern(&mut buffers, 12, 2.0);
        assert!(!buffers.commit(MarioState::default(), 4));
        buffers.interpolate(0.5);

        // Engine writes only the first two triangles but leaves stale data behind.
        {
            let out = buffers.write_slot();
            for i in 0..12 {
                out.positions[i] = Vec3::splat(9.0);
                out.normals[i] = Vec3::splat(9.0);
            }
        }
        assert!(buffers.commit(MarioState::default(), 2));
        assert_eq!(buffers.triangles(), 2);

        for slot in 0..2 {
            assert!(buffers.positions(slot)[6..12].iter().all(|v| *v == Vec3::ZERO));
            assert!(buffers.normals(slot)[6..12].iter().all(|v| *v == Vec3::ZERO));
        }
        assert!(buffers.lerp_positions()[6..12].iter().all(|v| *v == Vec3::ZERO));
        assert!(buffers.lerp_normals()[6..12].iter().all(|v| *v == Vec3::ZERO));
    }

    #[test]
    fn test_resize_resyncs_previous_slot() {
        let mut buffers = FrameBuffers::new();
        write_pattern(&mut buffers, 3, 5.0);
        buffers.commit(MarioState::default(), 1);

        assert_eq!(buffers.positions(0)[..3], buffers.positions(1)[..3]);
        assert_eq!(buffers.lerp_positions()[..3], buffers.positions(0)[..3]);
    }

    #[test]
    fn test_interpolation_endpoints_are_exact() {
        let mut buffers = FrameBuffers::new();
        write_pattern(&mut buffers, 6, 0.3);
        buffers.commit(MarioState::default(), 2);
        write_pattern(&mut buffers, 6, 7.9);
        buffers.commit(MarioState::default(), 2);

        let previous = buffers.positions(buffers.index()).to_vec();
        let current = buffers.positions(1 - buffers.index()).to_vec();

        buffers.interpolate(0.0);
        assert_eq!(buffers.lerp_positions()[..6], previous[..6]);
        buffers.interpolate(1.0);
        assert_eq!(buffers.lerp_positions()[..6], current[..6]);

        buffers.interpolate(0.5);
        let mid = buffers.lerp_positions()[0];
        assert!((mid - (previous[0] + current[0]) * 0.5).length() < 1e-5);
    }

    #[test]
    fn test_lerp_is_unclamped() {
        let a = Vec3::ZERO;
        let b = Vec3::X;
        assert_eq!(lerp_unclamped(a, b, 2.0), Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(lerp_unclamped(a, b, -1.0), Vec3::new(-1.0, 0.0, 0.0));
    }
}
