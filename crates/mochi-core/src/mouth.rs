//! Mouth-region classification and audio-driven vertex animation.
//!
//! The animator owns, per tracked mesh, an immutable snapshot of the original
//! vertex positions plus a mutable working copy. While the speaking flag is
//! set, mouth vertices are displaced by a dual-frequency wave whose phase
//! depends on the vertex index, so neighbouring vertices stay out of phase
//! and the flap looks organic rather than a uniform piston. When speaking
//! stops, vertices relax back geometrically (ratio 0.9 per frame) until the
//! residual drops below [`SETTLE_EPSILON`], at which point the mesh is marked
//! settled and skipped — no per-frame buffer uploads for a mesh at rest.
//!
//! This is not a viseme system; displacement is a function of elapsed time
//! and vertex index only, never of the audio signal.

// ─── Bounding box ──────────────────────────────────────────────────────────

/// Axis-aligned bounding box of a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    /// None for an empty buffer.
    pub fn from_positions(positions: &[[f32; 3]]) -> Option<Self> {
        let first = positions.first()?;
        let mut min = *first;
        let mut max = *first;
        for p in positions {
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }
        Some(Self { min, max })
    }

    pub fn height(&self) -> f32 {
        self.max[1] - self.min[1]
    }

    pub fn depth(&self) -> f32 {
        self.max[2] - self.min[2]
    }
}

// ─── Mouth-region classifier ───────────────────────────────────────────────

/// Scale-invariant thresholds for the mouth-region classifier, expressed as
/// fractions of the mesh's own bounding box. The defaults are tuned for a
/// quadruped head model; substitute different bands for a different model
/// without touching the animator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouthBand {
    /// Horizontal half-width around center, as a fraction of model height.
    pub half_width: f32,
    /// Vertical band (lower-middle of the face), fractions of model height.
    pub y_band: (f32, f32),
    /// Depth band (front of face, nose tip excluded), fractions of depth.
    pub z_band: (f32, f32),
}

impl Default for MouthBand {
    fn default() -> Self {
        Self {
            half_width: 0.3,
            y_band: (0.25, 0.5),
            z_band: (0.5, 0.85),
        }
    }
}

impl MouthBand {
    /// Classify one vertex by absolute x and box-relative y/z.
    pub fn contains(&self, x: f32, rel_y: f32, rel_z: f32, height: f32) -> bool {
        x.abs() < height * self.half_width
            && rel_y > self.y_band.0
            && rel_y < self.y_band.1
            && rel_z > self.z_band.0
            && rel_z < self.z_band.1
    }

    /// Indices of every vertex inside the band. Empty for degenerate meshes
    /// (no extent on y or z).
    pub fn classify(&self, positions: &[[f32; 3]]) -> Vec<usize> {
        let Some(bounds) = Aabb::from_positions(positions) else {
            return Vec::new();
        };
        let height = bounds.height();
        let depth = bounds.depth();
        if height <= 0.0 || depth <= 0.0 {
            return Vec::new();
        }

        positions
            .iter()
            .enumerate()
            .filter(|(_, p)| {
                let rel_y = (p[1] - bounds.min[1]) / height;
                let rel_z = (p[2] - bounds.min[2]) / depth;
                self.contains(p[0], rel_y, rel_z, height)
            })
            .map(|(i, _)| i)
            .collect()
    }
}

// ─── Animation constants ───────────────────────────────────────────────────

const WAVE1_RATE: f32 = 15.0;
const WAVE1_PHASE: f32 = 0.5;
const WAVE1_AMP: f32 = 0.015;
const WAVE2_RATE: f32 = 25.0;
const WAVE2_PHASE: f32 = 0.3;
const WAVE2_AMP: f32 = 0.008;

/// Fraction of the remaining offset removed per relaxation frame.
const RELAX_FACTOR: f32 = 0.1;

/// Residual below which a vertex counts as back at rest.
pub const SETTLE_EPSILON: f32 = 1e-4;

/// Mouth displacement at elapsed time `t` for vertex index `idx`.
/// Applied as `y = orig_y + d` and `z = orig_z + d * 0.5`.
pub fn displacement(elapsed_secs: f32, idx: usize) -> f32 {
    let wave1 = (elapsed_secs * WAVE1_RATE + idx as f32 * WAVE1_PHASE).sin() * WAVE1_AMP;
    let wave2 = (elapsed_secs * WAVE2_RATE + idx as f32 * WAVE2_PHASE).sin() * WAVE2_AMP;
    wave1 + wave2
}

// ─── Mesh snapshot ─────────────────────────────────────────────────────────

/// One tracked mesh: the immutable original positions, the mutable working
/// copy a renderer uploads, and the classified mouth vertex set.
#[derive(Debug, Clone)]
pub struct MeshSnapshot {
    name: String,
    original: Vec<[f32; 3]>,
    current: Vec<[f32; 3]>,
    mouth: Vec<usize>,
    dirty: bool,
    settled: bool,
}

impl MeshSnapshot {
    pub fn new(name: &str, positions: Vec<[f32; 3]>, band: &MouthBand) -> Self {
        let mouth = band.classify(&positions);
        Self {
            name: name.to_string(),
            current: positions.clone(),
            original: positions,
            mouth,
            dirty: false,
            settled: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mouth_vertex_count(&self) -> usize {
        self.mouth.len()
    }

    pub fn mouth_indices(&self) -> &[usize] {
        &self.mouth
    }

    /// Working vertex positions (what a renderer uploads when dirty).
    pub fn positions(&self) -> &[[f32; 3]] {
        &self.current
    }

    pub fn original_positions(&self) -> &[[f32; 3]] {
        &self.original
    }

    /// True once every mouth vertex is within epsilon of its original
    /// position; the relax pass skips settled meshes entirely.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// True if the last frame moved at least one vertex; clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn speak_frame(&mut self, elapsed_secs: f32) {
        // Geometry mismatch (no classified vertices) is a soft no-op.
        if self.mouth.is_empty() {
            return;
        }
        for &idx in &self.mouth {
            let d = displacement(elapsed_secs, idx);
            self.current[idx][1] = self.original[idx][1] + d;
            self.current[idx][2] = self.original[idx][2] + d * 0.5;
        }
        self.dirty = true;
        self.settled = false;
    }

    fn relax_frame(&mut self) {
        if self.settled || self.mouth.is_empty() {
            return;
        }
        let mut moved = false;
        let mut all_at_rest = true;
        for &idx in &self.mouth {
            let [_, oy, oz] = self.original[idx];
            let [_, cy, cz] = self.current[idx];
            if (cy - oy).abs() > SETTLE_EPSILON || (cz - oz).abs() > SETTLE_EPSILON {
                let ny = cy + (oy - cy) * RELAX_FACTOR;
                let nz = cz + (oz - cz) * RELAX_FACTOR;
                self.current[idx][1] = ny;
                self.current[idx][2] = nz;
                moved = true;
                if (ny - oy).abs() > SETTLE_EPSILON || (nz - oz).abs() > SETTLE_EPSILON {
                    all_at_rest = false;
                }
            }
        }
        if moved {
            self.dirty = true;
        }
        if all_at_rest {
            self.settled = true;
        }
    }
}

// ─── Animator ──────────────────────────────────────────────────────────────

/// Animates the mouth region of every tracked mesh.
#[derive(Debug, Default)]
pub struct MouthAnimator {
    meshes: Vec<MeshSnapshot>,
}

impl MouthAnimator {
    pub fn new(meshes: Vec<MeshSnapshot>) -> Self {
        Self { meshes }
    }

    pub fn meshes(&self) -> &[MeshSnapshot] {
        &self.meshes
    }

    pub fn meshes_mut(&mut self) -> &mut [MeshSnapshot] {
        &mut self.meshes
    }

    /// One display frame: displace mouth vertices while speaking, relax them
    /// back toward rest otherwise. The speaking flag is passed in each tick
    /// rather than captured, so the caller owns that state.
    pub fn advance(&mut self, elapsed_secs: f32, speaking: bool) {
        for mesh in &mut self.meshes {
            if speaking {
                mesh.speak_frame(elapsed_secs);
            } else {
                mesh.relax_frame();
            }
        }
    }
}

// ─── Idle pose ─────────────────────────────────────────────────────────────

/// Whole-model idle motion: a slow yaw sway and a gentle vertical bob,
/// applied by the renderer on top of the model's base transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdlePose {
    pub yaw: f32,
    pub bob: f32,
}

pub fn idle_pose(elapsed_secs: f32) -> IdlePose {
    IdlePose {
        yaw: (elapsed_secs * 0.3).sin() * 0.2,
        bob: (elapsed_secs * 2.0).sin() * 0.05,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Unit-cube head: corners pin the bounding box, one vertex sits in the
    /// mouth band, one on the nose tip, one at the back of the head.
    fn head_positions() -> Vec<[f32; 3]> {
        vec![
            [-0.5, 0.0, 0.0], // box corner
            [0.5, 1.0, 1.0],  // box corner
            [0.0, 0.4, 0.7],  // mouth band
            [0.0, 0.4, 0.95], // nose tip — excluded by z band
            [0.0, 0.4, 0.2],  // back of head
            [0.45, 0.4, 0.7], // too far off-center (0.45 >= 0.3 * height)
        ]
    }

    fn mouth_mesh() -> MeshSnapshot {
        MeshSnapshot::new("head", head_positions(), &MouthBand::default())
    }

    #[test]
    fn classifier_picks_the_mouth_band_only() {
        let indices = MouthBand::default().classify(&head_positions());
        assert_eq!(indices, vec![2]);
    }

    #[test]
    fn classifier_is_scale_invariant() {
        let scaled: Vec<[f32; 3]> = head_positions()
            .into_iter()
            .map(|p| [p[0] * 7.0, p[1] * 7.0, p[2] * 7.0])
            .collect();
        assert_eq!(MouthBand::default().classify(&scaled), vec![2]);
    }

    #[test]
    fn classifier_rejects_degenerate_meshes() {
        let flat = vec![[0.0, 1.0, 0.0], [1.0, 1.0, 0.5]];
        assert!(MouthBand::default().classify(&flat).is_empty());
        assert!(MouthBand::default().classify(&[]).is_empty());
    }

    #[test]
    fn speaking_displacement_is_exact() {
        let mut mesh = mouth_mesh();
        let t = 0.73_f32;
        mesh.speak_frame(t);

        let idx = 2;
        let wave1 = (t * 15.0 + idx as f32 * 0.5).sin() * 0.015;
        let wave2 = (t * 25.0 + idx as f32 * 0.3).sin() * 0.008;
        let d = wave1 + wave2;

        let orig = mesh.original_positions()[idx];
        let cur = mesh.positions()[idx];
        assert_eq!(cur[1], orig[1] + d);
        assert_eq!(cur[2], orig[2] + d * 0.5);
        // x never moves
        assert_eq!(cur[0], orig[0]);
    }

    #[test]
    fn speaking_marks_dirty_and_unsettled() {
        let mut mesh = mouth_mesh();
        assert!(mesh.is_settled());
        mesh.speak_frame(1.0);
        assert!(!mesh.is_settled());
        assert!(mesh.take_dirty());
        assert!(!mesh.take_dirty());
    }

    #[test]
    fn relaxation_decays_monotonically_and_settles() {
        let mut mesh = mouth_mesh();
        mesh.speak_frame(0.4);
        mesh.take_dirty();

        let idx = 2;
        let orig_y = mesh.original_positions()[idx][1];
        let mut residual = (mesh.positions()[idx][1] - orig_y).abs();
        assert!(residual > SETTLE_EPSILON);

        let mut frames = 0;
        while !mesh.is_settled() {
            mesh.relax_frame();
            let next = (mesh.positions()[idx][1] - orig_y).abs();
            assert!(next < residual, "residual must shrink every frame");
            residual = next;
            frames += 1;
            assert!(frames < 200, "relaxation must converge in finite frames");
        }

        assert!(residual <= SETTLE_EPSILON);
        assert!((mesh.positions()[idx][2] - mesh.original_positions()[idx][2]).abs() <= SETTLE_EPSILON);
    }

    #[test]
    fn settled_mesh_stops_updating() {
        let mut mesh = mouth_mesh();
        mesh.speak_frame(0.4);
        while !mesh.is_settled() {
            mesh.relax_frame();
        }
        mesh.take_dirty();

        let before = mesh.positions().to_vec();
        mesh.relax_frame();
        assert_eq!(mesh.positions(), &before[..]);
        assert!(!mesh.take_dirty());
    }

    #[test]
    fn mesh_without_mouth_vertices_noops() {
        let positions = vec![[0.0, 0.0, 0.0], [0.0, 1.0, 0.1], [0.0, 0.9, 0.2]];
        let mut mesh = MeshSnapshot::new("tail", positions.clone(), &MouthBand::default());
        assert_eq!(mesh.mouth_vertex_count(), 0);

        mesh.speak_frame(2.0);
        assert_eq!(mesh.positions(), &positions[..]);
        assert!(!mesh.take_dirty());
    }

    #[test]
    fn animator_routes_by_speaking_flag() {
        let mut animator = MouthAnimator::new(vec![mouth_mesh()]);
        animator.advance(0.5, true);
        assert!(!animator.meshes()[0].is_settled());

        // Enough relax frames to settle from any single displacement.
        for _ in 0..120 {
            animator.advance(0.5, false);
        }
        assert!(animator.meshes()[0].is_settled());
    }

    #[test]
    fn idle_pose_is_deterministic() {
        let t = 2.5_f32;
        let pose = idle_pose(t);
        assert_eq!(pose.yaw, (t * 0.3).sin() * 0.2);
        assert_eq!(pose.bob, (t * 2.0).sin() * 0.05);
    }
}
