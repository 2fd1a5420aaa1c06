//! Avatar rig — glTF mesh extraction, mouth classification, and the frame loop.
//!
//! GPU rendering is out of scope; the rig owns the state a renderer would
//! read every frame: working vertex buffers with dirty flags, the idle pose,
//! and the name of the model's first animation clip (played looped by the
//! renderer if present).

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

use mochi_core::mouth::{IdlePose, MeshSnapshot, MouthAnimator, MouthBand, idle_pose};

/// Display-frame cadence of the animation loop (~60 Hz).
const FRAME: Duration = Duration::from_millis(16);

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("failed to read model: {0}")]
    Model(#[from] gltf::Error),
    #[error("model contains no mesh geometry")]
    NoGeometry,
}

/// Load every mesh's vertex positions from a glTF/GLB file and build mouth
/// snapshots. Returns the animator plus the first animation clip name, if
/// the model carries any clips.
pub fn load_model(
    path: &Path,
    band: &MouthBand,
) -> Result<(MouthAnimator, Option<String>), AvatarError> {
    let (document, buffers, _images) = gltf::import(path)?;

    let mut meshes = Vec::new();
    let mut saw_geometry = false;
    for mesh in document.meshes() {
        let name = mesh.name().unwrap_or("mesh").to_string();
        for (i, primitive) in mesh.primitives().enumerate() {
            let reader = primitive.reader(|buffer| Some(&*buffers[buffer.index()]));
            let Some(positions) = reader.read_positions() else {
                continue;
            };
            saw_geometry = true;

            let label = if i == 0 { name.clone() } else { format!("{name}.{i}") };
            let snapshot = MeshSnapshot::new(&label, positions.collect(), band);
            if snapshot.mouth_vertex_count() == 0 {
                // Geometry mismatch is soft: the mesh just won't flap.
                warn!("avatar: no mouth vertices in mesh {label}, skipping");
                continue;
            }
            info!(
                "avatar: {} mouth vertices in mesh {label}",
                snapshot.mouth_vertex_count()
            );
            meshes.push(snapshot);
        }
    }

    if !saw_geometry {
        return Err(AvatarError::NoGeometry);
    }

    let clip = document
        .animations()
        .next()
        .map(|a| a.name().unwrap_or("clip").to_string());
    if let Some(clip) = &clip {
        info!("avatar: animation clip {clip:?} (looped)");
    }

    Ok((MouthAnimator::new(meshes), clip))
}

/// Handle to the running frame loop.
pub struct AvatarRig {
    animator: Arc<Mutex<MouthAnimator>>,
    pose_rx: watch::Receiver<IdlePose>,
    clip: Option<String>,
    task: tokio::task::JoinHandle<()>,
}

impl AvatarRig {
    /// Spawn the frame loop. The speaking flag is read from the watch
    /// channel and passed into each advance call — shared state, not a
    /// captured closure variable.
    pub fn spawn(
        animator: MouthAnimator,
        clip: Option<String>,
        speaking: watch::Receiver<bool>,
    ) -> Self {
        let animator = Arc::new(Mutex::new(animator));
        let (pose_tx, pose_rx) = watch::channel(idle_pose(0.0));

        let loop_animator = animator.clone();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let mut ticker = time::interval(FRAME);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let elapsed = started.elapsed().as_secs_f32();
                let is_speaking = *speaking.borrow();
                loop_animator
                    .lock()
                    .unwrap()
                    .advance(elapsed, is_speaking);
                let _ = pose_tx.send(idle_pose(elapsed));
            }
        });

        Self {
            animator,
            pose_rx,
            clip,
            task,
        }
    }

    /// Run `f` against the animation state — what a renderer would read to
    /// upload dirty vertex buffers.
    pub fn with_animator<R>(&self, f: impl FnOnce(&mut MouthAnimator) -> R) -> R {
        f(&mut self.animator.lock().unwrap())
    }

    pub fn idle_pose(&self) -> IdlePose {
        *self.pose_rx.borrow()
    }

    pub fn clip(&self) -> Option<&str> {
        self.clip.as_deref()
    }
}

impl Drop for AvatarRig {
    fn drop(&mut self) {
        self.task.abort();
    }
}
