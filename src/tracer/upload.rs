//! Background scene commit with progress reporting.
//!
//! After the asset is attached, the path tracer's scene has to be flattened
//! into instance and material tables. That happens on one worker thread; the
//! main loop only ever drains an event channel. The stream has a defined
//! terminal value: zero or more `Progress(f)` events with `f` in `[0, 1)`,
//! then exactly one `Complete` carrying the committed scene, which stands
//! for progress == 1 and is the sole readiness trigger.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use instant::Instant;

use crate::scene::SceneSnapshot;
use crate::tracer::{TracerInstance, TracerMaterial, TracerScene, SKY_RADIANCE};

/// One element of the upload progress stream.
#[derive(Debug)]
pub enum UploadEvent {
    /// Fractional progress, strictly below 1.
    Progress(f32),
    /// Terminal event: the committed scene; equivalent to progress == 1.
    Complete(TracerScene),
}

impl UploadEvent {
    /// The progress fraction this event stands for.
    pub fn fraction(&self) -> f32 {
        match self {
            UploadEvent::Progress(f) => *f,
            UploadEvent::Complete(_) => 1.0,
        }
    }
}

/// Handle to an in-flight scene commit.
///
/// There is no cancellation: dropping the handle lets the worker run to
/// completion and throw its results away when the channel is gone.
pub struct SceneUpload {
    rx: Receiver<UploadEvent>,
}

impl SceneUpload {
    /// Start committing `snapshot` on a background thread.
    pub fn spawn(snapshot: SceneSnapshot) -> Self {
        let (tx, rx) = channel();
        // The builder only fails when the OS refuses a thread, which is as
        // fatal as a failed GPU device request.
        thread::Builder::new()
            .name("scene-upload".to_string())
            .spawn(move || commit(snapshot, tx))
            .expect("failed to spawn the scene upload thread");
        Self { rx }
    }

    /// Wrap an externally driven event stream. Lets tests feed progress
    /// values synthetically without a worker thread.
    pub fn from_channel(rx: Receiver<UploadEvent>) -> Self {
        Self { rx }
    }

    /// Drain every event that arrived since the last poll. Never blocks.
    pub fn poll(&mut self) -> Vec<UploadEvent> {
        self.rx.try_iter().collect()
    }
}

fn commit(snapshot: SceneSnapshot, tx: Sender<UploadEvent>) {
    let started = Instant::now();
    let total = snapshot.instances.len() + 1;

    let mut instances = Vec::with_capacity(snapshot.instances.len());
    for (i, instance) in snapshot.instances.iter().enumerate() {
        match TracerInstance::build(
            instance.geometry.clone(),
            instance.world,
            instance.material,
        ) {
            Some(built) => instances.push(built),
            None => log::warn!(
                "skipping mesh {:?}: singular transform or missing bounds tree",
                instance.geometry.name
            ),
        }
        // One fraction per flattened mesh; the +1 in `total` keeps every
        // value below the terminal 1.0.
        let fraction = (i + 1) as f32 / total as f32;
        if tx.send(UploadEvent::Progress(fraction)).is_err() {
            // Receiver is gone; nobody is waiting for readiness anymore.
            return;
        }
    }

    let scene = TracerScene {
        instances,
        materials: snapshot
            .materials
            .iter()
            .map(TracerMaterial::from_data)
            .collect(),
        lights: snapshot.lights.clone(),
        sky: SKY_RADIANCE,
    };

    log::info!(
        "scene commit finished: {} instances in {:?}",
        scene.instances.len(),
        started.elapsed()
    );
    let _ = tx.send(UploadEvent::Complete(scene));
}
