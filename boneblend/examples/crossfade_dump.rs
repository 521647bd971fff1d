//! Crossfades `walk` into `run` on a two-bone rig and prints one JSON pose per frame.
//!
//! `cargo run --example crossfade_dump --features json -- [fade seconds] [frames]`
//! Set `RUST_LOG=boneblend=debug` to trace state lifecycles.

use boneblend::{
    AnimationConfig, AnimationController, AnimationData, AnimationEvent, AnimationEventListener,
    Armature, ArmatureData, BoneData, Keyframe, TimelineData, TimelineType,
};
use serde_json::json;
use std::sync::Arc;

struct PrintEvents;

impl AnimationEventListener for PrintEvents {
    fn on_event(&mut self, _armature: &Armature, event: &AnimationEvent) {
        eprintln!("event {:?} on {}", event.kind, event.state_name);
    }
}

fn clip(name: &str, duration: f32, distance: f32) -> AnimationData {
    let mut clip = AnimationData::new(name, duration);
    clip.play_times = 0;
    clip.add_bone_timeline(
        "hip",
        TimelineData::new(
            TimelineType::BoneTranslate,
            vec![
                Keyframe::new(0.0, [0.0, 0.0]),
                Keyframe::new(duration, [distance, 0.0]),
            ],
        ),
    );
    clip.add_bone_timeline(
        "leg",
        TimelineData::new(
            TimelineType::BoneRotate,
            vec![
                Keyframe::new(0.0, [-30.0, 0.0]),
                Keyframe::new(duration * 0.5, [30.0, 0.0]),
                Keyframe::new(duration, [-30.0, 0.0]),
            ],
        ),
    );
    clip
}

fn main() {
    env_logger::init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let fade: f32 = args
        .first()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.3);
    let frames: usize = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(30);

    let data = Arc::new(ArmatureData {
        name: "biped".to_string(),
        bones: vec![BoneData::new("hip", None), BoneData::new("leg", Some(0))],
        ..ArmatureData::default()
    });
    let mut armature = Armature::new(data);
    armature.set_listener(PrintEvents);

    let mut controller =
        AnimationController::with_animations([clip("walk", 1.0, 40.0), clip("run", 0.6, 90.0)]);
    controller
        .play(&mut armature, "walk", 0)
        .expect("play walk");

    let dt = 1.0 / 30.0;
    for frame in 0..frames {
        if frame == frames / 3 {
            let config = AnimationConfig {
                fade_in_time: fade,
                ..AnimationConfig::new("run")
            };
            controller
                .fade_in(&mut armature, &config)
                .expect("fade in run");
        }
        controller.advance_time(&mut armature, dt);

        let bones: Vec<_> = armature
            .bones
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let t = armature.local_transform(i);
                json!({
                    "name": armature.bone_name(i),
                    "x": t.x,
                    "y": t.y,
                    "rotation": t.rotation,
                })
            })
            .collect();
        let states: Vec<_> = controller
            .states()
            .into_iter()
            .filter_map(|h| controller.get(h))
            .map(|s| {
                json!({
                    "name": s.name(),
                    "weight": s.weight_result(),
                    "fadeProgress": s.fade_progress(),
                })
            })
            .collect();
        println!(
            "{}",
            json!({ "frame": frame, "states": states, "bones": bones })
        );
    }
}
