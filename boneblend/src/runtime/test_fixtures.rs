use crate::{
    AnimationData, AnimationEvent, AnimationEventKind, AnimationEventListener,
    AnimationStateHandle, Armature, ArmatureData, BoneData, BoneKind, DisplayData, GeometryData,
    IkConstraintData, Keyframe, SlotData, TimelineData, TimelineType,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// ```text
/// root ─┬─ armL ── handL
///       └─ armR
/// tail (surface, second root)
/// ```
pub(crate) fn rig_data() -> Arc<ArmatureData> {
    let mut tail = BoneData::new("tail", None);
    tail.kind = BoneKind::Surface;
    tail.vertex_count = 4;

    let mut body = SlotData::new("body", 0);
    body.displays.push(DisplayData {
        name: "body".to_string(),
        geometry: Some(GeometryData {
            offset: 0,
            vertex_count: 8,
        }),
    });

    Arc::new(ArmatureData {
        name: "rig".to_string(),
        bones: vec![
            BoneData::new("root", None),
            BoneData::new("armL", Some(0)),
            BoneData::new("handL", Some(1)),
            BoneData::new("armR", Some(0)),
            tail,
        ],
        slots: vec![body, SlotData::new("hand", 2)],
        ik_constraints: vec![IkConstraintData {
            name: "armIk".to_string(),
            bones: vec![1, 2],
            target: 3,
            weight: 1.0,
            bend_positive: true,
        }],
    })
}

pub(crate) fn rig() -> Armature {
    Armature::new(rig_data())
}

pub(crate) fn translate(frames: &[(f32, f32)]) -> TimelineData {
    TimelineData::new(
        TimelineType::BoneTranslate,
        frames
            .iter()
            .map(|&(time, x)| Keyframe::new(time, [x, 0.0]))
            .collect(),
    )
}

/// Clip moving `bone` along x from `0` to `10` over its duration.
pub(crate) fn slide_clip(name: &str, duration: f32, bone: &str) -> AnimationData {
    let mut clip = AnimationData::new(name, duration);
    clip.add_bone_timeline(bone, translate(&[(0.0, 0.0), (duration, 10.0)]));
    clip
}

/// Clip holding `root` at a constant x offset.
pub(crate) fn hold_clip(name: &str, x: f32) -> AnimationData {
    let mut clip = AnimationData::new(name, 1.0);
    clip.play_times = 0;
    clip.add_bone_timeline("root", translate(&[(0.0, x)]));
    clip
}

pub(crate) fn progress_timeline(x: f32) -> Arc<TimelineData> {
    let mut timeline = TimelineData::new(
        TimelineType::AnimationProgress,
        vec![Keyframe::new(0.0, [0.0]), Keyframe::new(1.0, [1.0])],
    );
    timeline.x = x;
    Arc::new(timeline)
}

#[derive(Clone, Default)]
pub(crate) struct EventLog {
    events: Rc<RefCell<Vec<AnimationEvent>>>,
}

impl EventLog {
    pub(crate) fn kinds(&self) -> Vec<AnimationEventKind> {
        self.events.borrow().iter().map(|e| e.kind).collect()
    }

    pub(crate) fn states(&self) -> Vec<AnimationStateHandle> {
        self.events.borrow().iter().map(|e| e.state).collect()
    }

    pub(crate) fn count(&self, kind: AnimationEventKind) -> usize {
        self.events.borrow().iter().filter(|e| e.kind == kind).count()
    }

    pub(crate) fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

pub(crate) struct Recorder {
    pub log: EventLog,
    pub only: Option<AnimationEventKind>,
}

impl AnimationEventListener for Recorder {
    fn has_listener(&self, kind: AnimationEventKind) -> bool {
        self.only.is_none_or(|only| only == kind)
    }

    fn on_event(&mut self, _armature: &Armature, event: &AnimationEvent) {
        self.log.events.borrow_mut().push(event.clone());
    }
}

pub(crate) fn record_events(armature: &mut Armature) -> EventLog {
    let log = EventLog::default();
    armature.set_listener(Recorder {
        log: log.clone(),
        only: None,
    });
    log
}
