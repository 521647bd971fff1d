use std::collections::HashMap;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub skew: f32,
    pub scale_x: f32,
    pub scale_y: f32,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        rotation: 0.0,
        skew: 0.0,
        scale_x: 1.0,
        scale_y: 1.0,
    };

    /// Composes `self` (a bind pose) with an animation offset.
    pub fn with_offset(&self, offset: &Transform) -> Transform {
        Transform {
            x: self.x + offset.x,
            y: self.y + offset.y,
            rotation: self.rotation + offset.rotation,
            skew: self.skew + offset.skew,
            scale_x: self.scale_x * offset.scale_x,
            scale_y: self.scale_y * offset.scale_y,
        }
    }

    #[cfg(feature = "glam")]
    pub fn to_affine2(&self) -> glam::Affine2 {
        let rotation = self.rotation.to_radians();
        let skew = self.skew.to_radians();
        let x_axis = glam::Vec2::new(rotation.cos(), rotation.sin()) * self.scale_x;
        let y_axis =
            glam::Vec2::new(-(rotation + skew).sin(), (rotation + skew).cos()) * self.scale_y;
        glam::Affine2::from_cols(x_axis, y_axis, glam::Vec2::new(self.x, self.y))
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum BoneKind {
    #[default]
    Bone,
    /// Deformable lattice bone; animated through vertex offsets instead of a transform.
    Surface,
}

#[derive(Clone, Debug)]
pub struct BoneData {
    pub name: String,
    pub parent: Option<usize>,
    pub kind: BoneKind,
    pub transform: Transform,
    /// Vertex component count of a surface bone.
    pub vertex_count: usize,
}

impl BoneData {
    pub fn new(name: impl Into<String>, parent: Option<usize>) -> Self {
        Self {
            name: name.into(),
            parent,
            kind: BoneKind::Bone,
            transform: Transform::IDENTITY,
            vertex_count: 0,
        }
    }

    pub fn is_bone(&self) -> bool {
        self.kind == BoneKind::Bone
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GeometryData {
    /// Identifies the vertex block; deform timelines target geometries by offset.
    pub offset: usize,
    pub vertex_count: usize,
}

#[derive(Clone, Debug)]
pub struct DisplayData {
    pub name: String,
    pub geometry: Option<GeometryData>,
}

#[derive(Clone, Debug)]
pub struct SlotData {
    pub name: String,
    pub bone: usize,
    pub display_index: i32,
    pub color: [f32; 4],
    pub z_index: i32,
    pub displays: Vec<DisplayData>,
}

impl SlotData {
    pub fn new(name: impl Into<String>, bone: usize) -> Self {
        Self {
            name: name.into(),
            bone,
            display_index: 0,
            color: [1.0; 4],
            z_index: 0,
            displays: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct IkConstraintData {
    pub name: String,
    pub bones: Vec<usize>,
    pub target: usize,
    pub weight: f32,
    pub bend_positive: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ArmatureData {
    pub name: String,
    pub bones: Vec<BoneData>,
    pub slots: Vec<SlotData>,
    pub ik_constraints: Vec<IkConstraintData>,
}

impl ArmatureData {
    pub fn bone_index(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TimelineType {
    BoneAll,
    BoneTranslate,
    BoneRotate,
    BoneScale,
    BoneAlpha,
    Surface,
    SlotDisplay,
    SlotZIndex,
    SlotColor,
    SlotDeform,
    SlotAlpha,
    IkConstraint,
    AnimationProgress,
    AnimationWeight,
    AnimationParameter,
    ZOrder,
}

impl TimelineType {
    /// Number of values a keyframe of this type carries, or `None` when variable (vertices,
    /// draw order).
    pub fn value_count(self) -> Option<usize> {
        match self {
            Self::BoneAll => Some(6),
            Self::BoneTranslate | Self::BoneRotate | Self::BoneScale => Some(2),
            Self::BoneAlpha | Self::SlotAlpha => Some(1),
            Self::SlotDisplay | Self::SlotZIndex => Some(1),
            Self::SlotColor => Some(4),
            Self::IkConstraint => Some(2),
            Self::AnimationProgress | Self::AnimationWeight => Some(1),
            Self::AnimationParameter => Some(2),
            Self::Surface | Self::SlotDeform | Self::ZOrder => None,
        }
    }

    /// Stepped timelines jump between keyframes instead of interpolating.
    pub fn is_stepped(self) -> bool {
        matches!(self, Self::SlotDisplay | Self::SlotZIndex | Self::ZOrder)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Keyframe {
    pub time: f32,
    pub values: Vec<f32>,
}

impl Keyframe {
    pub fn new(time: f32, values: impl Into<Vec<f32>>) -> Self {
        Self {
            time,
            values: values.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TimelineData {
    pub kind: TimelineType,
    pub frames: Vec<Keyframe>,
    /// Deform geometry offset for `SlotDeform` timelines.
    pub geometry_offset: usize,
    /// Blend-space coordinates for `AnimationProgress` timelines of a parametric parent.
    pub x: f32,
    pub y: f32,
}

impl TimelineData {
    pub fn new(kind: TimelineType, frames: Vec<Keyframe>) -> Self {
        Self {
            kind,
            frames,
            geometry_offset: 0,
            x: 0.0,
            y: 0.0,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Samples the timeline at `time` (seconds into the clip), writing into `out`.
    pub fn sample(&self, time: f32, out: &mut Vec<f32>) {
        out.clear();
        let Some(first) = self.frames.first() else {
            return;
        };
        if self.frames.len() == 1 || time <= first.time {
            out.extend_from_slice(&first.values);
            return;
        }

        let next = self.frames.partition_point(|f| f.time <= time);
        if next >= self.frames.len() {
            out.extend_from_slice(&self.frames[self.frames.len() - 1].values);
            return;
        }

        let a = &self.frames[next - 1];
        if self.kind.is_stepped() {
            out.extend_from_slice(&a.values);
            return;
        }
        let b = &self.frames[next];
        let span = b.time - a.time;
        let t = if span > 0.0 { (time - a.time) / span } else { 0.0 };
        out.extend(
            a.values
                .iter()
                .zip(b.values.iter())
                .map(|(from, to)| from + (to - from) * t),
        );
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum AnimationBlendType {
    #[default]
    None,
    /// One-dimensional parametric blend space over child states.
    E1D,
}

/// Clip data: per-target timeline descriptors plus clip-wide parameters.
#[derive(Clone, Debug)]
pub struct AnimationData {
    pub name: String,
    pub duration: f32,
    /// Default play count when a config asks for the clip default; `0` loops.
    pub play_times: u32,
    pub blend_type: AnimationBlendType,
    /// Frame rate of the pose cache; zero disables caching.
    pub cache_frame_rate: f32,
    pub bone_timelines: HashMap<String, Vec<Arc<TimelineData>>>,
    pub slot_timelines: HashMap<String, Vec<Arc<TimelineData>>>,
    pub constraint_timelines: HashMap<String, Vec<Arc<TimelineData>>>,
    pub z_order_timeline: Option<Arc<TimelineData>>,
}

impl Default for AnimationData {
    fn default() -> Self {
        Self {
            name: String::new(),
            duration: 0.0,
            play_times: 1,
            blend_type: AnimationBlendType::None,
            cache_frame_rate: 0.0,
            bone_timelines: HashMap::new(),
            slot_timelines: HashMap::new(),
            constraint_timelines: HashMap::new(),
            z_order_timeline: None,
        }
    }
}

impl AnimationData {
    pub fn new(name: impl Into<String>, duration: f32) -> Self {
        Self {
            name: name.into(),
            duration,
            ..Self::default()
        }
    }

    pub fn add_bone_timeline(&mut self, bone: &str, timeline: TimelineData) {
        self.bone_timelines
            .entry(bone.to_string())
            .or_default()
            .push(Arc::new(timeline));
    }

    pub fn add_slot_timeline(&mut self, slot: &str, timeline: TimelineData) {
        self.slot_timelines
            .entry(slot.to_string())
            .or_default()
            .push(Arc::new(timeline));
    }

    pub fn add_constraint_timeline(&mut self, constraint: &str, timeline: TimelineData) {
        self.constraint_timelines
            .entry(constraint.to_string())
            .or_default()
            .push(Arc::new(timeline));
    }

    pub fn bone_timelines(&self, bone: &str) -> Option<&[Arc<TimelineData>]> {
        self.bone_timelines.get(bone).map(Vec::as_slice)
    }

    pub fn slot_timelines(&self, slot: &str) -> Option<&[Arc<TimelineData>]> {
        self.slot_timelines.get(slot).map(Vec::as_slice)
    }

    pub fn constraint_timelines(&self, constraint: &str) -> Option<&[Arc<TimelineData>]> {
        self.constraint_timelines.get(constraint).map(Vec::as_slice)
    }

    /// Number of cache slots for this clip at its cache frame rate.
    pub fn cache_frame_count(&self) -> usize {
        if self.cache_frame_rate <= 0.0 {
            return 0;
        }
        (self.duration * self.cache_frame_rate).ceil() as usize + 1
    }
}
