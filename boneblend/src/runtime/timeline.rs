use super::animation_state::StateId;
use super::armature::Armature;
use super::blend_state::{BlendKey, BlendKind};
use crate::pool::Recycle;
use crate::{ArmatureData, TimelineData, Transform};
use std::sync::Arc;

pub(crate) const TIME_EPSILON: f32 = 1e-6;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum PlayState {
    #[default]
    NotStarted,
    Playing,
    Complete,
}

impl PlayState {
    /// Timelines keep updating until they report completion.
    pub fn needs_update(self) -> bool {
        self != PlayState::Complete
    }
}

/// What a timeline animates, with its strongly typed target.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum TimelineKind {
    /// Master cursor of a state: loop counting and completion.
    #[default]
    Action,
    ZOrder,
    BoneAll { bone: usize },
    BoneTranslate { bone: usize },
    BoneRotate { bone: usize },
    BoneScale { bone: usize },
    BoneAlpha { bone: usize },
    Surface { bone: usize },
    SlotDisplay { slot: usize },
    SlotColor { slot: usize },
    SlotZIndex { slot: usize },
    SlotDeform { slot: usize, geometry_offset: usize },
    SlotAlpha { slot: usize },
    IkConstraint { constraint: usize },
    AnimationProgress { state: StateId },
    AnimationWeight { state: StateId },
    AnimationParameter { state: StateId },
}

impl TimelineKind {
    pub fn blend_key(&self) -> Option<BlendKey> {
        let key = match *self {
            Self::BoneAll { bone }
            | Self::BoneTranslate { bone }
            | Self::BoneRotate { bone }
            | Self::BoneScale { bone } => BlendKey::new(BlendKind::BoneTransform, bone),
            Self::BoneAlpha { bone } => BlendKey::new(BlendKind::BoneAlpha, bone),
            Self::Surface { bone } => BlendKey::new(BlendKind::Surface, bone),
            Self::SlotZIndex { slot } => BlendKey::new(BlendKind::SlotZIndex, slot),
            Self::SlotDeform { slot, .. } => BlendKey::new(BlendKind::SlotDeform, slot),
            Self::SlotAlpha { slot } => BlendKey::new(BlendKind::SlotAlpha, slot),
            _ => return None,
        };
        Some(key)
    }

    pub fn bone(&self) -> Option<usize> {
        match *self {
            Self::BoneAll { bone }
            | Self::BoneTranslate { bone }
            | Self::BoneRotate { bone }
            | Self::BoneScale { bone }
            | Self::BoneAlpha { bone }
            | Self::Surface { bone } => Some(bone),
            _ => None,
        }
    }

    pub fn slot(&self) -> Option<usize> {
        match *self {
            Self::SlotDisplay { slot }
            | Self::SlotColor { slot }
            | Self::SlotZIndex { slot }
            | Self::SlotDeform { slot, .. }
            | Self::SlotAlpha { slot } => Some(slot),
            _ => None,
        }
    }

    pub fn child_state(&self) -> Option<StateId> {
        match *self {
            Self::AnimationProgress { state }
            | Self::AnimationWeight { state }
            | Self::AnimationParameter { state } => Some(state),
            _ => None,
        }
    }
}

/// Snapshot of a cursor, handed from the action timeline to its followers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) struct Cursor {
    pub play_state: PlayState,
    pub play_times: u32,
    pub time: f32,
}

/// Playback window of the owning state, read by the action timeline.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Playhead {
    pub play_times: u32,
    pub duration: f32,
    pub position: f32,
    pub playing: bool,
}

/// Transitions reported by an action timeline update.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ActionOutcome {
    pub started: bool,
    pub loop_completed: bool,
    pub completed: bool,
}

/// Writes a timeline cannot perform itself because they target another animation state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum NestedEffect {
    Progress(StateId, f32),
    Weight(StateId, f32),
    Parameter(StateId, f32, f32),
}

pub(crate) struct TimelineContext<'a> {
    pub armature: &'a mut Armature,
    pub weight_result: f32,
    pub fade_progress: f32,
    pub fading: bool,
}

/// Per-property playback cursor bound to one target.
#[derive(Debug, Default)]
pub struct TimelineState {
    pub(crate) kind: TimelineKind,
    data: Option<Arc<TimelineData>>,
    pub(crate) play_state: PlayState,
    pub(crate) current_play_times: u32,
    pub(crate) current_time: f32,
    /// Set when the next blend must mark its target dirty.
    pub(crate) dirty: bool,
    fading_out: bool,
    sampled: bool,
    result: Vec<f32>,
}

impl Recycle for TimelineState {
    fn clear(&mut self) {
        self.kind = TimelineKind::Action;
        self.data = None;
        self.play_state = PlayState::NotStarted;
        self.current_play_times = 0;
        self.current_time = 0.0;
        self.dirty = false;
        self.fading_out = false;
        self.sampled = false;
        self.result.clear();
    }
}

impl TimelineState {
    /// Binds the timeline. `data == None` makes it a pose timeline that holds the bind pose.
    pub(crate) fn init(&mut self, kind: TimelineKind, data: Option<Arc<TimelineData>>) {
        self.kind = kind;
        self.data = data;
        self.play_state = PlayState::NotStarted;
        self.current_play_times = 0;
        self.current_time = -1.0;
        self.dirty = true;
        self.fading_out = false;
        self.sampled = false;
        self.result.clear();
    }

    pub fn kind(&self) -> TimelineKind {
        self.kind
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    pub fn current_time(&self) -> f32 {
        self.current_time
    }

    pub fn current_play_times(&self) -> u32 {
        self.current_play_times
    }

    pub fn is_pose(&self) -> bool {
        self.data.is_none()
    }

    pub fn is_fading_out(&self) -> bool {
        self.fading_out
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn data(&self) -> Option<&Arc<TimelineData>> {
        self.data.as_ref()
    }

    pub(crate) fn cursor(&self) -> Cursor {
        Cursor {
            play_state: self.play_state,
            play_times: self.current_play_times,
            time: self.current_time,
        }
    }

    pub(crate) fn fade_out(&mut self) {
        self.fading_out = true;
        self.dirty = false;
    }

    /// Forces the next update to resample, even at an unchanged time.
    pub(crate) fn invalidate(&mut self) {
        self.dirty = true;
        self.current_time = -1.0;
        self.sampled = false;
    }

    fn frame_count(&self) -> usize {
        self.data.as_ref().map_or(0, |d| d.frame_count())
    }

    /// Moves an action timeline to `passed_time` seconds of total playback.
    ///
    /// Returns whether the play count or the in-loop time changed.
    pub(crate) fn set_action_time(&mut self, passed_time: f32, playhead: &Playhead) -> bool {
        let prev_play_times = self.current_play_times;
        let prev_time = self.current_time;

        let duration = playhead.duration;
        let total_time = playhead.play_times as f32 * duration;
        if playhead.play_times > 0 && (passed_time >= total_time || passed_time <= -total_time) {
            if self.play_state != PlayState::Complete && playhead.playing {
                self.play_state = PlayState::Complete;
            }
            self.current_play_times = playhead.play_times;
            self.current_time = if passed_time < 0.0 {
                0.0
            } else if self.play_state == PlayState::Complete {
                duration + TIME_EPSILON
            } else {
                duration
            };
        } else {
            if self.play_state != PlayState::Playing && playhead.playing {
                self.play_state = PlayState::Playing;
            }
            if duration <= 0.0 {
                self.current_play_times = 0;
                self.current_time = 0.0;
            } else if passed_time < 0.0 {
                let passed_time = -passed_time;
                self.current_play_times = (passed_time / duration).floor() as u32;
                self.current_time = duration - passed_time % duration;
            } else {
                self.current_play_times = (passed_time / duration).floor() as u32;
                self.current_time = passed_time % duration;
            }
        }
        self.current_time += playhead.position;

        self.current_play_times != prev_play_times || self.current_time != prev_time
    }

    /// Advances the action timeline and reports start / loop / completion transitions.
    pub(crate) fn update_action(&mut self, passed_time: f32, playhead: &Playhead) -> ActionOutcome {
        let prev_state = self.play_state;
        let mut prev_play_times = self.current_play_times;
        let mut outcome = ActionOutcome::default();

        let changed = self.set_action_time(passed_time, playhead);

        if prev_state == PlayState::NotStarted {
            if self.play_state == prev_state {
                return outcome;
            }
            prev_play_times = self.current_play_times;
            outcome.started = true;
        } else if !changed {
            return outcome;
        }

        if self.current_play_times != prev_play_times {
            outcome.loop_completed = true;
            outcome.completed = self.play_state == PlayState::Complete;
        }
        outcome
    }

    /// Follows the action timeline's cursor. Returns whether the sampled time moved.
    fn follow(&mut self, action: Cursor) -> bool {
        let prev_play_times = self.current_play_times;
        let prev_time = self.current_time;

        if self.frame_count() <= 1 {
            self.play_state = if action.play_state == PlayState::NotStarted {
                PlayState::NotStarted
            } else {
                PlayState::Complete
            };
            self.current_play_times = 1;
        } else {
            self.play_state = action.play_state;
            self.current_play_times = action.play_times;
        }
        self.current_time = action.time;

        self.current_play_times != prev_play_times || self.current_time != prev_time
    }

    fn sample(&mut self, armature: &ArmatureData) {
        match &self.data {
            Some(data) => data.sample(self.current_time, &mut self.result),
            None => pose_values(self.kind, armature, &mut self.result),
        }
        self.sampled = true;
    }

    /// Advances a property timeline and applies the writes that bypass accumulators.
    pub(crate) fn update(
        &mut self,
        action: Cursor,
        ctx: &mut TimelineContext<'_>,
    ) -> Option<NestedEffect> {
        let changed = self.follow(action);
        let fresh = changed || !self.sampled;
        if fresh {
            self.sample(&ctx.armature.data);
        }

        match self.kind {
            TimelineKind::SlotDisplay { slot } => {
                if fresh && self.play_state != PlayState::NotStarted {
                    if let Some(&value) = self.result.first() {
                        let slot = &mut ctx.armature.slots[slot];
                        let display_index = value as i32;
                        if slot.display_index != display_index {
                            slot.display_index = display_index;
                            slot.display_dirty = true;
                        }
                    }
                }
                None
            }
            TimelineKind::SlotColor { slot } => {
                if self.result.len() < 4 {
                    return None;
                }
                let color = &mut ctx.armature.slots[slot].color;
                if ctx.fading {
                    let progress = ctx.fade_progress.powi(4);
                    for (c, target) in color.iter_mut().zip(self.result.iter()) {
                        *c += (target - *c) * progress;
                    }
                } else if fresh || self.dirty {
                    color.copy_from_slice(&self.result[..4]);
                    self.dirty = false;
                }
                None
            }
            TimelineKind::IkConstraint { constraint } => {
                if let [weight, bend, ..] = self.result[..] {
                    let constraint = &mut ctx.armature.ik_constraints[constraint];
                    constraint.weight += (weight - constraint.weight) * ctx.weight_result;
                    constraint.bend_positive = bend > 0.0;
                }
                None
            }
            TimelineKind::ZOrder => {
                if fresh && !self.result.is_empty() {
                    let order: Vec<usize> = self.result.iter().map(|v| *v as usize).collect();
                    ctx.armature.sort_z_order(Some(&order));
                }
                None
            }
            TimelineKind::AnimationProgress { state } => {
                let progress = self.result.first().copied()?;
                fresh.then_some(NestedEffect::Progress(state, progress))
            }
            TimelineKind::AnimationWeight { state } => {
                let weight = self.result.first().copied()?;
                fresh.then_some(NestedEffect::Weight(state, weight))
            }
            TimelineKind::AnimationParameter { state } => match self.result[..] {
                [x, y, ..] if fresh => Some(NestedEffect::Parameter(state, x, y)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Pushes this timeline's sampled values into its target, scaled by the accumulator's grant.
    ///
    /// The first contribution of a tick overwrites, later ones accumulate.
    pub(crate) fn blend(&mut self, armature: &mut Armature, is_dirty: bool) {
        let Some(key) = self.kind.blend_key() else {
            return;
        };
        let Some(blend_state) = armature.blend_state(key) else {
            return;
        };
        let weight = blend_state.blend_weight;
        let additive = blend_state.dirty > 1;
        let values = &self.result;
        let value = |i: usize, default: f32| values.get(i).copied().unwrap_or(default);

        match self.kind {
            TimelineKind::BoneAll { bone } => {
                let pose = &mut armature.bones[bone].animation_pose;
                blend_component(&mut pose.x, value(0, 0.0), weight, additive);
                blend_component(&mut pose.y, value(1, 0.0), weight, additive);
                blend_component(&mut pose.rotation, value(2, 0.0), weight, additive);
                blend_component(&mut pose.skew, value(3, 0.0), weight, additive);
                blend_scale(&mut pose.scale_x, value(4, 1.0), weight, additive);
                blend_scale(&mut pose.scale_y, value(5, 1.0), weight, additive);
            }
            TimelineKind::BoneTranslate { bone } => {
                let pose = &mut armature.bones[bone].animation_pose;
                blend_component(&mut pose.x, value(0, 0.0), weight, additive);
                blend_component(&mut pose.y, value(1, 0.0), weight, additive);
            }
            TimelineKind::BoneRotate { bone } => {
                let pose = &mut armature.bones[bone].animation_pose;
                blend_component(&mut pose.rotation, value(0, 0.0), weight, additive);
                blend_component(&mut pose.skew, value(1, 0.0), weight, additive);
            }
            TimelineKind::BoneScale { bone } => {
                let pose = &mut armature.bones[bone].animation_pose;
                blend_scale(&mut pose.scale_x, value(0, 1.0), weight, additive);
                blend_scale(&mut pose.scale_y, value(1, 1.0), weight, additive);
            }
            TimelineKind::BoneAlpha { bone } => {
                blend_component(&mut armature.bones[bone].alpha, value(0, 1.0), weight, additive);
            }
            TimelineKind::Surface { bone } => {
                blend_vertices(&mut armature.bones[bone].deform, values, weight, additive);
            }
            TimelineKind::SlotAlpha { slot } => {
                blend_component(&mut armature.slots[slot].alpha, value(0, 1.0), weight, additive);
            }
            TimelineKind::SlotZIndex { slot } => {
                blend_component(&mut armature.slots[slot].z_index, value(0, 0.0), weight, additive);
            }
            TimelineKind::SlotDeform {
                slot,
                geometry_offset,
            } => {
                let vertex_count = armature.data.slots[slot]
                    .displays
                    .iter()
                    .filter_map(|d| d.geometry)
                    .find(|g| g.offset == geometry_offset)
                    .map_or(values.len(), |g| g.vertex_count);
                let deform = armature.slots[slot]
                    .deform
                    .entry(geometry_offset)
                    .or_insert_with(|| vec![0.0; vertex_count]);
                blend_vertices(deform, values, weight, additive);
            }
            _ => {}
        }

        if is_dirty || self.dirty {
            self.dirty = false;
            if let Some(bone) = self.kind.bone() {
                armature.bones[bone].transform_dirty = true;
            } else if let Some(slot) = self.kind.slot() {
                armature.slots[slot].display_dirty = true;
            }
        }
    }
}

fn blend_component(target: &mut f32, value: f32, weight: f32, additive: bool) {
    if additive {
        *target += value * weight;
    } else {
        *target = value * weight;
    }
}

fn blend_scale(target: &mut f32, value: f32, weight: f32, additive: bool) {
    if additive {
        *target += (value - 1.0) * weight;
    } else {
        *target = (value - 1.0) * weight + 1.0;
    }
}

fn blend_vertices(target: &mut Vec<f32>, values: &[f32], weight: f32, additive: bool) {
    if target.len() < values.len() {
        target.resize(values.len(), 0.0);
    }
    for (i, t) in target.iter_mut().enumerate() {
        let v = values.get(i).copied().unwrap_or(0.0);
        blend_component(t, v, weight, additive);
    }
}

/// Bind-pose values written by pose timelines.
fn pose_values(kind: TimelineKind, armature: &ArmatureData, out: &mut Vec<f32>) {
    out.clear();
    match kind {
        TimelineKind::BoneAll { .. } => {
            let t = Transform::IDENTITY;
            out.extend_from_slice(&[t.x, t.y, t.rotation, t.skew, t.scale_x, t.scale_y]);
        }
        TimelineKind::Surface { bone } => {
            out.resize(armature.bones[bone].vertex_count, 0.0);
        }
        TimelineKind::SlotDisplay { slot } => {
            out.push(armature.slots[slot].display_index as f32);
        }
        TimelineKind::SlotColor { slot } => {
            out.extend_from_slice(&armature.slots[slot].color);
        }
        TimelineKind::SlotDeform {
            slot,
            geometry_offset,
        } => {
            let vertex_count = armature.slots[slot]
                .displays
                .iter()
                .filter_map(|d| d.geometry)
                .find(|g| g.offset == geometry_offset)
                .map_or(0, |g| g.vertex_count);
            out.resize(vertex_count, 0.0);
        }
        TimelineKind::IkConstraint { constraint } => {
            let data = &armature.ik_constraints[constraint];
            out.push(data.weight);
            out.push(if data.bend_positive { 1.0 } else { 0.0 });
        }
        TimelineKind::BoneAlpha { .. } | TimelineKind::SlotAlpha { .. } => out.push(1.0),
        _ => {}
    }
}
