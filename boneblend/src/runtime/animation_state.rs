use super::armature::Armature;
use super::controller::AnimationStateHandle;
use super::events::{AnimationEvent, AnimationEventKind};
use super::timeline::{
    ActionOutcome, NestedEffect, PlayState, Playhead, TIME_EPSILON, TimelineContext, TimelineKind,
    TimelineState,
};
use crate::pool::{Handle, Pool, Recycle};
use crate::{
    AnimationBlendType, AnimationConfig, AnimationData, ArmatureData, TimelineData, TimelineType,
    Transform,
};
use std::collections::HashMap;
use std::sync::Arc;

pub type StateId = Handle<AnimationState>;
pub type TimelineId = Handle<TimelineState>;

/// Smallest fade progress a fading-out state keeps, so rescaling never divides by zero.
const FADE_EPSILON: f32 = 1e-6;

/// Duration used to push nested children out together with their parent.
const NESTED_FADE_OUT_TIME: f32 = 999_999.0;

/// User-controlled playhead switch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum PlayheadState {
    #[default]
    Stopped,
    Playing,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum FadePhase {
    #[default]
    FadingIn,
    Complete,
    /// Terminal for a state instance.
    FadingOut,
}

/// One-shot sub-machine of each fade transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum FadeSubPhase {
    /// The fade start event is still pending.
    #[default]
    Starting,
    InProgress,
    /// Reached the end of the fade; consumed by the next tick.
    Done,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Default)]
enum TimelineDirty {
    Clean,
    BonesAndSlots,
    #[default]
    Full,
}

/// Borrowed collaborators of one state tick.
pub(crate) struct StateContext<'a> {
    pub armature: &'a mut Armature,
    pub timelines: &'a mut Pool<TimelineState>,
    /// `weight_result` of the parent state, `1.0` for roots.
    pub parent_weight: f32,
    /// Blend-space positions of nested children.
    pub child_positions: &'a [(StateId, f32)],
}

/// Writes a tick wants applied to other states, in order.
#[derive(Debug, Default)]
pub(crate) struct TickOutcome {
    pub nested: Vec<NestedEffect>,
    pub child_weights: Vec<(StateId, f32)>,
    pub activated: Option<StateId>,
    pub fade_out_children: Vec<StateId>,
}

/// One playing (or fading-out) clip instance.
#[derive(Debug)]
pub struct AnimationState {
    animation_data: Option<Arc<AnimationData>>,
    /// Timeline targets index into this armature's bones, slots and constraints.
    armature_data: Option<Arc<ArmatureData>>,
    name: String,
    group: String,
    layer: i32,
    blend_type: AnimationBlendType,
    additive: bool,
    display_control: bool,
    reset_to_pose: bool,
    action_enabled: bool,
    bone_mask: Vec<String>,

    time_scale: f32,
    play_times: u32,
    position: f32,
    duration: f32,
    auto_fade_out_time: f32,
    fade_total_time: f32,

    weight: f32,
    weight_result: f32,
    fade_time: f32,
    fade_progress: f32,
    time: f32,
    parameter_x: f32,
    parameter_y: f32,
    position_x: f32,
    position_y: f32,

    playhead: PlayheadState,
    /// Fades hold the playhead while set.
    fade_paused: bool,
    fade_phase: FadePhase,
    fade_sub_phase: FadeSubPhase,
    timeline_dirty: TimelineDirty,

    action: TimelineState,
    z_order: Option<TimelineState>,
    bone_timelines: Vec<TimelineId>,
    bone_blend_timelines: Vec<TimelineId>,
    slot_timelines: Vec<TimelineId>,
    slot_blend_timelines: Vec<TimelineId>,
    constraint_timelines: Vec<TimelineId>,
    animation_timelines: Vec<TimelineId>,
    pose_timelines: Vec<TimelineId>,

    pub(crate) parent: Option<StateId>,
    /// Time is set by the parent's progress timeline instead of the playhead.
    pub(crate) progress_driven: bool,
    active_child_a: Option<StateId>,
    active_child_b: Option<StateId>,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self {
            animation_data: None,
            armature_data: None,
            name: String::new(),
            group: String::new(),
            layer: 0,
            blend_type: AnimationBlendType::None,
            additive: false,
            display_control: true,
            reset_to_pose: true,
            action_enabled: true,
            bone_mask: Vec::new(),
            time_scale: 1.0,
            play_times: 1,
            position: 0.0,
            duration: 0.0,
            auto_fade_out_time: -1.0,
            fade_total_time: 0.0,
            weight: 1.0,
            weight_result: 0.0,
            fade_time: 0.0,
            fade_progress: 0.0,
            time: 0.0,
            parameter_x: 0.0,
            parameter_y: 0.0,
            position_x: 0.0,
            position_y: 0.0,
            playhead: PlayheadState::Stopped,
            fade_paused: false,
            fade_phase: FadePhase::FadingIn,
            fade_sub_phase: FadeSubPhase::Starting,
            timeline_dirty: TimelineDirty::Full,
            action: TimelineState::default(),
            z_order: None,
            bone_timelines: Vec::new(),
            bone_blend_timelines: Vec::new(),
            slot_timelines: Vec::new(),
            slot_blend_timelines: Vec::new(),
            constraint_timelines: Vec::new(),
            animation_timelines: Vec::new(),
            pose_timelines: Vec::new(),
            parent: None,
            progress_driven: false,
            active_child_a: None,
            active_child_b: None,
        }
    }
}

impl Recycle for AnimationState {
    fn clear(&mut self) {
        debug_assert!(
            self.owned_timeline_count() == 0,
            "animation state recycled while still owning timelines"
        );
        *self = Self::default();
    }
}

impl AnimationState {
    /// Binds the state to a clip and copies the configuration snapshot.
    ///
    /// Does nothing when the state is already bound.
    pub(crate) fn init(
        &mut self,
        armature: &Armature,
        data: Arc<AnimationData>,
        config: &AnimationConfig,
    ) {
        if self.animation_data.is_some() {
            log::debug!("animation state {} is already initialised", self.name);
            return;
        }

        self.reset_to_pose = config.reset_to_pose;
        self.additive = config.additive;
        self.display_control = config.display_control;
        self.action_enabled = config.action_enabled;
        self.blend_type = data.blend_type;
        self.layer = config.layer;
        self.play_times = u32::try_from(config.play_times).unwrap_or(data.play_times);
        self.time_scale = config.time_scale;
        self.fade_total_time = config.fade_in_time;
        self.auto_fade_out_time = config.auto_fade_out_time;
        self.name = config.state_name().to_string();
        self.group = config.group.clone();
        self.weight = config.weight.clamp(0.0, 1.0);

        self.playhead = PlayheadState::Playing;
        self.fade_paused = config.pause_fade_in;

        if config.duration < 0.0 {
            self.position = 0.0;
            self.duration = data.duration;
            self.time = if config.position == 0.0 {
                0.0
            } else if self.time_scale >= 0.0 {
                config.position
            } else {
                config.position - self.duration
            };
        } else {
            self.position = config.position;
            self.duration = config.duration;
            self.time = 0.0;
        }

        // Reverse playback starts at the end of the clip.
        if self.time_scale < 0.0 && self.time == 0.0 {
            self.time = -TIME_EPSILON;
        }

        if self.fade_total_time <= 0.0 {
            self.fade_progress = 1.0 - FADE_EPSILON;
        }

        self.bone_mask = config.bone_mask.clone();

        self.action.init(TimelineKind::Action, None);
        self.action.current_time = if self.time < 0.0 {
            self.duration - self.time
        } else {
            self.time
        };

        self.z_order = data.z_order_timeline.clone().map(|timeline| {
            let mut state = TimelineState::default();
            state.init(TimelineKind::ZOrder, Some(timeline));
            state
        });

        self.timeline_dirty = TimelineDirty::Full;
        log::debug!(
            "init animation state {} (clip {}, layer {}, play times {}, fade in {}s)",
            self.name,
            data.name,
            self.layer,
            self.play_times,
            self.fade_total_time
        );
        self.animation_data = Some(data);
        self.armature_data = Some(armature.data.clone());
    }

    pub fn is_bound(&self) -> bool {
        self.animation_data.is_some()
    }

    /// Advances fades, the playhead and every owned timeline by `passed_time` seconds.
    ///
    /// `cache_frame_rate > 0` enables the pose frame cache for this tick.
    pub(crate) fn advance_time(
        &mut self,
        id: StateId,
        passed_time: f32,
        cache_frame_rate: f32,
        ctx: &mut StateContext<'_>,
    ) -> TickOutcome {
        assert!(
            self.is_bound(),
            "advance_time called on an uninitialised animation state"
        );
        assert!(
            self.armature_data
                .as_ref()
                .is_some_and(|data| Arc::ptr_eq(data, &ctx.armature.data)),
            "animation state {} advanced on a different armature than it was created for",
            self.name
        );
        let mut outcome = TickOutcome::default();

        if self.fade_phase != FadePhase::Complete || self.fade_sub_phase != FadeSubPhase::InProgress
        {
            self.advance_fade_time(id, passed_time, ctx.armature);
        }

        if self.is_playhead_running() && !self.progress_driven {
            self.time += passed_time * self.time_scale;
        }

        if self.timeline_dirty != TimelineDirty::Clean {
            if self.timeline_dirty == TimelineDirty::Full {
                self.build_constraint_timelines(ctx.armature, ctx.timelines);
            }
            self.timeline_dirty = TimelineDirty::Clean;
            self.update_bone_and_slot_timelines(ctx.armature, ctx.timelines);
        }

        let is_blend_dirty =
            self.fade_phase != FadePhase::Complete || self.fade_sub_phase == FadeSubPhase::InProgress;
        let is_cache_enabled = self.fade_phase == FadePhase::Complete && cache_frame_rate > 0.0;
        self.weight_result = self.weight * self.fade_progress * ctx.parent_weight;

        if self.action.play_state.needs_update() {
            let playhead = self.playhead();
            let action = self.action.update_action(self.time, &playhead);
            self.emit_action_events(id, action, ctx.armature);
        }

        // A zero-weight state still advances its playhead but contributes nothing.
        if self.weight != 0.0 {
            self.update_timelines(
                cache_frame_rate,
                is_cache_enabled,
                is_blend_dirty,
                ctx,
                &mut outcome,
            );
        }

        if self.fade_phase == FadePhase::Complete {
            if self.fade_sub_phase == FadeSubPhase::Done {
                self.fade_sub_phase = FadeSubPhase::InProgress;
                self.remove_pose_timelines(ctx.timelines);
            }

            if self.action.play_state == PlayState::Complete && self.auto_fade_out_time >= 0.0 {
                outcome.fade_out_children =
                    self.fade_out(self.auto_fade_out_time, true, ctx.timelines);
            }
        }

        outcome
    }

    fn advance_fade_time(&mut self, id: StateId, passed_time: f32, armature: &mut Armature) {
        let is_fade_out = self.fade_phase == FadePhase::FadingOut;

        if self.fade_sub_phase == FadeSubPhase::Starting {
            self.fade_sub_phase = FadeSubPhase::InProgress;
            let kind = if is_fade_out {
                AnimationEventKind::FadeOut
            } else {
                AnimationEventKind::FadeIn
            };
            self.queue_event(id, kind, armature);
        }

        self.fade_time += passed_time.abs();
        if self.fade_time >= self.fade_total_time {
            self.fade_sub_phase = FadeSubPhase::Done;
            self.fade_progress = if is_fade_out { 0.0 } else { 1.0 };
        } else if self.fade_time > 0.0 {
            let progress = self.fade_time / self.fade_total_time;
            self.fade_progress = if is_fade_out { 1.0 - progress } else { progress };
        } else {
            self.fade_progress = if is_fade_out { 1.0 } else { 0.0 };
        }

        if self.fade_sub_phase == FadeSubPhase::Done {
            if !is_fade_out {
                self.fade_paused = false;
                self.fade_phase = FadePhase::Complete;
            }
            let kind = if is_fade_out {
                AnimationEventKind::FadeOutComplete
            } else {
                AnimationEventKind::FadeInComplete
            };
            self.queue_event(id, kind, armature);
        }
    }

    fn update_timelines(
        &mut self,
        cache_frame_rate: f32,
        is_cache_enabled: bool,
        is_blend_dirty: bool,
        ctx: &mut StateContext<'_>,
        outcome: &mut TickOutcome,
    ) {
        let mut is_update_timeline = true;
        let mut is_update_bone_timeline = true;
        let mut store_frame = None;

        if is_cache_enabled {
            let interval = cache_frame_rate * 2.0;
            self.action.current_time = (self.action.current_time * interval).floor() / interval;
        }
        let cursor = self.action.cursor();

        let mut tctx = TimelineContext {
            armature: &mut *ctx.armature,
            weight_result: self.weight_result,
            fade_progress: self.fade_progress,
            fading: self.fade_phase != FadePhase::Complete
                || self.fade_sub_phase != FadeSubPhase::InProgress,
        };

        if let Some(z_order) = self.z_order.as_mut() {
            if z_order.play_state.needs_update() {
                z_order.update(cursor, &mut tctx);
            }
        }

        if is_cache_enabled {
            let frame = (self.action.current_time * cache_frame_rate).floor().max(0.0) as usize;
            let armature = &mut *tctx.armature;
            if let Some(data) = &self.animation_data {
                armature.bind_frame_cache(&data.name);
            }
            if armature.cache_frame_index == Some(frame) {
                log::trace!("{}: cache frame {frame} unchanged", self.name);
                is_update_timeline = false;
                is_update_bone_timeline = false;
            } else {
                armature.cache_frame_index = Some(frame);
                if armature.restore_cached_pose(frame) {
                    log::trace!("{}: cache frame {frame} restored", self.name);
                    is_update_bone_timeline = false;
                } else {
                    store_frame = Some(frame);
                }
            }
        }

        if !is_update_timeline {
            return;
        }

        if is_update_bone_timeline {
            let mut prev_key = None;
            let mut is_blend = false;
            for &id in &self.bone_timelines {
                let Some(timeline) = ctx.timelines.get_mut(id) else {
                    continue;
                };
                if timeline.play_state.needs_update() {
                    timeline.update(cursor, &mut tctx);
                }

                let key = timeline.kind.blend_key();
                if key != prev_key {
                    prev_key = key;
                    is_blend = false;
                    if let Some(key) = key {
                        let blend_state = tctx.armature.blend_state_mut(key);
                        is_blend = blend_state.update(self.layer, self.weight_result);
                        if blend_state.dirty == 1 {
                            if let Some(bone) = timeline.kind.bone() {
                                tctx.armature.bones[bone].animation_pose = Transform::IDENTITY;
                            }
                        }
                    }
                }

                if is_blend {
                    timeline.blend(tctx.armature, is_blend_dirty);
                }
            }
        }

        for &id in &self.bone_blend_timelines {
            let Some(timeline) = ctx.timelines.get_mut(id) else {
                continue;
            };
            if timeline.play_state.needs_update() {
                timeline.update(cursor, &mut tctx);
            }
            if let Some(key) = timeline.kind.blend_key() {
                if tctx
                    .armature
                    .blend_state_mut(key)
                    .update(self.layer, self.weight_result)
                {
                    timeline.blend(tctx.armature, is_blend_dirty);
                }
            }
        }

        if self.display_control {
            for &id in &self.slot_timelines {
                let Some(timeline) = ctx.timelines.get_mut(id) else {
                    continue;
                };
                if !timeline.play_state.needs_update() {
                    continue;
                }
                let Some(slot) = timeline.kind.slot() else {
                    continue;
                };
                let admitted = match tctx.armature.slots[slot].display_controller.as_deref() {
                    None => true,
                    Some(controller) => controller == self.name || controller == self.group,
                };
                if admitted {
                    timeline.update(cursor, &mut tctx);
                }
            }
        }

        for &id in &self.slot_blend_timelines {
            let Some(timeline) = ctx.timelines.get_mut(id) else {
                continue;
            };
            if !timeline.play_state.needs_update() {
                continue;
            }
            timeline.update(cursor, &mut tctx);
            if let Some(key) = timeline.kind.blend_key() {
                if tctx
                    .armature
                    .blend_state_mut(key)
                    .update(self.layer, self.weight_result)
                {
                    timeline.blend(tctx.armature, is_blend_dirty);
                }
            }
        }

        for &id in &self.constraint_timelines {
            if let Some(timeline) = ctx.timelines.get_mut(id) {
                if timeline.play_state.needs_update() {
                    timeline.update(cursor, &mut tctx);
                }
            }
        }

        if !self.animation_timelines.is_empty() {
            let mut d_left = 100.0_f32;
            let mut d_right = 100.0_f32;
            let mut left = None;
            let mut right = None;

            for &id in &self.animation_timelines {
                let Some(timeline) = ctx.timelines.get_mut(id) else {
                    continue;
                };
                if timeline.play_state.needs_update() {
                    if let Some(effect) = timeline.update(cursor, &mut tctx) {
                        outcome.nested.push(effect);
                    }
                }

                if self.blend_type != AnimationBlendType::E1D {
                    continue;
                }
                let Some(child) = timeline.kind.child_state() else {
                    continue;
                };
                let Some(&(_, position_x)) = ctx.child_positions.iter().find(|(c, _)| *c == child)
                else {
                    continue;
                };
                let d = self.parameter_x - position_x;
                if d >= 0.0 {
                    if d < d_left {
                        d_left = d;
                        left = Some(child);
                    }
                } else if -d < d_right {
                    d_right = -d;
                    right = Some(child);
                }
            }

            if let Some(left) = left {
                if self.active_child_a != Some(left) {
                    if let Some(prev) = self.active_child_a {
                        outcome.child_weights.push((prev, 0.0));
                    }
                    self.active_child_a = Some(left);
                    outcome.activated = Some(left);
                }
                if self.active_child_b != right {
                    if let Some(prev) = self.active_child_b {
                        outcome.child_weights.push((prev, 0.0));
                    }
                    self.active_child_b = right;
                }

                let left_weight = d_right / (d_left + d_right);
                outcome.child_weights.push((left, left_weight));
                if let Some(right) = right {
                    outcome.child_weights.push((right, 1.0 - left_weight));
                }
            }
        }

        if let Some(frame) = store_frame {
            tctx.armature.store_cached_pose(frame);
        }
    }

    fn emit_action_events(&self, id: StateId, outcome: ActionOutcome, armature: &mut Armature) {
        if outcome.started {
            if self.display_control && self.reset_to_pose {
                armature.sort_z_order(None);
            }
            self.queue_event(id, AnimationEventKind::Start, armature);
        }
        if outcome.loop_completed {
            self.queue_event(id, AnimationEventKind::LoopComplete, armature);
            if outcome.completed {
                self.queue_event(id, AnimationEventKind::Complete, armature);
            }
        }
    }

    fn queue_event(&self, id: StateId, kind: AnimationEventKind, armature: &mut Armature) {
        if self.parent.is_some() || !self.action_enabled || !armature.has_listener(kind) {
            return;
        }
        let event = AnimationEvent {
            kind,
            armature: armature.name().to_string(),
            state: AnimationStateHandle::new(id),
            state_name: self.name.clone(),
        };
        armature.queue_event(event);
    }

    fn borrow_timeline(
        timelines: &mut Pool<TimelineState>,
        kind: TimelineKind,
        data: Option<Arc<TimelineData>>,
    ) -> TimelineId {
        let id = timelines.borrow();
        if let Some(timeline) = timelines.get_mut(id) {
            timeline.init(kind, data);
        }
        id
    }

    fn release_timeline(&mut self, id: TimelineId, timelines: &mut Pool<TimelineState>) {
        self.pose_timelines.retain(|t| *t != id);
        timelines.release(id);
    }

    fn build_constraint_timelines(
        &mut self,
        armature: &Armature,
        timelines: &mut Pool<TimelineState>,
    ) {
        let Some(data) = self.animation_data.clone() else {
            return;
        };

        for id in std::mem::take(&mut self.constraint_timelines) {
            self.release_timeline(id, timelines);
        }

        for (index, constraint) in armature.data.ik_constraints.iter().enumerate() {
            let kind = TimelineKind::IkConstraint { constraint: index };
            match data.constraint_timelines(&constraint.name) {
                Some(datas) => {
                    for timeline in datas {
                        if timeline.kind != TimelineType::IkConstraint {
                            log::warn!(
                                "ignoring {:?} timeline on constraint {}",
                                timeline.kind,
                                constraint.name
                            );
                            continue;
                        }
                        let id = Self::borrow_timeline(timelines, kind, Some(timeline.clone()));
                        self.constraint_timelines.push(id);
                    }
                }
                None if self.reset_to_pose => {
                    let id = Self::borrow_timeline(timelines, kind, None);
                    self.constraint_timelines.push(id);
                    self.pose_timelines.push(id);
                }
                None => {}
            }
        }
    }

    /// Reconciles bone and slot timelines with the armature and the bone mask.
    ///
    /// Timelines whose target stays covered keep their identity and cursor.
    fn update_bone_and_slot_timelines(
        &mut self,
        armature: &Armature,
        timelines: &mut Pool<TimelineState>,
    ) {
        let Some(data) = self.animation_data.clone() else {
            return;
        };
        let mut created = 0_usize;
        let mut released = 0_usize;

        let mut bone_timelines: HashMap<usize, Vec<TimelineId>> = HashMap::new();
        for &id in self.bone_timelines.iter().chain(&self.bone_blend_timelines) {
            if let Some(bone) = timelines.get(id).and_then(|t| t.kind.bone()) {
                bone_timelines.entry(bone).or_default().push(id);
            }
        }

        for (index, bone) in armature.data.bones.iter().enumerate() {
            if !self.contains_bone_mask(&bone.name) {
                continue;
            }
            if bone_timelines.remove(&index).is_some() {
                continue;
            }

            if let Some(datas) = data.bone_timelines(&bone.name) {
                for timeline in datas {
                    let (kind, blend) = match timeline.kind {
                        TimelineType::BoneAll => (TimelineKind::BoneAll { bone: index }, false),
                        TimelineType::BoneTranslate => {
                            (TimelineKind::BoneTranslate { bone: index }, false)
                        }
                        TimelineType::BoneRotate => (TimelineKind::BoneRotate { bone: index }, false),
                        TimelineType::BoneScale => (TimelineKind::BoneScale { bone: index }, false),
                        TimelineType::BoneAlpha => (TimelineKind::BoneAlpha { bone: index }, true),
                        TimelineType::Surface => (TimelineKind::Surface { bone: index }, true),
                        other => {
                            log::warn!("ignoring {other:?} timeline on bone {}", bone.name);
                            continue;
                        }
                    };
                    let id = Self::borrow_timeline(timelines, kind, Some(timeline.clone()));
                    if blend {
                        self.bone_blend_timelines.push(id);
                    } else {
                        self.bone_timelines.push(id);
                    }
                    created += 1;
                }
            } else if self.reset_to_pose {
                let id = if bone.is_bone() {
                    let id =
                        Self::borrow_timeline(timelines, TimelineKind::BoneAll { bone: index }, None);
                    self.bone_timelines.push(id);
                    id
                } else {
                    let id =
                        Self::borrow_timeline(timelines, TimelineKind::Surface { bone: index }, None);
                    self.bone_blend_timelines.push(id);
                    id
                };
                self.pose_timelines.push(id);
                created += 1;
            }
        }

        for id in bone_timelines.into_values().flatten() {
            self.bone_timelines.retain(|t| *t != id);
            self.bone_blend_timelines.retain(|t| *t != id);
            self.release_timeline(id, timelines);
            released += 1;
        }

        let mut slot_timelines: HashMap<usize, Vec<TimelineId>> = HashMap::new();
        for &id in self.slot_timelines.iter().chain(&self.slot_blend_timelines) {
            if let Some(slot) = timelines.get(id).and_then(|t| t.kind.slot()) {
                slot_timelines.entry(slot).or_default().push(id);
            }
        }

        for (index, slot) in armature.data.slots.iter().enumerate() {
            let bone_name = &armature.data.bones[slot.bone].name;
            if !self.contains_bone_mask(bone_name) {
                continue;
            }
            if slot_timelines.remove(&index).is_some() {
                continue;
            }

            let mut has_display = false;
            let mut has_color = false;
            let mut deformed = Vec::new();

            for timeline in data.slot_timelines(&slot.name).unwrap_or_default() {
                let timeline_data = Some(timeline.clone());
                match timeline.kind {
                    TimelineType::SlotDisplay => {
                        let kind = TimelineKind::SlotDisplay { slot: index };
                        self.slot_timelines
                            .push(Self::borrow_timeline(timelines, kind, timeline_data));
                        has_display = true;
                    }
                    TimelineType::SlotColor => {
                        let kind = TimelineKind::SlotColor { slot: index };
                        self.slot_timelines
                            .push(Self::borrow_timeline(timelines, kind, timeline_data));
                        has_color = true;
                    }
                    TimelineType::SlotZIndex => {
                        let kind = TimelineKind::SlotZIndex { slot: index };
                        self.slot_blend_timelines
                            .push(Self::borrow_timeline(timelines, kind, timeline_data));
                    }
                    TimelineType::SlotDeform => {
                        let kind = TimelineKind::SlotDeform {
                            slot: index,
                            geometry_offset: timeline.geometry_offset,
                        };
                        self.slot_blend_timelines
                            .push(Self::borrow_timeline(timelines, kind, timeline_data));
                        deformed.push(timeline.geometry_offset);
                    }
                    TimelineType::SlotAlpha => {
                        let kind = TimelineKind::SlotAlpha { slot: index };
                        self.slot_blend_timelines
                            .push(Self::borrow_timeline(timelines, kind, timeline_data));
                    }
                    other => {
                        log::warn!("ignoring {other:?} timeline on slot {}", slot.name);
                        continue;
                    }
                }
                created += 1;
            }

            if self.reset_to_pose {
                if !has_display {
                    let kind = TimelineKind::SlotDisplay { slot: index };
                    let id = Self::borrow_timeline(timelines, kind, None);
                    self.slot_timelines.push(id);
                    self.pose_timelines.push(id);
                    created += 1;
                }
                if !has_color {
                    let kind = TimelineKind::SlotColor { slot: index };
                    let id = Self::borrow_timeline(timelines, kind, None);
                    self.slot_timelines.push(id);
                    self.pose_timelines.push(id);
                    created += 1;
                }
                for geometry in slot.displays.iter().filter_map(|d| d.geometry) {
                    if deformed.contains(&geometry.offset) {
                        continue;
                    }
                    deformed.push(geometry.offset);
                    let kind = TimelineKind::SlotDeform {
                        slot: index,
                        geometry_offset: geometry.offset,
                    };
                    let id = Self::borrow_timeline(timelines, kind, None);
                    self.slot_blend_timelines.push(id);
                    self.pose_timelines.push(id);
                    created += 1;
                }
            }
        }

        for id in slot_timelines.into_values().flatten() {
            self.slot_timelines.retain(|t| *t != id);
            self.slot_blend_timelines.retain(|t| *t != id);
            self.release_timeline(id, timelines);
            released += 1;
        }

        log::debug!(
            "{}: timelines reconciled ({created} created, {released} released, {} pose)",
            self.name,
            self.pose_timelines.len()
        );
    }

    fn remove_pose_timelines(&mut self, timelines: &mut Pool<TimelineState>) {
        if self.pose_timelines.is_empty() {
            return;
        }
        let count = self.pose_timelines.len();
        for id in std::mem::take(&mut self.pose_timelines) {
            let removed = [
                &mut self.bone_timelines,
                &mut self.bone_blend_timelines,
                &mut self.slot_timelines,
                &mut self.slot_blend_timelines,
                &mut self.constraint_timelines,
            ]
            .into_iter()
            .any(|list| remove_id(list, id));
            debug_assert!(
                removed,
                "pose timeline {id:?} is missing from every primary timeline set"
            );
            timelines.release(id);
        }
        log::debug!("{}: removed {count} pose timelines", self.name);
    }

    /// Returns every owned timeline to the pool and reports the nested children it drove.
    ///
    /// Calling it again releases nothing.
    pub(crate) fn release_timelines(&mut self, timelines: &mut Pool<TimelineState>) -> Vec<StateId> {
        let mut children = Vec::new();
        for id in self.animation_timelines.drain(..) {
            if let Some(child) = timelines.get(id).and_then(|t| t.kind.child_state()) {
                children.push(child);
            }
            timelines.release(id);
        }
        for list in [
            &mut self.bone_timelines,
            &mut self.bone_blend_timelines,
            &mut self.slot_timelines,
            &mut self.slot_blend_timelines,
            &mut self.constraint_timelines,
        ] {
            for id in list.drain(..) {
                timelines.release(id);
            }
        }
        self.pose_timelines.clear();
        self.action.clear();
        self.z_order = None;
        children
    }

    /// Detaches a nested child whose parent is being torn down; it is removed on the next tick.
    pub(crate) fn detach_from_parent(&mut self) {
        self.fade_phase = FadePhase::FadingOut;
        self.fade_sub_phase = FadeSubPhase::Done;
        self.parent = None;
        self.progress_driven = false;
    }

    pub(crate) fn owned_timeline_count(&self) -> usize {
        self.bone_timelines.len()
            + self.bone_blend_timelines.len()
            + self.slot_timelines.len()
            + self.slot_blend_timelines.len()
            + self.constraint_timelines.len()
            + self.animation_timelines.len()
    }

    pub(crate) fn nested_children(&self, timelines: &Pool<TimelineState>) -> Vec<StateId> {
        self.animation_timelines
            .iter()
            .filter_map(|id| timelines.get(*id).and_then(|t| t.kind.child_state()))
            .collect()
    }

    /// Resumes playback.
    pub fn play(&mut self) {
        self.playhead = PlayheadState::Playing;
        self.fade_paused = false;
    }

    /// Pauses playback; fades keep running.
    pub fn stop(&mut self) {
        self.playhead = PlayheadState::Stopped;
    }

    /// Starts (or extends) a fade-out over `fade_out_time` seconds.
    ///
    /// A fade-out already in progress is never shortened. Returns the nested children that must
    /// fade out with this state.
    pub(crate) fn fade_out(
        &mut self,
        fade_out_time: f32,
        pause_playhead: bool,
        timelines: &mut Pool<TimelineState>,
    ) -> Vec<StateId> {
        let fade_out_time = fade_out_time.max(0.0);
        let mut children = Vec::new();

        if pause_playhead {
            self.fade_paused = true;
        }

        if self.fade_phase == FadePhase::FadingOut {
            let remaining = self.fade_total_time - self.fade_time;
            if fade_out_time < remaining {
                log::debug!(
                    "{}: ignoring fade-out of {fade_out_time}s, {remaining}s already remaining",
                    self.name
                );
                return children;
            }
        } else {
            self.fade_phase = FadePhase::FadingOut;
            self.fade_sub_phase = FadeSubPhase::Starting;

            if fade_out_time <= 0.0 || self.fade_progress <= 0.0 {
                self.fade_progress = FADE_EPSILON;
            }

            for &id in self
                .bone_timelines
                .iter()
                .chain(&self.bone_blend_timelines)
                .chain(&self.slot_timelines)
                .chain(&self.slot_blend_timelines)
                .chain(&self.constraint_timelines)
            {
                if let Some(timeline) = timelines.get_mut(id) {
                    timeline.fade_out();
                }
            }
            for &id in &self.animation_timelines {
                if let Some(timeline) = timelines.get_mut(id) {
                    timeline.fade_out();
                    children.extend(timeline.kind.child_state());
                }
            }
            log::debug!(
                "{}: fade out over {fade_out_time}s from progress {}",
                self.name,
                self.fade_progress
            );
        }

        self.display_control = false;
        // Rescale so the fade continues from the current progress.
        self.fade_total_time = if self.fade_progress > FADE_EPSILON {
            fade_out_time / self.fade_progress
        } else {
            0.0
        };
        self.fade_time = self.fade_total_time * (1.0 - self.fade_progress);
        children
    }

    pub(crate) fn fade_out_nested(&mut self, timelines: &mut Pool<TimelineState>) -> Vec<StateId> {
        self.fade_out(NESTED_FADE_OUT_TIME, true, timelines)
    }

    pub fn contains_bone_mask(&self, bone_name: &str) -> bool {
        self.bone_mask.is_empty() || self.bone_mask.iter().any(|b| b == bone_name)
    }

    /// Adds `bone_name` (and with `recursive`, every bone below it) to the mask.
    pub fn add_bone_mask(&mut self, armature: &Armature, bone_name: &str, recursive: bool) {
        let Some(current) = armature.bone_index(bone_name) else {
            log::warn!("{}: unknown bone {bone_name} in bone mask", self.name);
            return;
        };

        if !self.contains_mask_entry(bone_name) {
            self.bone_mask.push(bone_name.to_string());
        }
        if recursive {
            for index in 0..armature.bones.len() {
                let name = armature.bone_name(index);
                if !self.contains_mask_entry(name) && armature.bone_contains(current, index) {
                    self.bone_mask.push(name.to_string());
                }
            }
        }
        self.mark_bone_timelines_dirty();
    }

    /// Removes `bone_name` (and with `recursive`, every bone below it) from the mask.
    ///
    /// Removing a subtree from an empty mask restricts the state to every other bone.
    pub fn remove_bone_mask(&mut self, armature: &Armature, bone_name: &str, recursive: bool) {
        self.bone_mask.retain(|b| b != bone_name);

        if recursive {
            if let Some(current) = armature.bone_index(bone_name) {
                if !self.bone_mask.is_empty() {
                    self.bone_mask.retain(|name| {
                        armature
                            .bone_index(name)
                            .is_none_or(|index| !armature.bone_contains(current, index))
                    });
                } else {
                    for index in 0..armature.bones.len() {
                        if index != current && !armature.bone_contains(current, index) {
                            self.bone_mask.push(armature.bone_name(index).to_string());
                        }
                    }
                }
            } else {
                log::warn!("{}: unknown bone {bone_name} in bone mask", self.name);
            }
        }
        self.mark_bone_timelines_dirty();
    }

    pub fn remove_all_bone_mask(&mut self) {
        self.bone_mask.clear();
        self.mark_bone_timelines_dirty();
    }

    fn contains_mask_entry(&self, bone_name: &str) -> bool {
        self.bone_mask.iter().any(|b| b == bone_name)
    }

    fn mark_bone_timelines_dirty(&mut self) {
        self.timeline_dirty = self.timeline_dirty.max(TimelineDirty::BonesAndSlots);
    }

    /// Registers nested-animation timelines driving `child`.
    ///
    /// Returns the child's blend-space position when this state is a parametric blend.
    pub(crate) fn add_nested_timelines(
        &mut self,
        child: StateId,
        datas: &[Arc<TimelineData>],
        timelines: &mut Pool<TimelineState>,
    ) -> Option<(f32, f32)> {
        let mut position = None;
        for data in datas {
            let kind = match data.kind {
                TimelineType::AnimationProgress => {
                    if self.blend_type != AnimationBlendType::None {
                        position = Some((data.x, data.y));
                    }
                    self.reset_to_pose = false;
                    TimelineKind::AnimationProgress { state: child }
                }
                TimelineType::AnimationWeight => TimelineKind::AnimationWeight { state: child },
                TimelineType::AnimationParameter => {
                    TimelineKind::AnimationParameter { state: child }
                }
                other => {
                    log::warn!("{}: ignoring {other:?} as a nested timeline", self.name);
                    continue;
                }
            };
            let id = Self::borrow_timeline(timelines, kind, Some(data.clone()));
            self.animation_timelines.push(id);
        }
        position
    }

    /// Forces slot timelines to re-evaluate on the next update.
    pub(crate) fn activate_timeline(&mut self, timelines: &mut Pool<TimelineState>) {
        for &id in &self.slot_timelines {
            if let Some(timeline) = timelines.get_mut(id) {
                timeline.invalidate();
            }
        }
    }

    pub(crate) fn set_current_time(&mut self, value: f32, timelines: &mut Pool<TimelineState>) {
        let completed = i64::from(self.action.play_state == PlayState::Complete);
        let current_play_times = i64::from(self.action.current_play_times) - completed;
        let mut value = value;

        if self.duration > 0.0 && (value < 0.0 || self.duration < value) {
            value = value % self.duration + current_play_times as f32 * self.duration;
            if value < 0.0 {
                value += self.duration;
            }
        }

        // Landing exactly on the end of the last loop would complete the state again.
        if self.play_times > 0
            && current_play_times == i64::from(self.play_times) - 1
            && value == self.duration
            && self.parent.is_none()
        {
            value = self.duration - TIME_EPSILON;
        }

        if self.time == value {
            return;
        }
        self.time = value;
        let playhead = self.playhead();
        self.action.set_action_time(self.time, &playhead);

        if let Some(z_order) = self.z_order.as_mut() {
            z_order.play_state = PlayState::NotStarted;
        }
        for &id in self.bone_timelines.iter().chain(&self.slot_timelines) {
            if let Some(timeline) = timelines.get_mut(id) {
                timeline.play_state = PlayState::NotStarted;
            }
        }
    }

    /// Sets the author weight, clamped to `[0, 1]`. NaN is ignored.
    pub(crate) fn set_weight(&mut self, value: f32, timelines: &mut Pool<TimelineState>) {
        if value.is_nan() {
            log::warn!("{}: ignoring NaN weight", self.name);
            return;
        }
        let value = value.clamp(0.0, 1.0);
        if self.weight == value {
            return;
        }
        self.weight = value;
        for &id in self
            .bone_timelines
            .iter()
            .chain(&self.bone_blend_timelines)
            .chain(&self.slot_blend_timelines)
        {
            if let Some(timeline) = timelines.get_mut(id) {
                timeline.dirty = true;
            }
        }
    }

    /// Nested children blend on their root's layer.
    pub(crate) fn set_layer(&mut self, layer: i32) {
        self.layer = layer;
    }

    pub(crate) fn set_position(&mut self, x: f32, y: f32) {
        self.position_x = x;
        self.position_y = y;
    }

    pub fn set_parameter(&mut self, x: f32, y: f32) {
        self.parameter_x = x;
        self.parameter_y = y;
    }

    pub fn set_time_scale(&mut self, time_scale: f32) {
        self.time_scale = time_scale;
    }

    pub fn set_play_times(&mut self, play_times: u32) {
        self.play_times = play_times;
    }

    pub fn set_auto_fade_out_time(&mut self, seconds: f32) {
        self.auto_fade_out_time = seconds;
    }

    fn playhead(&self) -> Playhead {
        Playhead {
            play_times: self.play_times,
            duration: self.duration,
            position: self.position,
            playing: self.is_playhead_running(),
        }
    }

    fn is_playhead_running(&self) -> bool {
        self.playhead == PlayheadState::Playing && !self.fade_paused
    }

    pub fn is_fade_in(&self) -> bool {
        self.fade_phase == FadePhase::FadingIn
    }

    pub fn is_fade_out(&self) -> bool {
        self.fade_phase == FadePhase::FadingOut
    }

    pub fn is_fade_complete(&self) -> bool {
        self.fade_phase == FadePhase::Complete
    }

    /// Fade-out finished; the driver removes the state on its next tick.
    pub fn is_finished(&self) -> bool {
        self.fade_phase == FadePhase::FadingOut && self.fade_sub_phase == FadeSubPhase::Done
    }

    pub fn is_playing(&self) -> bool {
        self.playhead == PlayheadState::Playing && self.action.play_state.needs_update()
    }

    pub fn is_completed(&self) -> bool {
        self.action.play_state == PlayState::Complete
    }

    pub fn current_play_times(&self) -> u32 {
        self.action.current_play_times
    }

    pub fn total_time(&self) -> f32 {
        self.duration
    }

    pub fn current_time(&self) -> f32 {
        self.action.current_time
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn weight_result(&self) -> f32 {
        self.weight_result
    }

    pub fn fade_progress(&self) -> f32 {
        self.fade_progress
    }

    pub fn fade_total_time(&self) -> f32 {
        self.fade_total_time
    }

    pub fn fade_phase(&self) -> FadePhase {
        self.fade_phase
    }

    pub fn fade_sub_phase(&self) -> FadeSubPhase {
        self.fade_sub_phase
    }

    pub fn playhead_state(&self) -> PlayheadState {
        self.playhead
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn layer(&self) -> i32 {
        self.layer
    }

    pub fn blend_type(&self) -> AnimationBlendType {
        self.blend_type
    }

    pub fn additive(&self) -> bool {
        self.additive
    }

    pub fn display_control(&self) -> bool {
        self.display_control
    }

    pub fn set_display_control(&mut self, value: bool) {
        self.display_control = value;
    }

    pub fn reset_to_pose(&self) -> bool {
        self.reset_to_pose
    }

    pub fn action_enabled(&self) -> bool {
        self.action_enabled
    }

    pub fn time_scale(&self) -> f32 {
        self.time_scale
    }

    pub fn play_times(&self) -> u32 {
        self.play_times
    }

    pub fn auto_fade_out_time(&self) -> f32 {
        self.auto_fade_out_time
    }

    pub fn parameter_x(&self) -> f32 {
        self.parameter_x
    }

    pub fn parameter_y(&self) -> f32 {
        self.parameter_y
    }

    pub fn position_x(&self) -> f32 {
        self.position_x
    }

    pub fn position_y(&self) -> f32 {
        self.position_y
    }

    pub fn bone_mask(&self) -> &[String] {
        &self.bone_mask
    }

    pub fn parent(&self) -> Option<AnimationStateHandle> {
        self.parent.map(AnimationStateHandle::new)
    }

    pub fn animation_data(&self) -> Option<&Arc<AnimationData>> {
        self.animation_data.as_ref()
    }

    pub fn action_timeline(&self) -> &TimelineState {
        &self.action
    }

    pub fn bone_timelines(&self) -> &[TimelineId] {
        &self.bone_timelines
    }

    pub fn bone_blend_timelines(&self) -> &[TimelineId] {
        &self.bone_blend_timelines
    }

    pub fn slot_timelines(&self) -> &[TimelineId] {
        &self.slot_timelines
    }

    pub fn slot_blend_timelines(&self) -> &[TimelineId] {
        &self.slot_blend_timelines
    }

    pub fn constraint_timelines(&self) -> &[TimelineId] {
        &self.constraint_timelines
    }

    pub fn animation_timelines(&self) -> &[TimelineId] {
        &self.animation_timelines
    }

    pub fn pose_timelines(&self) -> &[TimelineId] {
        &self.pose_timelines
    }
}

fn remove_id(list: &mut Vec<TimelineId>, id: TimelineId) -> bool {
    match list.iter().position(|t| *t == id) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}
