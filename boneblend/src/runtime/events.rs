use super::armature::Armature;
use super::controller::AnimationStateHandle;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AnimationEventKind {
    Start,
    LoopComplete,
    Complete,
    FadeIn,
    FadeInComplete,
    FadeOut,
    FadeOutComplete,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnimationEvent {
    pub kind: AnimationEventKind,
    pub armature: String,
    pub state: AnimationStateHandle,
    pub state_name: String,
}

/// Receives events queued during a tick once the tick has finished.
pub trait AnimationEventListener {
    /// Cheap gate checked before an event is built.
    fn has_listener(&self, kind: AnimationEventKind) -> bool {
        let _ = kind;
        true
    }

    fn on_event(&mut self, armature: &Armature, event: &AnimationEvent);
}
