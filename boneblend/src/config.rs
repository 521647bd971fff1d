//! Playback configuration snapshot consumed when a state is initialised.

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

/// Which already-playing states a new fade-in pushes out.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "json", serde(rename_all = "camelCase"))]
pub enum AnimationFadeOutMode {
    None,
    SameLayer,
    SameGroup,
    SameLayerAndGroup,
    #[default]
    All,
    /// Like `All`, but reuses a root state already playing (and not fading out) the same clip.
    Single,
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "json", serde(default, rename_all = "camelCase"))]
pub struct AnimationConfig {
    /// State name; falls back to `animation` when empty.
    pub name: String,
    /// Clip name.
    pub animation: String,
    pub group: String,
    pub layer: i32,
    /// `0` loops forever; `-1` uses the clip default (one play).
    pub play_times: i32,
    pub time_scale: f32,
    pub position: f32,
    /// Negative plays the whole clip.
    pub duration: f32,
    pub weight: f32,
    pub fade_in_time: f32,
    /// Fade-out applied to the states this one replaces; negative reuses `fade_in_time`.
    pub fade_out_time: f32,
    /// `-1` disables the automatic fade-out on completion.
    pub auto_fade_out_time: f32,
    pub fade_out_mode: AnimationFadeOutMode,
    pub pause_fade_in: bool,
    pub pause_fade_out: bool,
    pub action_enabled: bool,
    pub additive: bool,
    pub display_control: bool,
    pub reset_to_pose: bool,
    pub bone_mask: Vec<String>,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            animation: String::new(),
            group: String::new(),
            layer: 0,
            play_times: -1,
            time_scale: 1.0,
            position: 0.0,
            duration: -1.0,
            weight: 1.0,
            fade_in_time: 0.0,
            fade_out_time: -1.0,
            auto_fade_out_time: -1.0,
            fade_out_mode: AnimationFadeOutMode::All,
            pause_fade_in: false,
            pause_fade_out: true,
            action_enabled: true,
            additive: false,
            display_control: true,
            reset_to_pose: true,
            bone_mask: Vec::new(),
        }
    }
}

impl AnimationConfig {
    pub fn new(animation: impl Into<String>) -> Self {
        Self {
            animation: animation.into(),
            ..Self::default()
        }
    }

    pub fn state_name(&self) -> &str {
        if self.name.is_empty() {
            &self.animation
        } else {
            &self.name
        }
    }

    #[cfg(feature = "json")]
    pub fn from_json_str(json: &str) -> Result<Self, crate::Error> {
        serde_json::from_str(json).map_err(|e| crate::Error::JsonParse {
            message: e.to_string(),
        })
    }
}
