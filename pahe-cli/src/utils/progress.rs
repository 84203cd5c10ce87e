use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pahe_engine::hls::{EpisodeEvent, EpisodeState, OnEpisodeEvent};
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc, time::Duration};

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn segments_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} {msg}\n[{elapsed_precise}] [{bar:40.green/white}] {pos}/{len} segments (eta {eta})",
    )
    .map(|style| style.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// One progress bar per episode, fed by the engine's episode events.
#[derive(Clone)]
pub struct ProgressManager {
    multi: MultiProgress,
    bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
    disabled: bool,
}

impl ProgressManager {
    pub fn new(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: false,
        }
    }

    pub fn new_disabled(multi: MultiProgress) -> Self {
        Self {
            multi,
            bars: Arc::new(Mutex::new(HashMap::new())),
            disabled: true,
        }
    }

    /// Event callback for the episode shown as `label`, or `None` when bars are off.
    pub fn episode_callback(&self, label: &str) -> Option<OnEpisodeEvent> {
        if self.disabled {
            return None;
        }
        let manager = self.clone();
        let label = label.to_string();
        Some(Arc::new(move |event: EpisodeEvent| {
            manager.handle_event(&label, event)
        }))
    }

    pub fn handle_event(&self, label: &str, event: EpisodeEvent) {
        if self.disabled {
            return;
        }

        let mut bars = self.bars.lock();
        match event {
            EpisodeEvent::StateChanged { state, .. } => match state {
                EpisodeState::ResolvingVariant => {
                    let bar = self.multi.add(ProgressBar::new_spinner());
                    bar.set_style(spinner_style());
                    bar.set_message(format!("{label}: resolving variant"));
                    bar.enable_steady_tick(Duration::from_millis(200));
                    bars.insert(label.to_string(), bar);
                }
                EpisodeState::Done => {
                    if let Some(bar) = bars.remove(label) {
                        bar.finish_with_message(format!("{label}: done"));
                    }
                }
                EpisodeState::Failed(reason) => {
                    if let Some(bar) = bars.remove(label) {
                        bar.abandon_with_message(format!("{label}: failed ({reason})"));
                    }
                }
                other => {
                    if let Some(bar) = bars.get(label) {
                        bar.set_message(format!("{label}: {other}"));
                    }
                }
            },
            EpisodeEvent::VariantSelected { resolution, .. } => {
                if let (Some(bar), Some(height)) = (bars.get(label), resolution) {
                    bar.set_message(format!("{label} ({height}p)"));
                }
            }
            EpisodeEvent::SegmentsDiscovered { total } => {
                if let Some(bar) = bars.get(label) {
                    bar.set_style(segments_style());
                    bar.set_length(total as u64);
                    bar.set_position(0);
                }
            }
            EpisodeEvent::SegmentCompleted { .. } => {
                if let Some(bar) = bars.get(label) {
                    bar.inc(1);
                }
            }
            EpisodeEvent::SegmentRetrying { index, attempt, .. } => {
                if let Some(bar) = bars.get(label) {
                    bar.set_message(format!("{label}: retrying segment {index} (attempt {attempt})"));
                }
            }
            EpisodeEvent::SegmentFailed { index, .. } => {
                if let Some(bar) = bars.get(label) {
                    bar.set_message(format!("{label}: segment {index} failed"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;

    fn hidden_manager() -> ProgressManager {
        ProgressManager::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    fn state(state: EpisodeState) -> EpisodeEvent {
        EpisodeEvent::StateChanged {
            token: "tok".to_string(),
            state,
        }
    }

    #[test]
    fn test_bar_follows_episode() {
        let manager = hidden_manager();
        let callback = manager.episode_callback("Show - 01").unwrap();

        callback(state(EpisodeState::ResolvingVariant));
        callback(EpisodeEvent::SegmentsDiscovered { total: 4 });
        callback(EpisodeEvent::SegmentCompleted { index: 0, bytes: 10 });
        callback(EpisodeEvent::SegmentCompleted { index: 1, bytes: 10 });
        {
            let bars = manager.bars.lock();
            let bar = bars.get("Show - 01").unwrap();
            assert_eq!(bar.length(), Some(4));
            assert_eq!(bar.position(), 2);
        }

        callback(state(EpisodeState::Done));
        assert!(manager.bars.lock().is_empty());
    }

    #[test]
    fn test_failed_episode_removes_bar() {
        let manager = hidden_manager();
        manager.handle_event("ep", state(EpisodeState::ResolvingVariant));
        manager.handle_event("ep", state(EpisodeState::Failed("boom".to_string())));
        assert!(manager.bars.lock().is_empty());
    }

    #[test]
    fn test_disabled_manager_has_no_callback() {
        let manager = ProgressManager::new_disabled(MultiProgress::new());
        assert!(manager.episode_callback("ep").is_none());
        manager.handle_event("ep", state(EpisodeState::ResolvingVariant));
        assert!(manager.bars.lock().is_empty());
    }
}
