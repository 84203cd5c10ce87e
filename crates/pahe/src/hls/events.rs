use std::fmt;
use std::sync::Arc;

use url::Url;

/// Phase of one episode job. `Done` and `Failed` are absorbing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeState {
    ResolvingVariant,
    ParsingPlaylist,
    Downloading,
    Assembling,
    Done,
    Failed(String),
}

impl EpisodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpisodeState::Done | EpisodeState::Failed(_))
    }

    fn rank(&self) -> u8 {
        match self {
            EpisodeState::ResolvingVariant => 0,
            EpisodeState::ParsingPlaylist => 1,
            EpisodeState::Downloading => 2,
            EpisodeState::Assembling => 3,
            EpisodeState::Done | EpisodeState::Failed(_) => 4,
        }
    }

    /// Whether the machine may move from `self` to `next`. Phases only move
    /// forward and `Failed` is reachable from every non-terminal phase.
    pub fn can_transition_to(&self, next: &EpisodeState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            EpisodeState::Failed(_) => true,
            // Link-only jobs finish right after parsing.
            EpisodeState::Done => matches!(
                self,
                EpisodeState::ParsingPlaylist | EpisodeState::Assembling
            ),
            other => other.rank() == self.rank() + 1,
        }
    }
}

impl fmt::Display for EpisodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpisodeState::ResolvingVariant => write!(f, "resolving variant"),
            EpisodeState::ParsingPlaylist => write!(f, "parsing playlist"),
            EpisodeState::Downloading => write!(f, "downloading"),
            EpisodeState::Assembling => write!(f, "assembling"),
            EpisodeState::Done => write!(f, "done"),
            EpisodeState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Progress notifications emitted while an episode is processed.
#[derive(Debug, Clone)]
pub enum EpisodeEvent {
    StateChanged {
        token: String,
        state: EpisodeState,
    },
    VariantSelected {
        resolution: Option<u64>,
        audio_language: Option<String>,
        media_playlist_url: Url,
    },
    SegmentsDiscovered {
        total: usize,
    },
    SegmentCompleted {
        index: usize,
        bytes: u64,
    },
    SegmentRetrying {
        index: usize,
        attempt: u32,
        reason: String,
    },
    SegmentFailed {
        index: usize,
        reason: String,
    },
}

pub type OnEpisodeEvent = Arc<dyn Fn(EpisodeEvent) + Send + Sync>;
