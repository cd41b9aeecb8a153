use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PresentationState;

/// Read-only snapshot handed to renderers after every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationView {
    #[serde(flatten)]
    pub state: PresentationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

/// Presentation backend. Renderers observe the show but never feed back
/// into it, and must not block.
pub trait Renderer {
    /// `at` is the show time of the change.
    fn render(&mut self, at: Duration, view: &PresentationView);
}

/// Renderer that remembers every view it was given.
#[derive(Debug, Default, Clone)]
pub struct ViewLog {
    pub views: Vec<(Duration, PresentationView)>,
}

impl ViewLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> Vec<PresentationState> {
        self.views.iter().map(|(_, view)| view.state).collect()
    }
}

impl Renderer for ViewLog {
    fn render(&mut self, at: Duration, view: &PresentationView) {
        self.views.push((at, view.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_serialises_flat() {
        let view = PresentationView {
            state: PresentationState::Slideshow { index: 2 },
            notice: None,
        };
        let json = serde_json::to_string(&view).unwrap();
        assert_eq!(json, r#"{"state":"slideshow","index":2}"#);

        let idle = PresentationView {
            state: PresentationState::Idle,
            notice: Some("Microphone blocked".into()),
        };
        let json = serde_json::to_value(&idle).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["notice"], "Microphone blocked");
    }

    #[test]
    fn log_records_in_order() {
        let mut log = ViewLog::new();
        for state in [PresentationState::Idle, PresentationState::Final] {
            log.render(
                Duration::ZERO,
                &PresentationView {
                    state,
                    notice: None,
                },
            );
        }
        assert_eq!(
            log.states(),
            vec![PresentationState::Idle, PresentationState::Final]
        );
    }
}
