use std::time::Duration;

use candlewish_core::{PresentationState, PresentationView, Renderer};

const CAPTIONS: [&str; 10] = [
    "Another year older, wiser, and even more amazing.",
    "Your smile is my favorite view in every season.",
    "May your dreams be as bright as your beautiful heart.",
    "Small moments with you are my biggest treasures.",
    "You deserve all the love the world can hold.",
    "Here's to laughter, love, and endless adventures together.",
    "You light up my world more than any candle ever could.",
    "Every day with you is a gift I'm grateful for.",
    "Keep shining, keep smiling today and always.",
    "Happy Birthday, my love this story is our favorite chapter.",
];

const PROMPT: &str = "Close your eyes, make a wish, and blow!";
const FINAL_TITLE: &str = "Happy Birthday, My Love";
const FINAL_MESSAGE: &str = "You light up my life brighter than any flame. May your day be filled \
                             with magic, laughter, and all the love your heart can hold.";

/// Prints each screen of the show to stdout.
#[derive(Debug, Default)]
pub struct TerminalRenderer;

impl TerminalRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, at: Duration, view: &PresentationView) {
        tracing::debug!(at_ms = at.as_millis() as u64, ?view, "render");
        println!("{}", screen_text(view));
    }
}

/// Text shown for a view.
pub fn screen_text(view: &PresentationView) -> String {
    match view.state {
        PresentationState::Idle => match &view.notice {
            Some(notice) => format!("🕯  {notice}"),
            None => format!("🕯  {PROMPT}"),
        },
        PresentationState::Slideshow { index } => {
            let caption = CAPTIONS.get(index).copied().unwrap_or("");
            format!("[{:>2}] {caption}", index + 1)
        }
        PresentationState::Final => format!("🎂 {FINAL_TITLE}\n   {FINAL_MESSAGE}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(state: PresentationState) -> PresentationView {
        PresentationView {
            state,
            notice: None,
        }
    }

    #[test]
    fn slides_show_their_caption() {
        let text = screen_text(&view(PresentationState::Slideshow { index: 0 }));
        assert!(text.starts_with("[ 1]"));
        assert!(text.contains("Another year older"));

        let text = screen_text(&view(PresentationState::Slideshow { index: 14 }));
        assert_eq!(text, "[15] ");
    }

    #[test]
    fn idle_prefers_the_notice() {
        assert!(screen_text(&view(PresentationState::Idle)).contains(PROMPT));

        let blocked = PresentationView {
            state: PresentationState::Idle,
            notice: Some("Microphone blocked".into()),
        };
        assert!(screen_text(&blocked).contains("Microphone blocked"));
        assert!(!screen_text(&blocked).contains(PROMPT));
    }

    #[test]
    fn final_screen_has_the_message() {
        assert!(screen_text(&view(PresentationState::Final)).contains(FINAL_TITLE));
    }
}
