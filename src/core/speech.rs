//! Reading assistant replies aloud while they stream.

use std::sync::Arc;

use crate::core::config::AutoSpeak;

/// A text-to-speech backend. Implementations queue or play `text`; they must
/// not block the caller.
pub trait SpeechEngine: Send + Sync {
    fn speak(&self, text: String);
}

/// Feeds one assistant reply to a [`SpeechEngine`] according to the
/// configured [`AutoSpeak`] mode.
pub struct PersonaSpeaker {
    engine: Arc<dyn SpeechEngine>,
    mode: AutoSpeak,
    spoken: bool,
}

impl PersonaSpeaker {
    pub fn new(engine: Arc<dyn SpeechEngine>, mode: AutoSpeak) -> Self {
        Self {
            engine,
            mode,
            spoken: false,
        }
    }

    /// In first-line mode, speaks the first line once it is complete.
    pub fn handle_text_so_far(&mut self, text: &str) {
        if self.spoken || self.mode != AutoSpeak::FirstLine {
            return;
        }
        if let Some(line) = complete_first_line(text) {
            self.say(line);
        }
    }

    pub fn finalize_text(&mut self, text: &str) {
        if self.spoken {
            return;
        }
        match self.mode {
            AutoSpeak::Off => {}
            AutoSpeak::FirstLine => {
                if let Some(line) = text.lines().map(str::trim).find(|line| !line.is_empty()) {
                    self.say(line);
                }
            }
            AutoSpeak::All => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    self.say(trimmed);
                }
            }
        }
    }

    fn say(&mut self, text: &str) {
        self.spoken = true;
        self.engine.speak(text.to_string());
    }
}

/// The first non-empty line, if a newline already terminates it.
fn complete_first_line(text: &str) -> Option<&str> {
    let start = text.len() - text.trim_start().len();
    let rest = &text[start..];
    let end = rest.find('\n')?;
    let line = rest[..end].trim();
    (!line.is_empty()).then_some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingEngine {
        spoken: Mutex<Vec<String>>,
    }

    impl SpeechEngine for RecordingEngine {
        fn speak(&self, text: String) {
            self.spoken.lock().expect("lock").push(text);
        }
    }

    fn speaker(mode: AutoSpeak) -> (PersonaSpeaker, Arc<RecordingEngine>) {
        let engine = Arc::new(RecordingEngine::default());
        (PersonaSpeaker::new(engine.clone(), mode), engine)
    }

    #[test]
    fn first_line_mode_speaks_once_line_is_complete() {
        let (mut speaker, engine) = speaker(AutoSpeak::FirstLine);

        speaker.handle_text_so_far("Hello the");
        assert!(engine.spoken.lock().expect("lock").is_empty());

        speaker.handle_text_so_far("\nHello there.\nMore");
        speaker.handle_text_so_far("\nHello there.\nMore text");
        speaker.finalize_text("\nHello there.\nMore text.");

        assert_eq!(*engine.spoken.lock().expect("lock"), vec!["Hello there."]);
    }

    #[test]
    fn first_line_mode_falls_back_to_final_text() {
        let (mut speaker, engine) = speaker(AutoSpeak::FirstLine);

        speaker.handle_text_so_far("Short answer");
        speaker.finalize_text("Short answer");

        assert_eq!(*engine.spoken.lock().expect("lock"), vec!["Short answer"]);
    }

    #[test]
    fn all_mode_waits_for_final_text() {
        let (mut speaker, engine) = speaker(AutoSpeak::All);

        speaker.handle_text_so_far("Line one\nLine");
        assert!(engine.spoken.lock().expect("lock").is_empty());

        speaker.finalize_text("Line one\nLine two\n");
        assert_eq!(
            *engine.spoken.lock().expect("lock"),
            vec!["Line one\nLine two"]
        );
    }

    #[test]
    fn off_mode_is_silent() {
        let (mut speaker, engine) = speaker(AutoSpeak::Off);
        speaker.handle_text_so_far("a\nb");
        speaker.finalize_text("a\nb");
        assert!(engine.spoken.lock().expect("lock").is_empty());
    }
}
