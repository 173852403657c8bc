use std::io;
use std::path::Path;

const DEFAULT_SYSTEM: &str = include_str!("../prompts/system.txt");
const DEFAULT_USER_TEMPLATE: &str = include_str!("../prompts/user_template.md");

/// System prompt and user-prompt template sent to the model.
///
/// The template may reference `{session_id}`, `{transcript}`,
/// `{expected_phrase}` and `{timings}`.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub system: String,
    pub user_template: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM.to_string(),
            user_template: DEFAULT_USER_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Load `system.txt` and `user_template.md` from `dir`, keeping the
    /// built-in text for any file that is absent.
    pub fn load(dir: Option<&Path>) -> io::Result<Self> {
        let mut templates = Self::default();
        let Some(dir) = dir else {
            return Ok(templates);
        };
        if let Some(system) = read_optional(&dir.join("system.txt"))? {
            templates.system = system;
        }
        if let Some(user) = read_optional(&dir.join("user_template.md"))? {
            templates.user_template = user;
        }
        Ok(templates)
    }

    #[must_use]
    pub fn render_user(
        &self,
        session_id: &str,
        transcript: &str,
        expected_phrase: &str,
        timings: &str,
    ) -> String {
        // Single pass so substituted values are never re-scanned for placeholders.
        let mut out = String::with_capacity(self.user_template.len() + timings.len());
        let mut rest = self.user_template.as_str();
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open..];
            let replaced = [
                ("{session_id}", session_id),
                ("{transcript}", transcript),
                ("{expected_phrase}", expected_phrase),
                ("{timings}", timings),
            ]
            .into_iter()
            .find(|(key, _)| after.starts_with(key));
            match replaced {
                Some((key, value)) => {
                    out.push_str(value);
                    rest = &after[key.len()..];
                }
                None => {
                    out.push('{');
                    rest = &after[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_every_placeholder_once() {
        let templates = PromptTemplates {
            system: String::new(),
            user_template: "{session_id}|{transcript}|{expected_phrase}|{timings}|{other}".into(),
        };
        let rendered = templates.render_user("s1", "", "say {timings}", "{\"a\":1}");
        assert_eq!(rendered, "s1||say {timings}|{\"a\":1}|{other}");
    }

    #[test]
    fn default_template_mentions_every_field() {
        let templates = PromptTemplates::default();
        for key in ["{session_id}", "{transcript}", "{expected_phrase}", "{timings}"] {
            assert!(templates.user_template.contains(key), "{key}");
        }
        assert!(templates.system.contains("audio_spoof_guess"));
    }

    #[test]
    fn load_overrides_only_present_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("system.txt"), "custom system").unwrap();

        let templates = PromptTemplates::load(Some(dir.path())).expect("load");
        assert_eq!(templates.system, "custom system");
        assert_eq!(templates.user_template, PromptTemplates::default().user_template);
    }
}
