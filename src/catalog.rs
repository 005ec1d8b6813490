//! Persona and coaching-mode reference data
//!
//! Personas give the coach a name, face and voice. Coaching modes carry the
//! prompt template that frames the conversation around the user's topic.
//! Both are immutable and looked up by name.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Placeholder substituted with the session topic in templates
pub const TOPIC_PLACEHOLDER: &str = "{user_topic}";

/// Placeholder substituted with the persona name in introductions
pub const NAME_PLACEHOLDER: &str = "{name}";

/// A coach the user can talk to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Display name, also the lookup key
    pub name: String,

    /// Avatar image reference
    pub avatar: String,

    /// Voice identifier at the speech synthesis service
    pub voice_id: Option<String>,

    /// Short bio
    pub bio: String,

    /// Self-introduction with `{name}` and `{user_topic}` placeholders
    pub intro_template: String,
}

impl Persona {
    /// Welcome line introducing this persona for a topic
    #[must_use]
    pub fn introduction(&self, topic: &str) -> String {
        self.intro_template
            .replace(NAME_PLACEHOLDER, &self.name)
            .replace(TOPIC_PLACEHOLDER, topic)
    }
}

/// A coaching style selecting the prompt template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoachingMode {
    /// Display name, also the lookup key
    pub name: String,

    /// Icon reference
    pub icon: String,

    /// Persona prompt with a `{user_topic}` placeholder
    pub prompt_template: String,
}

impl CoachingMode {
    /// Prompt with the topic substituted
    #[must_use]
    pub fn prompt_for(&self, topic: &str) -> String {
        self.prompt_template.replace(TOPIC_PLACEHOLDER, topic)
    }
}

/// Lookup table of personas and coaching modes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    personas: Vec<Persona>,
    modes: Vec<CoachingMode>,
}

const DEFAULT_INTRO: &str = "Hi, I'm {name}, your coach for today. \
     We'll be working on {user_topic}. Whenever you're ready, tell me what you'd like to start with.";

impl Catalog {
    /// Build a catalog from explicit entries
    #[must_use]
    pub const fn new(personas: Vec<Persona>, modes: Vec<CoachingMode>) -> Self {
        Self { personas, modes }
    }

    /// The built-in coaches and coaching modes
    #[must_use]
    pub fn builtin() -> Self {
        let persona = |name: &str, voice: &str, bio: &str| Persona {
            name: name.to_string(),
            avatar: format!("/{name}.jpg"),
            voice_id: Some(voice.to_string()),
            bio: bio.to_string(),
            intro_template: DEFAULT_INTRO.to_string(),
        };

        let personas = vec![
            persona("Rohan", "UgBBYS2sOqTuMpoF3BR0", "Professional male voice"),
            persona("Tina", "2qfp6zPuviqeCOZIE9RZ", "Professional female voice"),
            persona("Larry", "bIHbv24MWmeRgasZH58o", "Laid back friendly voice"),
            persona("Lucy", "kdmDKE6EkgrWrrykO9Qt", "Friendly female voice"),
        ];

        let modes = vec![
            CoachingMode {
                name: "Topic Wise Lectures".to_string(),
                icon: "/lecture.png".to_string(),
                prompt_template: "You are a helpful lecture voice assistant delivering \
                    structured talks on {user_topic}. Explain concepts clearly, build from \
                    fundamentals and check understanding as you go."
                    .to_string(),
            },
            CoachingMode {
                name: "Mock Interviews".to_string(),
                icon: "/interview.png".to_string(),
                prompt_template: "You are a friendly interviewer running a realistic mock \
                    interview about {user_topic}. Ask one question at a time, then give brief \
                    feedback on the answer before moving on."
                    .to_string(),
            },
            CoachingMode {
                name: "Question Bank".to_string(),
                icon: "/qa.png".to_string(),
                prompt_template: "You are a study partner drilling the user with practice \
                    questions on {user_topic}. Ask a question, wait for the answer, then \
                    explain the correct solution."
                    .to_string(),
            },
            CoachingMode {
                name: "Language Proficiency".to_string(),
                icon: "/language.png".to_string(),
                prompt_template: "You are a patient language coach helping the user practise \
                    {user_topic}. Correct mistakes gently and suggest more natural phrasing."
                    .to_string(),
            },
        ];

        Self { personas, modes }
    }

    #[must_use]
    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    #[must_use]
    pub fn modes(&self) -> &[CoachingMode] {
        &self.modes
    }

    /// Look up a persona by name
    ///
    /// # Errors
    ///
    /// Returns `Error::PersonaNotFound` if no persona has that name
    pub fn persona(&self, name: &str) -> Result<&Persona> {
        self.personas
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::PersonaNotFound(name.to_string()))
    }

    /// Look up a coaching mode by name
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if no mode has that name
    pub fn mode(&self, name: &str) -> Result<&CoachingMode> {
        self.modes
            .iter()
            .find(|m| m.name == name)
            .ok_or_else(|| Error::Config(format!("coaching mode \"{name}\" not found")))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
