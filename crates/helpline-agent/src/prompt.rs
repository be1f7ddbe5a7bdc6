//! Spoken prompts and the voice scripts built from them.

use helpline_core::config::Config;
use helpline_core::types::{Slot, Stage, join_slots};
use helpline_telephony::VoiceScript;

pub const COLLECT_ALL_PROMPT: &str = "Please provide your name, role and department. \
     What is the issue you're experiencing, and how severe is it?";
pub const IDENTITY_PROMPT: &str = "Please provide your name and department.";
pub const ISSUE_PROMPT: &str = "Please describe the issue you're experiencing.";
pub const SEVERITY_PROMPT: &str =
    "Please tell me the severity of this issue. Is it high, medium, or low?";

pub const PROCESSING_ACK: &str = "Thank you, I'm processing that information.";
pub const NOT_HEARD: &str = "I didn't hear your response.";
pub const HANDOFF: &str = "Thank you for the information. Connecting you with our AI assistant now.";
pub const HANDOFF_INCOMPLETE: &str = "Thank you. I'll connect you with our AI assistant now.";
pub const WORKING_ACK: &str = "Processing your request...";
pub const TURN_APOLOGY: &str =
    "I'm sorry, I'm having trouble processing that. Could you please try again?";

/// Where the provider should post gathered speech and silence.
#[derive(Debug, Clone)]
pub struct ScriptSettings {
    pub voice: String,
    pub gather_action: String,
    pub no_input_action: String,
    pub gather_timeout_secs: u32,
    pub stream_url: String,
    pub stream_open_timeout_secs: u32,
    pub listen_timeout_secs: u32,
}

impl ScriptSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            voice: config.voice(),
            gather_action: "/voice/gather".into(),
            no_input_action: "/voice/no-input".into(),
            gather_timeout_secs: config.gather_timeout_secs(),
            stream_url: config
                .media_stream_url()
                .unwrap_or_else(|| format!("ws://127.0.0.1:{}/media", config.port())),
            stream_open_timeout_secs: config.stream_open_timeout_secs(),
            listen_timeout_secs: config.listen_timeout_secs(),
        }
    }
}

/// Question asked on entry to `stage`. `pending` names the slots a
/// missing-field re-prompt is waiting for.
pub fn stage_question(stage: Stage, pending: &[Slot]) -> String {
    match stage {
        Stage::CollectingAllDetails => COLLECT_ALL_PROMPT.into(),
        Stage::CollectingMissingFields => format!("Please tell me your {}.", join_slots(pending)),
        Stage::CollectingIdentity => IDENTITY_PROMPT.into(),
        Stage::CollectingIssue => ISSUE_PROMPT.into(),
        Stage::CollectingSeverity => SEVERITY_PROMPT.into(),
        Stage::Greeting | Stage::Streaming | Stage::Ended => String::new(),
    }
}

pub struct Scripts {
    settings: ScriptSettings,
}

impl Scripts {
    pub fn new(settings: ScriptSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ScriptSettings {
        &self.settings
    }

    fn base(&self) -> VoiceScript {
        VoiceScript::new().with_voice(self.settings.voice.as_str())
    }

    /// `lead` followed by a gather for `question`, falling through to the
    /// no-input webhook when the caller stays silent.
    fn ask(&self, lead: Option<&str>, question: &str) -> VoiceScript {
        let mut script = self.base();
        if let Some(lead) = lead {
            script = script.say(lead);
        }
        script
            .gather(
                Some(&self.settings.gather_action),
                self.settings.gather_timeout_secs,
                Some(question),
            )
            .redirect(&self.settings.no_input_action)
    }

    pub fn greeting(&self, greeting: &str, stage: Stage) -> VoiceScript {
        self.ask(Some(greeting), &stage_question(stage, &[]))
    }

    /// Held while a background step works out the real reply.
    pub fn processing(&self) -> VoiceScript {
        self.base().say(PROCESSING_ACK).pause(10)
    }

    /// Spoken as soon as a streaming question is heard.
    pub fn working(&self) -> VoiceScript {
        self.base().say(WORKING_ACK).gather(None, 1, None)
    }

    pub fn missing_fields(&self, missing: &[Slot], repeat: bool) -> VoiceScript {
        let fields = join_slots(missing);
        let lead = if repeat {
            format!("I still need your {fields}.")
        } else {
            format!("I need more information about your {fields}.")
        };
        self.ask(Some(&lead), &stage_question(Stage::CollectingMissingFields, missing))
    }

    pub fn no_speech(&self, stage: Stage, pending: &[Slot]) -> VoiceScript {
        self.ask(Some(NOT_HEARD), &stage_question(stage, pending))
    }

    /// Move on to the question of `stage` after `lead`.
    pub fn next_stage(&self, lead: &str, stage: Stage) -> VoiceScript {
        self.ask(Some(lead), &stage_question(stage, &[]))
    }

    /// Open the media stream and keep the call listening while it connects.
    pub fn handoff(&self, complete: bool) -> VoiceScript {
        self.base()
            .say(if complete { HANDOFF } else { HANDOFF_INCOMPLETE })
            .start_stream(&self.settings.stream_url)
            .gather(None, self.settings.stream_open_timeout_secs, None)
    }

    /// Spoken answer during streaming, then a short listening window.
    pub fn answer(&self, text: &str) -> VoiceScript {
        self.base()
            .say(text)
            .gather(None, self.settings.listen_timeout_secs, None)
    }

    pub fn apology(&self) -> VoiceScript {
        self.answer(TURN_APOLOGY)
    }
}
