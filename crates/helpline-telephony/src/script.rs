//! Voice-script (TwiML) documents.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Verb {
    Say(String),
    Gather {
        action: Option<String>,
        timeout_secs: u32,
        prompt: Option<String>,
    },
    Redirect(String),
    Pause(u32),
    StartStream(String),
    Hangup,
}

/// Ordered list of instructions for the telephony provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceScript {
    voice: Option<String>,
    verbs: Vec<Verb>,
}

impl VoiceScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Voice used for every `<Say>`.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Speak `text`. Line breaks and runs of whitespace are collapsed.
    pub fn say(mut self, text: &str) -> Self {
        self.verbs.push(Verb::Say(speakable(text)));
        self
    }

    /// Listen for speech, optionally posting the result to `action`.
    pub fn gather(mut self, action: Option<&str>, timeout_secs: u32, prompt: Option<&str>) -> Self {
        self.verbs.push(Verb::Gather {
            action: action.map(str::to_string),
            timeout_secs,
            prompt: prompt.map(speakable),
        });
        self
    }

    pub fn redirect(mut self, url: &str) -> Self {
        self.verbs.push(Verb::Redirect(url.to_string()));
        self
    }

    pub fn pause(mut self, secs: u32) -> Self {
        self.verbs.push(Verb::Pause(secs));
        self
    }

    /// Fork the call audio to a media-stream WebSocket.
    pub fn start_stream(mut self, url: &str) -> Self {
        self.verbs.push(Verb::StartStream(url.to_string()));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }

    /// Text of every `<Say>`, including gather prompts, in order.
    pub fn spoken(&self) -> Vec<&str> {
        self.verbs
            .iter()
            .filter_map(|v| match v {
                Verb::Say(t) => Some(t.as_str()),
                Verb::Gather {
                    prompt: Some(p), ..
                } => Some(p.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether the script opens a media stream.
    pub fn opens_stream(&self) -> bool {
        self.verbs.iter().any(|v| matches!(v, Verb::StartStream(_)))
    }

    /// Timeout of the last `<Gather>`, if any.
    pub fn gather_timeout(&self) -> Option<u32> {
        self.verbs.iter().rev().find_map(|v| match v {
            Verb::Gather { timeout_secs, .. } => Some(*timeout_secs),
            _ => None,
        })
    }

    pub fn to_xml(&self) -> String {
        let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
        for verb in &self.verbs {
            match verb {
                Verb::Say(text) => xml.push_str(&self.say_xml(text)),
                Verb::Gather {
                    action,
                    timeout_secs,
                    prompt,
                } => {
                    xml.push_str(r#"<Gather input="speech""#);
                    if let Some(action) = action {
                        xml.push_str(&format!(r#" action="{}" method="POST""#, escape(action)));
                    }
                    xml.push_str(&format!(r#" timeout="{timeout_secs}""#));
                    match prompt {
                        Some(p) => {
                            xml.push('>');
                            xml.push_str(&self.say_xml(p));
                            xml.push_str("</Gather>");
                        }
                        None => xml.push_str("/>"),
                    }
                }
                Verb::Redirect(url) => {
                    xml.push_str(&format!(r#"<Redirect method="POST">{}</Redirect>"#, escape(url)))
                }
                Verb::Pause(secs) => xml.push_str(&format!(r#"<Pause length="{secs}"/>"#)),
                Verb::StartStream(url) => xml.push_str(&format!(
                    r#"<Start><Stream url="{}"/></Start>"#,
                    escape(url)
                )),
                Verb::Hangup => xml.push_str("<Hangup/>"),
            }
        }
        xml.push_str("</Response>");
        xml
    }

    fn say_xml(&self, text: &str) -> String {
        match &self.voice {
            Some(v) => format!(r#"<Say voice="{}">{}</Say>"#, escape(v), escape(text)),
            None => format!("<Say>{}</Say>", escape(text)),
        }
    }
}

fn speakable(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
