//! In-memory conversation log that the render layer draws from.

pub const GREETING: &str = "Hi, I am Essence - your Agentic Critic. How can I help you today?";
pub const APOLOGY: &str = "⚠️ Error connecting to the server. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub sender: Sender,
    pub text: String,
    /// Attached images as data URIs.
    pub images: Vec<String>,
    /// Bot replies stay open while chunks stream in.
    pub is_final: bool,
}

#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    next_id: u64,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        let mut log = Self {
            messages: Vec::new(),
            next_id: 0,
        };
        log.push(Sender::Bot, GREETING.to_string(), Vec::new(), true);
        log
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// True while the newest message is a bot reply still receiving chunks.
    #[must_use]
    pub fn has_open_reply(&self) -> bool {
        matches!(
            self.messages.last(),
            Some(Message {
                sender: Sender::Bot,
                is_final: false,
                ..
            })
        )
    }

    /// Append a streamed reply delta. Returns the id of the message it landed in.
    pub fn apply_chunk(&mut self, delta: &str) -> u64 {
        if self.has_open_reply() {
            if let Some(open) = self.messages.last_mut() {
                open.text.push_str(delta);
                return open.id;
            }
        }
        self.push(Sender::Bot, delta.to_string(), Vec::new(), false)
    }

    /// Close the open bot reply and hand back its text for playback.
    pub fn finalize_reply(&mut self) -> Option<String> {
        if !self.has_open_reply() {
            return None;
        }
        let open = self.messages.last_mut()?;
        open.is_final = true;
        Some(open.text.clone())
    }

    /// Record what the backend committed for the user's turn. Empty turns add nothing.
    pub fn push_user(&mut self, text: &str, images: Vec<String>) -> Option<u64> {
        let text = text.trim();
        if text.is_empty() && images.is_empty() {
            return None;
        }
        Some(self.push(Sender::User, text.to_string(), images, true))
    }

    pub fn push_apology(&mut self) -> u64 {
        let _ = self.finalize_reply();
        self.push(Sender::Bot, APOLOGY.to_string(), Vec::new(), true)
    }

    /// Drop the conversation, keeping only the greeting.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.push(Sender::Bot, GREETING.to_string(), Vec::new(), true);
    }

    fn push(&mut self, sender: Sender, text: String, images: Vec<String>, is_final: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push(Message {
            id,
            sender,
            text,
            images,
            is_final,
        });
        id
    }
}
