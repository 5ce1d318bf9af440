//! Local turn buffer: draft text and queued images held until a commit flushes them.
//!
//! A commit is the only point where buffered state leaves the client. It is
//! also the only point where the buffer is cleared. An empty commit (nothing
//! typed, no images, no audio streamed) is parked as a single deferred commit.
//! A backend transcript arriving inside the wait window fires it. Otherwise it
//! expires silently.

use crate::protocol::{ClientFrame, ImageSource, TextMode};
use std::time::{Duration, Instant};

/// One image waiting for the next commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    /// Base64 data URI.
    pub data_uri: String,
    pub source: ImageSource,
}

impl PendingImage {
    #[must_use]
    pub fn new(data_uri: String, source: ImageSource) -> Self {
        Self { data_uri, source }
    }

    fn into_frame(self) -> ClientFrame {
        ClientFrame::ImageInput {
            image: self.data_uri,
            source: self.source,
        }
    }
}

/// Result of asking the buffer to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Send these frames now, in order; the buffer is already cleared.
    Send(Vec<ClientFrame>),
    /// Nothing buffered; waiting for a transcript until `deadline`.
    Deferred { deadline: Instant },
    /// A deferred commit was already waiting; its deadline is unchanged.
    AlreadyDeferred { deadline: Instant },
}

/// How a parked empty commit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredResolution {
    /// A transcript arrived in time; send these frames.
    Fire(Vec<ClientFrame>),
    /// The window lapsed with no transcript; nothing is sent.
    Expired,
}

#[derive(Debug, Clone)]
pub struct TurnBuffer {
    draft: String,
    pending_images: Vec<PendingImage>,
    recording: bool,
    audio_streamed: bool,
    deferred_until: Option<Instant>,
    commit_wait: Duration,
    commits_sent: u64,
}

impl TurnBuffer {
    #[must_use]
    pub fn new(commit_wait: Duration) -> Self {
        Self {
            draft: String::new(),
            pending_images: Vec::new(),
            recording: false,
            audio_streamed: false,
            deferred_until: None,
            commit_wait,
            commits_sent: 0,
        }
    }

    /// Replace-mode text delta: the new text is the whole draft.
    pub fn set_draft(&mut self, text: &str) {
        self.draft.clear();
        self.draft.push_str(text);
    }

    #[must_use]
    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn add_image(&mut self, image: PendingImage) {
        self.pending_images.push(image);
    }

    #[must_use]
    pub fn pending_images(&self) -> &[PendingImage] {
        &self.pending_images
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Audio for this turn has reached the backend, so a commit is not empty.
    pub fn mark_audio_streamed(&mut self) {
        self.audio_streamed = true;
    }

    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.draft.trim().is_empty() || !self.pending_images.is_empty() || self.audio_streamed
    }

    #[must_use]
    pub fn deferred_deadline(&self) -> Option<Instant> {
        self.deferred_until
    }

    /// Number of commits that actually reached the wire.
    #[must_use]
    pub fn commits_sent(&self) -> u64 {
        self.commits_sent
    }

    pub fn commit(&mut self, now: Instant) -> CommitOutcome {
        if self.has_content() {
            self.deferred_until = None;
            return CommitOutcome::Send(self.take_frames());
        }
        if let Some(deadline) = self.deferred_until {
            return CommitOutcome::AlreadyDeferred { deadline };
        }
        let deadline = now + self.commit_wait;
        self.deferred_until = Some(deadline);
        CommitOutcome::Deferred { deadline }
    }

    /// A backend transcript arrived. Fires the parked commit if one is waiting.
    pub fn on_transcript(&mut self, transcript: &str, now: Instant) -> Option<DeferredResolution> {
        let deadline = self.deferred_until?;
        if now > deadline {
            self.deferred_until = None;
            return Some(DeferredResolution::Expired);
        }
        if transcript.trim().is_empty() {
            return None;
        }
        self.deferred_until = None;
        Some(DeferredResolution::Fire(self.take_frames()))
    }

    /// Expire the parked commit once its window has passed.
    pub fn poll_deferred(&mut self, now: Instant) -> Option<DeferredResolution> {
        match self.deferred_until {
            Some(deadline) if now >= deadline => {
                self.deferred_until = None;
                Some(DeferredResolution::Expired)
            }
            _ => None,
        }
    }

    /// Drop the draft and queued images without sending (cancelled recording).
    pub fn discard(&mut self) {
        self.draft.clear();
        self.pending_images.clear();
        self.audio_streamed = false;
        self.deferred_until = None;
    }

    /// Clear all local turn state and produce the backend reset frame.
    pub fn reset(&mut self) -> ClientFrame {
        self.discard();
        self.recording = false;
        ClientFrame::Reset
    }

    fn take_frames(&mut self) -> Vec<ClientFrame> {
        let images = std::mem::take(&mut self.pending_images);
        let draft = std::mem::take(&mut self.draft);
        self.audio_streamed = false;

        let mut frames: Vec<ClientFrame> = images.into_iter().map(PendingImage::into_frame).collect();
        let text = draft.trim();
        if !text.is_empty() {
            frames.push(ClientFrame::TextInput {
                text: text.to_string(),
                mode: TextMode::Replace,
            });
        }
        frames.push(ClientFrame::Commit);
        self.commits_sent = self.commits_sent.saturating_add(1);
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const WAIT: Duration = Duration::from_secs(3);

    fn shot(n: u8) -> PendingImage {
        PendingImage::new(format!("data:image/png;base64,{n}"), ImageSource::Shared)
    }

    #[test]
    fn commit_flushes_images_then_text_then_commit() {
        let now = Instant::now();
        let mut turn = TurnBuffer::new(WAIT);
        turn.add_image(shot(1));
        turn.add_image(shot(2));
        turn.set_draft("first");
        turn.set_draft("  what is on my screen?  ");

        let CommitOutcome::Send(frames) = turn.commit(now) else {
            panic!("expected frames");
        };
        assert_eq!(
            frames,
            vec![
                shot(1).into_frame(),
                shot(2).into_frame(),
                ClientFrame::TextInput {
                    text: "what is on my screen?".to_string(),
                    mode: TextMode::Replace,
                },
                ClientFrame::Commit,
            ]
        );
        assert_eq!(turn.draft(), "");
        assert!(turn.pending_images().is_empty());
        assert_eq!(turn.commits_sent(), 1);
    }

    #[test]
    fn empty_commit_defers_then_expires_silently() {
        let now = Instant::now();
        let mut turn = TurnBuffer::new(WAIT);
        assert_eq!(
            turn.commit(now),
            CommitOutcome::Deferred {
                deadline: now + WAIT
            }
        );
        assert_eq!(turn.poll_deferred(now + Duration::from_millis(2_999)), None);
        assert_eq!(
            turn.poll_deferred(now + WAIT),
            Some(DeferredResolution::Expired)
        );
        assert_eq!(turn.deferred_deadline(), None);
        assert_eq!(turn.commits_sent(), 0);
        // Nothing left to fire.
        assert_eq!(turn.on_transcript("late words", now + WAIT * 2), None);
    }

    #[test]
    fn transcript_inside_window_fires_deferred_commit() {
        let now = Instant::now();
        let mut turn = TurnBuffer::new(WAIT);
        assert!(matches!(turn.commit(now), CommitOutcome::Deferred { .. }));
        assert_eq!(turn.on_transcript("   ", now + Duration::from_secs(1)), None);
        assert_eq!(
            turn.on_transcript("hello essence", now + Duration::from_secs(2)),
            Some(DeferredResolution::Fire(vec![ClientFrame::Commit]))
        );
        assert_eq!(turn.deferred_deadline(), None);
        assert_eq!(turn.commits_sent(), 1);
    }

    #[test]
    fn transcript_after_window_expires_instead_of_firing() {
        let now = Instant::now();
        let mut turn = TurnBuffer::new(WAIT);
        let _ = turn.commit(now);
        assert_eq!(
            turn.on_transcript("too late", now + WAIT + Duration::from_millis(1)),
            Some(DeferredResolution::Expired)
        );
        assert_eq!(turn.commits_sent(), 0);
    }

    #[test]
    fn second_empty_commit_does_not_extend_deadline() {
        let now = Instant::now();
        let mut turn = TurnBuffer::new(WAIT);
        let _ = turn.commit(now);
        assert_eq!(
            turn.commit(now + Duration::from_secs(2)),
            CommitOutcome::AlreadyDeferred {
                deadline: now + WAIT
            }
        );
    }

    #[test]
    fn content_added_while_deferred_commits_immediately() {
        let now = Instant::now();
        let mut turn = TurnBuffer::new(WAIT);
        let _ = turn.commit(now);
        turn.set_draft("typed meanwhile");
        assert!(matches!(turn.commit(now), CommitOutcome::Send(_)));
        assert_eq!(turn.deferred_deadline(), None);
    }

    #[test]
    fn streamed_audio_counts_as_content() {
        let now = Instant::now();
        let mut turn = TurnBuffer::new(WAIT);
        turn.set_recording(true);
        turn.mark_audio_streamed();
        assert_eq!(
            turn.commit(now),
            CommitOutcome::Send(vec![ClientFrame::Commit])
        );
        assert!(!turn.has_content());
    }

    #[test]
    fn screenshots_queue_until_commit() {
        let now = Instant::now();
        let mut turn = TurnBuffer::new(WAIT);
        turn.set_recording(true);
        turn.add_image(shot(7));
        assert_eq!(turn.pending_images().len(), 1);
        let CommitOutcome::Send(frames) = turn.commit(now) else {
            panic!("expected frames");
        };
        assert_eq!(frames.first(), Some(&shot(7).into_frame()));
        assert!(turn.pending_images().is_empty());
    }

    #[test]
    fn reset_clears_everything_and_yields_reset_frame() {
        let now = Instant::now();
        let mut turn = TurnBuffer::new(WAIT);
        turn.set_draft("draft");
        turn.add_image(shot(1));
        turn.set_recording(true);
        assert_eq!(turn.reset(), ClientFrame::Reset);
        assert!(!turn.is_recording());
        assert!(!turn.has_content());
        assert!(matches!(turn.commit(now), CommitOutcome::Deferred { .. }));
        let _ = turn.reset();
        assert_eq!(turn.deferred_deadline(), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Draft(String),
        Image(u8),
        Commit,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            "[a-z ]{0,8}".prop_map(Op::Draft),
            any::<u8>().prop_map(Op::Image),
            Just(Op::Commit),
        ]
    }

    proptest! {
        #[test]
        fn every_queued_image_is_sent_exactly_once(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let now = Instant::now();
            let mut turn = TurnBuffer::new(WAIT);
            let mut queued = Vec::new();
            let mut sent = Vec::new();
            for op in ops {
                match op {
                    Op::Draft(text) => turn.set_draft(&text),
                    Op::Image(n) => {
                        queued.push(shot(n).data_uri);
                        turn.add_image(shot(n));
                    }
                    Op::Commit => {
                        if let CommitOutcome::Send(frames) = turn.commit(now) {
                            prop_assert_eq!(turn.draft(), "");
                            prop_assert!(turn.pending_images().is_empty());
                            prop_assert_eq!(frames.last(), Some(&ClientFrame::Commit));
                            let commits = frames.iter().filter(|f| **f == ClientFrame::Commit).count();
                            prop_assert_eq!(commits, 1);
                            for frame in frames {
                                if let ClientFrame::ImageInput { image, .. } = frame {
                                    sent.push(image);
                                }
                            }
                        }
                    }
                }
            }
            let leftover: Vec<String> = turn.pending_images().iter().map(|p| p.data_uri.clone()).collect();
            sent.extend(leftover);
            prop_assert_eq!(sent, queued);
        }
    }
}
