use crate::models::MessageId;

/// Last message id handed to the sink. Lives for the process only.
///
/// The relay loop is the sole owner and mutator, so no locking is needed.
#[derive(Debug, Default)]
pub struct Cursor {
    last_id: Option<MessageId>,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&MessageId> {
        self.last_id.as_ref()
    }

    /// Record `id` as seen. Callers advance in ascending id order once the
    /// message's delivery has been attempted.
    pub fn advance(&mut self, id: MessageId) {
        self.last_id = Some(id);
    }

    /// Whether `id` is newer than everything already handed to the sink
    pub fn is_new(&self, id: &MessageId) -> bool {
        self.last_id.as_ref().is_none_or(|last| id > last)
    }
}
